//! CLI Exit Code Registry
//!
//! Single source of truth for `smatch` exit codes. Scripts and schedulers
//! rely on them, so existing values never change meaning.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success                                                   |
//! | 1    | General error (unspecified)                               |
//! | 2    | Usage error (bad args, unknown join mode)                 |
//! | 3    | Invalid config (TOML parse or validation failure)         |
//! | 4    | Schema error (required column missing from an input)      |
//! | 5    | Runtime error (unreadable input, unwritable output, CSV)  |
//!
//! Quarantined records are not an error: a run that quarantines every left
//! record still exits 0.

use schoolmatch_recon::ReconError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Config could not be parsed or failed validation.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// An input is missing a column the config requires. Fatal for the run.
pub const EXIT_SCHEMA: u8 = 4;

/// IO or CSV failure while reading inputs or writing outputs.
pub const EXIT_RUNTIME: u8 = 5;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) | ReconError::TermTable { .. } => {
            EXIT_INVALID_CONFIG
        }
        ReconError::MissingColumn { .. } => EXIT_SCHEMA,
        ReconError::Csv(_) | ReconError::Io(_) => EXIT_RUNTIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let codes = [EXIT_SUCCESS, EXIT_ERROR, EXIT_USAGE, EXIT_INVALID_CONFIG, EXIT_SCHEMA, EXIT_RUNTIME];
        let unique: std::collections::HashSet<u8> = codes.iter().copied().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn engine_errors_map_to_codes() {
        assert_eq!(recon_exit_code(&ReconError::ConfigParse("x".into())), EXIT_INVALID_CONFIG);
        assert_eq!(recon_exit_code(&ReconError::missing_column("focus", "FOCUS_LAT")), EXIT_SCHEMA);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(recon_exit_code(&ReconError::Io(io)), EXIT_RUNTIME);
    }
}

// smatch - school and district record linkage from the command line

mod crosswalk;
mod exit_codes;
mod link;
mod near;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use env_logger::Env;

use exit_codes::{recon_exit_code, EXIT_ERROR, EXIT_RUNTIME, EXIT_SUCCESS, EXIT_USAGE};
use schoolmatch_recon::ReconError;

#[derive(Parser)]
#[command(name = "smatch")]
#[command(about = "Link school and district records across registries")]
#[command(version)]
struct Cli {
    /// Log pipeline progress (info level). RUST_LOG overrides.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a school linkage from a .link.toml config
    #[command(after_help = "\
Examples:
  smatch run focus-nces.link.toml
  smatch run focus-nces.link.toml --json
  smatch run focus-nces.link.toml --matched out/schools.csv --max-distance 50")]
    Run {
        /// Path to the .link.toml config file
        config: PathBuf,

        /// Print the summary JSON to stdout
        #[arg(long)]
        json: bool,

        /// Matched CSV path (overrides [output].matched)
        #[arg(long)]
        matched: Option<PathBuf>,

        /// Quarantine CSV path (overrides [output].quarantined)
        #[arg(long)]
        quarantined: Option<PathBuf>,

        /// Summary JSON path (overrides [output].summary)
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Proximity threshold in meters (overrides [proximity].max_distance_m)
        #[arg(long)]
        max_distance: Option<f64>,
    },

    /// Validate a .link.toml config without reading any data
    #[command(after_help = "\
Examples:
  smatch validate focus-nces.link.toml")]
    Validate {
        /// Path to the .link.toml config file
        config: PathBuf,
    },

    /// Join two CSVs on geographic proximity
    #[command(after_help = "\
Examples:
  smatch near focus.csv nces.csv --left-lat LAT --left-lon LON --right-lat LAT --right-lon LON
  smatch near a.csv b.csv --left-lat y --left-lon x --right-lat y --right-lon x --right-prefix B_ --how inner
  smatch near a.csv b.csv --left-lat y --left-lon x --right-lat y --right-lon x -o joined.csv")]
    Near(near::NearArgs),

    /// Pair distinct name values across two CSVs by similarity
    #[command(after_help = "\
Examples:
  smatch crosswalk focus.csv SCHOOL_DISTRICT_NAME accounts.csv ACCOUNT_NAME
  smatch crosswalk focus.csv SCHOOL_DISTRICT_NAME accounts.csv ACCOUNT_NAME --threshold 80 -o crosswalk.csv")]
    Crosswalk(crosswalk::CrosswalkArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let result = match cli.command {
        Commands::Run {
            config,
            json,
            matched,
            quarantined,
            summary,
            max_distance,
        } => link::cmd_run(link::RunOptions {
            config,
            json,
            matched,
            quarantined,
            summary,
            max_distance,
        }),
        Commands::Validate { config } => link::cmd_validate(config),
        Commands::Near(args) => near::cmd_near(args),
        Commands::Crosswalk(args) => crosswalk::cmd_crosswalk(args),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_RUNTIME, message: msg.into(), hint: None }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Create error from an engine error with the registry exit code.
    pub fn recon(err: ReconError) -> Self {
        let hint = match &err {
            ReconError::MissingColumn { .. } => {
                Some("column names in [*.columns] refer to headers after the source prefix is applied".to_string())
            }
            ReconError::ConfigParse(_) => Some("check the file with `smatch validate`".to_string()),
            _ => None,
        };
        Self { code: recon_exit_code(&err), message: err.to_string(), hint }
    }
}

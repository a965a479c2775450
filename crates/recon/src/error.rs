use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (bad threshold, missing column mapping, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Missing required column in input data. Fatal for the whole run.
    #[error("role '{role}': missing column '{column}'")]
    MissingColumn { role: String, column: String },
    /// A term table entry that does not compile to a pattern.
    #[error("term table entry '{term}': {message}")]
    TermTable { term: String, message: String },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconError {
    pub fn missing_column(role: &str, column: &str) -> Self {
        Self::MissingColumn {
            role: role.into(),
            column: column.into(),
        }
    }
}

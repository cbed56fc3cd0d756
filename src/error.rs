use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuartError {
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Schema drift in table '{table}': {detail}")]
    SchemaDrift { table: String, detail: String },
    #[error("Unknown field '{field}' in filter for table '{table}'")]
    UnknownField { table: String, field: String },
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Constraint violation on table '{table}': {detail}")]
    Constraint { table: String, detail: String },
    #[error("Could not acquire lock file '{path}' within {waited_ms} ms")]
    LockTimeout { path: PathBuf, waited_ms: u64 },
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, QuartError>;

// Helper conversions
impl From<rusqlite::Error> for QuartError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<std::io::Error> for QuartError {
    fn from(e: std::io::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilingsError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Unknown loading session: {0}")]
    UnknownSession(String),
    #[error("Invalid record: {message}")]
    InvalidRecord { message: String, row: Option<u64> },
    #[error("Background task failed: {0}")]
    Join(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, FilingsError>;

// Helper conversions
impl From<rusqlite::Error> for FilingsError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<config::ConfigError> for FilingsError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<tokio::task::JoinError> for FilingsError {
    fn from(e: tokio::task::JoinError) -> Self { Self::Join(e.to_string()) }
}

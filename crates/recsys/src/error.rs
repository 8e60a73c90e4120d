//! Error types for the recommendation engine

pub type Result<T> = std::result::Result<T, RecsysError>;

#[derive(Debug, thiserror::Error)]
pub enum RecsysError {
    #[error("Unknown user: {0}")]
    UnknownUser(u32),

    #[error("Unknown item: {0}")]
    UnknownItem(u32),

    #[error("User {0} has no rated items to build a content profile from")]
    EmptyProfile(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Stale index: {0}")]
    StaleIndex(String),

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Data format error: {0}")]
    DataFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl RecsysError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub fn stale_index(message: impl Into<String>) -> Self {
        Self::StaleIndex(message.into())
    }

    /// Whether the error came from an unfit or partially restored model
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleIndex(_))
    }
}

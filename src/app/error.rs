use thiserror::Error;

use crate::adapters::journal::JournalError;
use crate::adapters::legacy_tokens::TokenDirectoryError;
use crate::app::services::ServiceError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to open telemetry journal: {0}")]
    StorageInit(#[from] JournalError),
    #[error("failed to load legacy station tokens: {0}")]
    LegacyTokens(#[from] TokenDirectoryError),
    #[error("failed to preload configured stations: {0}")]
    Preload(#[from] ServiceError),
    #[error("http server failed: {0}")]
    Runtime(#[from] std::io::Error),
}

impl AppError {
    pub fn logging_init<E: std::fmt::Display>(error: E) -> Self {
        Self::LoggingInit(error.to_string())
    }

    pub fn config<E: std::fmt::Display>(error: E) -> Self {
        Self::Config(error.to_string())
    }
}

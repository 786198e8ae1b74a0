//! Error types for recording sessions

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Failed to load {url}: {reason}")]
    Load { url: String, reason: String },

    #[error("Browser crashed before any action was recorded: {0}")]
    BrowserCrash(String),

    #[error("Navigation recovery failed: {0}")]
    NavigationRecovery(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Recording session failed: {0}")]
    Session(String),
}

pub type RecorderResult<T> = Result<T, RecorderError>;

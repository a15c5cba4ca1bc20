//! Error types for the pool keeper.

use thiserror::Error;

pub type KeeperResult<T> = Result<T, KeeperError>;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Value decode error: {0}")]
    Codec(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Submission error: {0}")]
    Submission(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for KeeperError {
    fn from(err: reqwest::Error) -> Self {
        KeeperError::Api(err.to_string())
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(err: serde_json::Error) -> Self {
        KeeperError::Codec(err.to_string())
    }
}

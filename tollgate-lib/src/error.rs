use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur in the gate
#[derive(Error, Debug)]
pub enum TollgateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
}

pub type Result<T> = std::result::Result<T, TollgateError>;

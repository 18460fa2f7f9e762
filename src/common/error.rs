//! Error handling module
//!
//! This module defines the error types and result type aliases used in the application.

use thiserror::Error;
use std::io;

/// devproxy error type
#[derive(Error, Debug)]
pub enum DevproxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// OpenSSL error
    #[error("OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate error
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Container runtime error
    #[error("Container runtime error: {0}")]
    Docker(String),

    /// DNS error
    #[error("DNS error: {0}")]
    Dns(String),

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `DevproxyError`.
pub type Result<T> = std::result::Result<T, DevproxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let proxy_err: DevproxyError = io_err.into();

        match proxy_err {
            DevproxyError::Io(_) => {}
            _ => panic!("Should convert to IO error"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = DevproxyError::Config("Invalid configuration".to_string());
        let err_str = format!("{}", err);
        assert!(err_str.contains("Invalid configuration"));
    }
}

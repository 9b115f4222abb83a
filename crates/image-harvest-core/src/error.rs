use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Custom error types for the image-harvest library
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Serialization error (config and session files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File not found error
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// URL rejected by the validator
    #[error("Rejected URL: {0}")]
    InvalidUrl(String),

    /// Payload size outside the allowed bounds
    #[error("Payload of {size} bytes outside allowed range {min}..={max}")]
    InvalidSize { size: u64, min: u64, max: u64 },

    /// Response Content-Type is not an image type we accept
    #[error("Unsupported MIME type: {0}")]
    UnsupportedMimeType(String),

    /// Unsupported image format
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// Server answered 429
    #[error("Rate limited by server for {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    /// Server error (5xx), worth another attempt
    #[error("HTTP error {status} for {url}")]
    Http { url: String, status: StatusCode },

    /// Client error (4xx other than 429), not retried
    #[error("Client error {status} for {url}: not retrying")]
    Client { url: String, status: StatusCode },

    /// Connection, timeout or body read failure
    #[error("Network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Payload could not be decoded; the raw bytes were kept at `preserved`
    #[error("Could not decode {}: {reason} (raw payload kept at {})", path.display(), preserved.display())]
    Decode {
        path: PathBuf,
        preserved: PathBuf,
        reason: String,
    },

    /// The run was cancelled before the item could be processed
    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse classification used for retry decisions and run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unsafe URL, bad size, bad MIME type, bad configuration
    InvalidInput,
    /// Timeout, connection error, 429 or 5xx
    TransientNetwork,
    /// 4xx other than 429
    PermanentNetwork,
    /// Payload kept as `.unknown`
    DecodeFailure,
    FilesystemFailure,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_)
            | Error::InvalidUrl(_)
            | Error::InvalidSize { .. }
            | Error::UnsupportedMimeType(_)
            | Error::UnsupportedFormat(_) => ErrorKind::InvalidInput,
            Error::RateLimited { .. } | Error::Http { .. } | Error::Network { .. } => {
                ErrorKind::TransientNetwork
            }
            Error::Client { .. } => ErrorKind::PermanentNetwork,
            Error::Image(_) | Error::Decode { .. } => ErrorKind::DecodeFailure,
            Error::Io(_) | Error::Json(_) | Error::FileNotFound(_) => ErrorKind::FilesystemFailure,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether another attempt at the same request could succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }

    /// Server-supplied delay hint, only present on rate limiting
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(source: reqwest::Error) -> Self {
        let url = source
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown url>".to_string());
        Error::Network { url, source }
    }
}

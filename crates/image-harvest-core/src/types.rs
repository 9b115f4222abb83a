use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

use crate::error::{Error, ErrorKind};

/// Supported image formats
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
    Webp,
    Other(String),
}

impl ImageFormat {
    /// Determine format from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            "png" => Self::Png,
            "gif" => Self::Gif,
            "bmp" => Self::Bmp,
            "tif" | "tiff" => Self::Tiff,
            "webp" => Self::Webp,
            other => Self::Other(other.to_string()),
        }
    }

    /// Check if format is supported
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// Representation of an image file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFile {
    /// Full path to the image file
    pub path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modified timestamp
    pub last_modified: SystemTime,

    /// Image format
    pub format: ImageFormat,
}

/// One URL to fetch, with the index its output file is named after
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub target_index: u64,
    pub target_dir: PathBuf,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, target_index: u64, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            target_index,
            target_dir: target_dir.into(),
        }
    }
}

/// Outcome of one attempt at a [`DownloadTask`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    pub success: bool,
    pub bytes_written: u64,
    pub error: Option<ErrorKind>,
}

impl FetchResult {
    pub fn success(bytes_written: u64) -> Self {
        Self {
            success: true,
            bytes_written,
            error: None,
        }
    }

    pub fn failure(kind: ErrorKind) -> Self {
        Self {
            success: false,
            bytes_written: 0,
            error: Some(kind),
        }
    }
}

impl From<&crate::Result<u64>> for FetchResult {
    fn from(result: &crate::Result<u64>) -> Self {
        match result {
            Ok(bytes) => FetchResult::success(*bytes),
            Err(e) => FetchResult::failure(Error::kind(e)),
        }
    }
}

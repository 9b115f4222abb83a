use std::path::{Path, PathBuf};
use std::time::Duration;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Browser User-Agent strings rotated across requests
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/115.0",
];

/// Hosts that are never fetched, regardless of address checks
pub const FORBIDDEN_DOMAINS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0"];

/// Smallest payload accepted as an image
pub const MIN_FILE_SIZE: u64 = 100;

/// Ceiling for a downloaded body (100 MiB)
pub const MAX_DOWNLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Ceiling for a payload handed to the codec (50 MiB)
pub const MAX_IMAGE_SIZE: u64 = 50 * 1024 * 1024;

/// Log level for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Settings for the download pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Maximum number of requests in flight at once
    pub concurrency: usize,

    /// Total attempts per URL (1 means no retry)
    pub retries: u32,

    /// Index given to the first URL of a session
    pub start_index: u64,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Flat delay after a transient failure other than 429, in milliseconds
    pub retry_delay_ms: u64,

    /// Base of the exponential backoff after a 429, in milliseconds
    pub backoff_base_ms: u64,

    /// Pause before each request, in milliseconds (0 disables pacing)
    pub request_delay_ms: u64,

    /// JPEG quality for re-encoded downloads
    pub jpeg_quality: u8,

    /// Where `download-file` creates its per-folder directories
    pub images_dir: PathBuf,

    /// User-Agent pool; one is picked at random per request
    pub user_agents: Vec<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            retries: 3,
            start_index: 1000,
            timeout_ms: 30_000,
            retry_delay_ms: 1_000,
            backoff_base_ms: 1_000,
            request_delay_ms: 0,
            jpeg_quality: crate::processing::codec::JPEG_QUALITY,
            images_dir: PathBuf::from("downloaded_images"),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DownloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Limits applied by the validator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_file_size: u64,
    pub max_download_size: u64,
    pub max_image_size: u64,
    pub forbidden_domains: Vec<String>,

    /// Accept loopback, private and link-local hosts (trusted intranet mirrors)
    pub allow_private_hosts: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_file_size: MIN_FILE_SIZE,
            max_download_size: MAX_DOWNLOAD_SIZE,
            max_image_size: MAX_IMAGE_SIZE,
            forbidden_domains: FORBIDDEN_DOMAINS.iter().map(|s| s.to_string()).collect(),
            allow_private_hosts: false,
        }
    }
}

/// Settings for duplicate detection and uniquification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Number of equal hash components (out of 3) that makes two images duplicates
    pub similarity_threshold: usize,

    /// Mutation rounds tried per duplicate before giving up
    pub max_uniquify_attempts: usize,

    /// Report renames without touching the filesystem
    pub dry_run: bool,

    /// Number of threads used for fingerprinting (0 = auto)
    pub threads: usize,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 2,
            max_uniquify_attempts: 10,
            dry_run: false,
            threads: 0, // Auto
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the rolling log file; stderr logging when unset
    pub log_dir: Option<PathBuf>,

    /// Log level
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            level: LogLevel::Info,
        }
    }
}

/// Configuration for the whole tool, one section per component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub download: DownloadConfig,
    pub validation: ValidationConfig,
    pub duplicates: DuplicateConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Configuration(format!("Failed to open config file: {}", e)))?;

        let config: Config = serde_json::from_reader(file)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .map_err(|e| Error::Configuration(format!("Failed to create config file: {}", e)))?;

        serde_json::to_writer_pretty(file, self)
            .map_err(|e| Error::Configuration(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            return Err(Error::Configuration(
                "Concurrency must be at least 1".to_string(),
            ));
        }

        if self.download.retries == 0 {
            return Err(Error::Configuration(
                "Retries counts total attempts and must be at least 1".to_string(),
            ));
        }

        if self.download.jpeg_quality == 0 || self.download.jpeg_quality > 100 {
            return Err(Error::Configuration(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        if self.download.user_agents.is_empty() {
            return Err(Error::Configuration(
                "At least one user agent must be configured".to_string(),
            ));
        }

        if !(1..=3).contains(&self.duplicates.similarity_threshold) {
            return Err(Error::Configuration(
                "Similarity threshold must be between 1 and 3".to_string(),
            ));
        }

        if self.duplicates.max_uniquify_attempts == 0 {
            return Err(Error::Configuration(
                "Uniquify attempt budget must be at least 1".to_string(),
            ));
        }

        let v = &self.validation;
        if v.min_file_size > v.max_image_size || v.min_file_size > v.max_download_size {
            return Err(Error::Configuration(
                "Minimum file size exceeds a maximum size ceiling".to_string(),
            ));
        }

        Ok(())
    }
}

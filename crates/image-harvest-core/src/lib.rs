//! Core functionality for harvesting images and keeping a directory free of
//! near-duplicates.
//!
//! This library provides:
//! - Concurrent, resumable downloading with retry and validation
//! - Canonical JPEG normalization of downloaded payloads
//! - Perceptual fingerprints (pHash, dHash, aHash) and duplicate detection
//! - In-place uniquification of duplicates through bounded mutations

// -- Public Re-exports --
pub use config::*;
pub use deduplication::{
    handle_duplicates, scan_for_duplicates, DuplicateRecord, DuplicateReport, ScanResult,
    UniqueIndex,
};
pub use download::{Fetcher, Orchestrator, ProgressEvent, ProgressRenderer, RunSummary};
pub use error::{Error, ErrorKind, Result};
pub use processing::{compute_fingerprint, Fingerprint, ImageHash};
pub use session::{SessionControl, SessionState, SessionStore};
pub use types::*;
pub use uniquify::{Perturbation, RandomMutations, Uniquifier, UniquifyOutcome, UniquifyReport};

// -- Public Modules --
pub mod config;
pub mod deduplication;
pub mod discovery;
pub mod download;
pub mod error;
pub mod logging;
pub mod processing;
pub mod session;
pub mod types;
pub mod uniquify;
pub mod validation;

// -- Test Modules --
#[cfg(test)]
pub mod test_utils;

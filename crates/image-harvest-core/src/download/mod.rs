//! Concurrent image downloading.
//!
//! [`Orchestrator`] spawns one task per URL; each task goes through
//! [`retry::fetch_with_retry`] to a shared [`Fetcher`], which validates,
//! fetches and hands the payload to the codec.

pub mod fetcher;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod url_list;

pub use fetcher::{next_available_path, Fetcher};
pub use orchestrator::{Orchestrator, RunSummary};
pub use progress::{ProgressEvent, ProgressRenderer};
pub use retry::{fetch_with_retry, RetryOutcome, RetryPolicy};
pub use url_list::{parse_url_list, UrlBatch};

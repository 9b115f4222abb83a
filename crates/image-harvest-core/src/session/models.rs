use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DownloadTask;

/// Terminal outcome of one URL within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
}

/// Persisted progress of one download session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,

    /// Input URLs with duplicates collapsed; never changed after creation
    pub urls: Vec<String>,

    /// Index given to `urls[0]`
    pub start_index: u64,

    /// Total attempts per URL
    pub retries: u32,

    pub target_dir: PathBuf,
    pub completed_urls: BTreeSet<String>,
    pub failed_urls: BTreeSet<String>,

    /// Number of URLs that reached a terminal outcome
    pub cursor: usize,

    pub paused: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Summary numbers for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub remaining: usize,
    /// Completed URLs as a percentage of all URLs
    pub percent: f64,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Start a session; repeated URLs keep only their first occurrence
    pub fn new(
        urls: impl IntoIterator<Item = String>,
        start_index: u64,
        retries: u32,
        target_dir: impl Into<PathBuf>,
    ) -> Self {
        let mut seen = HashSet::new();
        let urls: Vec<String> = urls
            .into_iter()
            .filter(|url| seen.insert(url.clone()))
            .collect();

        let now = Utc::now();
        Self {
            session_id: new_session_id(now),
            urls,
            start_index,
            retries,
            target_dir: target_dir.into(),
            completed_urls: BTreeSet::new(),
            failed_urls: BTreeSet::new(),
            cursor: 0,
            paused: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a terminal outcome. Returns false, changing nothing, for URLs
    /// that are unknown or already terminal.
    pub fn record(&mut self, url: &str, outcome: TaskOutcome) -> bool {
        if self.is_terminal(url) || !self.urls.iter().any(|u| u == url) {
            return false;
        }

        match outcome {
            TaskOutcome::Completed => self.completed_urls.insert(url.to_string()),
            TaskOutcome::Failed => self.failed_urls.insert(url.to_string()),
        };
        self.cursor += 1;
        self.touch();
        true
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.touch();
    }

    pub fn is_terminal(&self, url: &str) -> bool {
        self.completed_urls.contains(url) || self.failed_urls.contains(url)
    }

    /// URLs without a terminal outcome, in input order
    pub fn remaining_urls(&self) -> Vec<&str> {
        self.urls
            .iter()
            .filter(|url| !self.is_terminal(url))
            .map(String::as_str)
            .collect()
    }

    /// Remaining work as tasks; each URL keeps the index of its input position
    pub fn remaining_tasks(&self) -> Vec<DownloadTask> {
        self.urls
            .iter()
            .enumerate()
            .filter(|(_, url)| !self.is_terminal(url))
            .map(|(position, url)| {
                DownloadTask::new(
                    url.clone(),
                    self.start_index + position as u64,
                    self.target_dir.clone(),
                )
            })
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.urls.len()
    }

    /// `completed ∩ failed = ∅` and `cursor == |completed| + |failed|`
    pub fn is_consistent(&self) -> bool {
        self.completed_urls.is_disjoint(&self.failed_urls)
            && self.cursor == self.completed_urls.len() + self.failed_urls.len()
    }

    pub fn stats(&self) -> SessionStats {
        let total = self.urls.len();
        let completed = self.completed_urls.len();
        let failed = self.failed_urls.len();
        let percent = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        SessionStats {
            session_id: self.session_id.clone(),
            total,
            completed,
            failed,
            remaining: total.saturating_sub(completed + failed),
            percent,
            paused: self.paused,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn new_session_id(now: DateTime<Utc>) -> String {
    format!(
        "session_{}_{:08x}",
        now.format("%Y%m%d_%H%M%S"),
        rand::random::<u32>()
    )
}

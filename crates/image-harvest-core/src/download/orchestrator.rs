use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::fetcher::Fetcher;
use super::progress::ProgressEvent;
use super::retry::{fetch_with_retry, RetryOutcome, RetryPolicy};
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::session::{SessionControl, SessionRecorder, SessionState, SessionStore, TaskOutcome};
use crate::types::{DownloadTask, FetchResult};

/// What a run did, for the caller to report
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub session_id: String,
    /// URLs in the session
    pub total: usize,
    /// URLs completed in this run
    pub succeeded: usize,
    /// URLs failed in this run
    pub failed: usize,
    /// URLs left without an outcome because the run was cancelled
    pub skipped: usize,
    pub bytes_written: u64,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
    pub cancelled: bool,
    pub elapsed: Duration,
    /// Id of an unfinished session this run replaced in the target directory
    pub replaced_session: Option<String>,
}

/// Fans URLs out to a [`Fetcher`], retries transient failures and records
/// every terminal outcome in the session.
pub struct Orchestrator {
    fetcher: Arc<Fetcher>,
    policy: RetryPolicy,
    control: SessionControl,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Orchestrator {
    pub fn new(config: &Config, control: SessionControl) -> Result<Self> {
        let fetcher = Fetcher::new(config.download.clone(), config.validation.clone())?;
        Ok(Self {
            fetcher: Arc::new(fetcher),
            policy: RetryPolicy::from_config(&config.download),
            control,
            progress: None,
        })
    }

    /// Send a [`ProgressEvent`] on `tx` after every terminal outcome
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn control(&self) -> &SessionControl {
        &self.control
    }

    /// Download `urls` into `target_dir`, naming files from `start_index` upwards
    pub async fn run_session(
        &self,
        urls: Vec<String>,
        start_index: u64,
        target_dir: &Path,
    ) -> Result<RunSummary> {
        tokio::fs::create_dir_all(target_dir).await?;

        let store = SessionStore::for_dir(target_dir);
        let replaced = match store.load().await {
            Ok(Some(previous)) if !previous.is_finished() => {
                warn!(
                    "Replacing unfinished session {} in {} ({} URLs were still pending)",
                    previous.session_id,
                    target_dir.display(),
                    previous.remaining_urls().len()
                );
                Some(previous.session_id)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Overwriting unreadable session file: {}", e);
                None
            }
        };

        let state = SessionState::new(urls, start_index, self.policy.attempts, target_dir);
        let recorder = SessionRecorder::create(state, store).await?;
        let mut summary = self.run(recorder).await?;
        summary.replaced_session = replaced;
        Ok(summary)
    }

    /// Continue the session saved in `target_dir`, replaying only the URLs
    /// without an outcome. Each URL keeps the index it was first given.
    pub async fn resume_session(&self, target_dir: &Path) -> Result<RunSummary> {
        let store = SessionStore::for_dir(target_dir);
        let mut state = store
            .load()
            .await?
            .ok_or_else(|| Error::FileNotFound(store.path().to_path_buf()))?;

        tokio::fs::create_dir_all(&state.target_dir).await?;
        info!(
            "Resuming session {}: {} of {} URLs remaining",
            state.session_id,
            state.remaining_urls().len(),
            state.urls.len()
        );

        state.set_paused(false);
        let recorder = SessionRecorder::create(state, store).await?;
        self.run(recorder).await
    }

    async fn run(&self, recorder: SessionRecorder) -> Result<RunSummary> {
        let started = Instant::now();
        let snapshot = recorder.snapshot().await;
        let tasks = snapshot.remaining_tasks();

        let mut summary = RunSummary {
            session_id: snapshot.session_id.clone(),
            total: snapshot.urls.len(),
            ..Default::default()
        };
        let already_completed = snapshot.completed_urls.len();
        let already_failed = snapshot.failed_urls.len();

        let mut set = JoinSet::new();
        for task in tasks {
            let fetcher = Arc::clone(&self.fetcher);
            let policy = self.policy.clone();
            let control = self.control.clone();
            set.spawn(async move {
                let outcome = fetch_with_retry(&policy, &control, &task.url, |_| {
                    fetcher.fetch_unless_cancelled(&task, &control)
                })
                .await;
                (task, outcome)
            });
        }

        // Pause and resume are written to the session file as they happen
        let mut paused_rx = self.control.watch_paused();
        let mut watching = true;
        if *paused_rx.borrow_and_update() {
            if let Err(e) = recorder.set_paused(true).await {
                warn!("Could not persist pause state: {}", e);
            }
        }

        loop {
            let joined = tokio::select! {
                joined = set.join_next() => match joined {
                    Some(joined) => joined,
                    None => break,
                },
                changed = paused_rx.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let paused = *paused_rx.borrow_and_update();
                    if let Err(e) = recorder.set_paused(paused).await {
                        warn!("Could not persist pause state: {}", e);
                    }
                    continue;
                }
            };

            let (task, outcome): (DownloadTask, RetryOutcome<u64>) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Download task panicked or was aborted: {}", e);
                    summary.skipped += 1;
                    continue;
                }
            };

            let result = FetchResult::from(&outcome.result);
            let terminal = match outcome.result {
                Ok(bytes) => {
                    summary.succeeded += 1;
                    summary.bytes_written += bytes;
                    TaskOutcome::Completed
                }
                Err(Error::Cancelled) => {
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(
                        "Giving up on {} (index {}) after {} attempt(s): {}",
                        task.url, task.target_index, outcome.attempts, e
                    );
                    summary.failed += 1;
                    if let Some(kind) = result.error {
                        *summary.failures_by_kind.entry(kind).or_default() += 1;
                    }
                    TaskOutcome::Failed
                }
            };

            // Per-item persistence problems never abort the batch
            if let Err(e) = recorder.record(&task.url, terminal).await {
                warn!("Could not persist session progress: {}", e);
            }

            self.emit(ProgressEvent {
                completed: already_completed + summary.succeeded,
                failed: already_failed + summary.failed,
                total: summary.total,
                bytes: summary.bytes_written,
                elapsed: started.elapsed(),
            });
        }

        summary.cancelled = self.control.is_cancelled();
        summary.elapsed = started.elapsed();

        let final_state = recorder.finish().await?;
        info!(
            "Session {} done: {} ok, {} failed, {} skipped, {} bytes{}",
            final_state.session_id,
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.bytes_written,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is watching
            let _ = tx.send(event);
        }
    }
}

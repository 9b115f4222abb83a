//! Pausable, resumable download sessions.
//!
//! A [`SessionState`] records which URLs of a run reached a terminal outcome
//! and is persisted to `download_session.json` in the target directory after
//! every change, so an interrupted run can later replay only what is left.

mod control;
mod models;
mod store;

pub use control::{Gate, SessionControl};
pub use models::{SessionState, SessionStats, TaskOutcome};
pub use store::{SessionStore, SESSION_FILE_NAME};

use log::{info, warn};
use tokio::sync::Mutex;

use crate::error::Result;

/// Single writer for a session: tasks report outcomes here and never touch the file.
#[derive(Debug)]
pub struct SessionRecorder {
    state: Mutex<SessionState>,
    store: SessionStore,
}

impl SessionRecorder {
    /// Take ownership of `state` and persist it immediately
    pub async fn create(state: SessionState, store: SessionStore) -> Result<Self> {
        store.save(&state).await?;
        info!(
            "Session {} started with {} URLs",
            state.session_id,
            state.urls.len()
        );
        Ok(Self {
            state: Mutex::new(state),
            store,
        })
    }

    /// Record a terminal outcome and persist. Repeated reports for the same URL are ignored.
    pub async fn record(&self, url: &str, outcome: TaskOutcome) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.record(url, outcome) {
            warn!("Ignoring repeated outcome for {}", url);
            return Ok(false);
        }
        self.store.save(&state).await?;
        Ok(true)
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.set_paused(paused);
        self.store.save(&state).await
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Close the session. A session with every URL terminal deletes its file;
    /// otherwise the state is saved as paused for a later resume.
    pub async fn finish(&self) -> Result<SessionState> {
        let mut state = self.state.lock().await;
        if state.is_finished() {
            self.store.cleanup().await?;
            info!("Session {} completed", state.session_id);
        } else {
            state.set_paused(true);
            self.store.save(&state).await?;
            info!(
                "Session {} stopped with {} URLs remaining; saved to {}",
                state.session_id,
                state.urls.len() - state.cursor,
                self.store.path().display()
            );
        }
        Ok(state.clone())
    }
}

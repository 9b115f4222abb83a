use std::sync::Arc;

use log::info;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Answer from [`SessionControl::wait_if_paused`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Stop,
}

/// Pause, resume and cancel handle shared by every task of a run.
///
/// Cloning is cheap and all clones control the same run. Cancellation is a
/// one-way latch: once cancelled, every current and future wait returns
/// [`Gate::Stop`].
#[derive(Debug, Clone)]
pub struct SessionControl {
    paused: Arc<watch::Sender<bool>>,
    token: CancellationToken,
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
            token: CancellationToken::new(),
        }
    }

    /// In-flight attempts finish; new attempts block until [`resume`](Self::resume)
    pub fn pause(&self) {
        if !self.paused.send_replace(true) {
            info!("Downloads paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.send_replace(false) {
            info!("Downloads resumed");
        }
    }

    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            info!("Downloads cancelled");
        }
        self.token.cancel();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Receiver that sees every pause and resume
    pub fn watch_paused(&self) -> watch::Receiver<bool> {
        self.paused.subscribe()
    }

    /// Resolves once the run is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Called by every task before each attempt
    pub async fn wait_if_paused(&self) -> Gate {
        if self.token.is_cancelled() {
            return Gate::Stop;
        }

        let mut rx = self.paused.subscribe();
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Gate::Stop,
            resumed = rx.wait_for(|paused| !*paused) => match resumed {
                Ok(_) => Gate::Proceed,
                Err(_) => Gate::Stop,
            },
        }
    }
}

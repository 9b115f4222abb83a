use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Snapshot of a run, sent after every terminal task outcome
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    /// Bytes written during this run
    pub bytes: u64,
    pub elapsed: Duration,
}

impl ProgressEvent {
    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }

    /// Share of URLs with a terminal outcome, 0 to 100
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed() as f64 / self.total as f64 * 100.0
    }

    /// Terminal outcomes per second
    pub fn images_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Draws [`ProgressEvent`]s as an indicatif bar
pub struct ProgressRenderer {
    bar: ProgressBar,
}

impl ProgressRenderer {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{wide_bar} {pos}/{len} ({percent}%) | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░ "),
        );
        bar.set_message("Downloading...");
        Self { bar }
    }

    /// A renderer that tracks state without drawing (quiet mode, tests)
    pub fn hidden(total: usize) -> Self {
        let renderer = Self::new(total);
        renderer
            .bar
            .set_draw_target(indicatif::ProgressDrawTarget::hidden());
        renderer
    }

    pub fn update(&self, event: &ProgressEvent) {
        self.bar.set_length(event.total as u64);
        self.bar.set_position(event.processed() as u64);
        self.bar.set_message(format!(
            "{} ok | {} failed | {:.1} img/s | {}",
            event.completed,
            event.failed,
            event.images_per_second(),
            indicatif::HumanBytes(event.bytes)
        ));
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Consume events until the sender side is dropped
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<ProgressEvent>) -> Self {
        let mut last = None;
        while let Some(event) = rx.recv().await {
            self.update(&event);
            last = Some(event);
        }
        if let Some(event) = last {
            self.bar.finish_with_message(format!(
                "Completed {} of {} | {} ok | {} failed | {:.1}s elapsed | {:.1} img/s",
                event.processed(),
                event.total,
                event.completed,
                event.failed,
                event.elapsed.as_secs_f64(),
                event.images_per_second()
            ));
        } else {
            self.bar.finish_and_clear();
        }
        self
    }

    pub fn spawn(self, rx: mpsc::UnboundedReceiver<ProgressEvent>) -> JoinHandle<Self> {
        tokio::spawn(self.run(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_helpers() {
        let event = ProgressEvent {
            completed: 3,
            failed: 1,
            total: 8,
            bytes: 4000,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(event.percentage(), 50.0);
        assert_eq!(event.images_per_second(), 2.0);
        assert_eq!(event.bytes_per_second(), 2000.0);

        let instant = ProgressEvent {
            elapsed: Duration::ZERO,
            ..event
        };
        assert_eq!(instant.images_per_second(), 0.0);
    }

    #[tokio::test]
    async fn test_renderer_follows_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let renderer = ProgressRenderer::hidden(4).spawn(rx);

        for completed in 1..=3 {
            tx.send(ProgressEvent {
                completed,
                failed: 0,
                total: 4,
                bytes: 100,
                elapsed: Duration::from_millis(10),
            })
            .unwrap();
        }
        drop(tx);

        let renderer = renderer.await.unwrap();
        assert_eq!(renderer.position(), 3);
    }
}

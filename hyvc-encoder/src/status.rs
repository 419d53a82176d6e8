//! Shared processing status
//!
//! One writer per run publishes whole [`ProcessingStatus`] snapshots through a
//! `tokio::sync::watch` channel. Readers either poll a snapshot or await the
//! next change; neither can observe a half-written status or slow the writer.

use hyvc_core::{ProcessingStatus, Stage};
use tokio::sync::watch;

/// Writer half. Deliberately not `Clone`: a run has exactly one writer.
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<ProcessingStatus>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProcessingStatus::idle());
        Self { tx }
    }

    /// A new reader; any number may exist
    pub fn watch(&self) -> StatusWatcher {
        StatusWatcher {
            rx: self.tx.subscribe(),
        }
    }

    pub fn snapshot(&self) -> ProcessingStatus {
        self.tx.borrow().clone()
    }

    /// Publishes a status. Progress never moves backwards within a run and
    /// only a `Complete` status may report 100.
    pub fn publish(
        &self,
        stage: Stage,
        progress: f64,
        message: impl Into<String>,
        estimated_time_remaining: Option<f64>,
    ) {
        let previous = self.tx.borrow().progress;
        let ceiling = if stage == Stage::Complete { 100.0 } else { 99.0 };
        let progress = progress.clamp(0.0, ceiling).max(previous.min(ceiling));

        self.tx.send_replace(ProcessingStatus {
            stage,
            progress,
            message: message.into(),
            estimated_time_remaining,
        });
    }

    /// Moves to a terminal failure stage, keeping the last progress value
    pub fn fail(&self, stage: Stage, message: impl Into<String>) {
        let progress = self.tx.borrow().progress;
        self.tx.send_replace(ProcessingStatus {
            stage,
            progress,
            message: message.into(),
            estimated_time_remaining: None,
        });
    }
}

/// Reader half
#[derive(Debug, Clone)]
pub struct StatusWatcher {
    rx: watch::Receiver<ProcessingStatus>,
}

impl StatusWatcher {
    /// Latest published status
    pub fn snapshot(&self) -> ProcessingStatus {
        self.rx.borrow().clone()
    }

    /// The status if it changed since this watcher last looked
    pub fn poll_update(&mut self) -> Option<ProcessingStatus> {
        match self.rx.has_changed() {
            Ok(true) => Some(self.rx.borrow_and_update().clone()),
            _ => None,
        }
    }

    /// Waits for the next update; `None` once the run has ended and dropped
    /// its writer
    pub async fn changed(&mut self) -> Option<ProcessingStatus> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

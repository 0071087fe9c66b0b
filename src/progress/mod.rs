//! Progress events flowing from the orchestration to the presenter.
//!
//! The channel is one-directional: the pipeline never waits on the display.

pub mod presenter;

use tokio::sync::mpsc;

pub use presenter::{Presenter, PresenterExit, PresenterState};

/// A single update for the interactive display
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Replace the status line
    Status(String),
    /// Set the progress bar (0.0..=1.0); `None` hides it
    Progress(Option<f64>),
    /// Append a trailing output line; `None` clears them
    LogLine(Option<String>),
    /// The orchestration finished; the presenter should stop
    Done,
}

/// Sending half handed to the pipeline
#[derive(Clone, Debug)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx }, rx)
}

impl ProgressSender {
    /// Sends are fire-and-forget; a presenter that already exited is ignored.
    pub fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Status(message.into()));
    }

    pub fn progress(&self, percent: Option<f64>) {
        self.send(ProgressEvent::Progress(percent));
    }

    pub fn log_line(&self, line: impl Into<String>) {
        self.send(ProgressEvent::LogLine(Some(line.into())));
    }

    pub fn clear_log(&self) {
        self.send(ProgressEvent::LogLine(None));
    }

    pub fn done(&self) {
        self.send(ProgressEvent::Done);
    }

    /// A sender whose events go nowhere, for non-interactive callers
    pub fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

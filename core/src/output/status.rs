use crate::telemetry::metrics::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of an acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub metrics: MetricsSnapshot,
    pub last_frame: Option<u64>,
    /// Set when the run ended on an unrecoverable error.
    pub failure: Option<String>,
}

impl SessionStatus {
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            metrics: MetricsSnapshot::default(),
            last_frame: None,
            failure: None,
        }
    }
}

/// Latest-value status channel shared by the session and its threads.
#[derive(Clone)]
pub struct StatusBoard {
    sender: Arc<watch::Sender<SessionStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(SessionStatus::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> SessionStatus {
        self.sender.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.sender.borrow().state
    }

    pub fn set_state(&self, state: SessionState) {
        self.sender.send_modify(|status| status.state = state);
    }

    /// Starts a fresh run: clears the failure and the last frame.
    pub fn begin(&self, state: SessionState) {
        self.sender.send_modify(|status| {
            status.state = state;
            status.failure = None;
            status.last_frame = None;
        });
    }

    pub fn record_frame(&self, index: u64, metrics: MetricsSnapshot) {
        self.sender.send_modify(|status| {
            status.last_frame = Some(index);
            status.metrics = metrics;
        });
    }

    pub fn publish_metrics(&self, metrics: MetricsSnapshot) {
        self.sender.send_modify(|status| status.metrics = metrics);
    }

    /// Terminal failure; the first message wins.
    pub fn fail(&self, reason: String) {
        self.sender.send_modify(|status| {
            if status.failure.is_none() {
                status.failure = Some(reason);
            }
        });
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_see_state_changes_and_first_failure() {
        let board = StatusBoard::new();
        let receiver = board.subscribe();
        board.begin(SessionState::Connecting);
        board.fail("socket closed".into());
        board.fail("later".into());
        let status = receiver.borrow().clone();
        assert_eq!(status.state, SessionState::Connecting);
        assert_eq!(status.failure.as_deref(), Some("socket closed"));

        board.begin(SessionState::Streaming);
        assert!(!board.current().is_failed());
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, MonitorError};
use crate::models::ActivityStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum MonitorState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Idle => "idle",
            MonitorState::Starting => "starting",
            MonitorState::Running => "running",
            MonitorState::Stopping => "stopping",
            MonitorState::Stopped => "stopped",
            MonitorState::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(MonitorState::Idle),
            "starting" => Some(MonitorState::Starting),
            "running" => Some(MonitorState::Running),
            "stopping" => Some(MonitorState::Stopping),
            "stopped" => Some(MonitorState::Stopped),
            "error" => Some(MonitorState::Error),
            _ => None,
        }
    }

    /// `Stopped` and `Error` end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorState::Stopped | MonitorState::Error)
    }

    /// A worker owns the controller while the state is active.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            MonitorState::Starting | MonitorState::Running | MonitorState::Stopping
        )
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a controller, published on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: MonitorState,
    pub session_id: Option<String>,
    /// One line suitable for a status label.
    pub status_text: String,
    pub last_activity: Option<ActivityStatus>,
    pub ticks: u64,
    pub entries_written: u64,
    pub pending_entries: usize,
    /// Entries dropped after exhausting the sink backlog.
    pub lost_entries: u64,
    pub failure: Option<ErrorKind>,
    pub failure_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: MonitorState::Idle,
            session_id: None,
            status_text: "Idle".into(),
            last_activity: None,
            ticks: 0,
            entries_written: 0,
            pending_entries: 0,
            lost_entries: 0,
            failure: None,
            failure_message: None,
            updated_at: Utc::now(),
        }
    }
}

impl StatusSnapshot {
    pub fn starting(session_id: String) -> Self {
        Self {
            state: MonitorState::Starting,
            session_id: Some(session_id),
            status_text: "Launching browser".into(),
            ..Self::default()
        }
    }

    pub fn transition(&mut self, state: MonitorState, status_text: impl Into<String>) {
        self.state = state;
        self.status_text = status_text.into();
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, err: &MonitorError) {
        self.failure = Some(err.kind());
        self.failure_message = Some(err.to_string());
        self.transition(MonitorState::Error, format!("Error: {err}"));
    }

    pub fn has_log_loss(&self) -> bool {
        self.lost_entries > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(MonitorState::Stopped.is_terminal());
        assert!(MonitorState::Error.is_terminal());
        assert!(!MonitorState::Running.is_terminal());
        assert!(!MonitorState::Idle.is_active());
        assert!(MonitorState::Stopping.is_active());
    }

    #[test]
    fn test_fail_records_kind_and_message() {
        let mut snapshot = StatusSnapshot::starting("s-1".into());
        snapshot.fail(&MonitorError::LaunchTimeout { timeout_ms: 15_000 });

        assert_eq!(snapshot.state, MonitorState::Error);
        assert_eq!(snapshot.failure, Some(ErrorKind::LaunchTimeout));
        assert!(snapshot.status_text.contains("15000ms"));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let value = serde_json::to_value(StatusSnapshot::starting("s-1".into())).unwrap();
        assert_eq!(value["state"], "starting");
        assert_eq!(value["sessionId"], "s-1");
        assert_eq!(value["lostEntries"], 0);
    }
}

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AppendOutcome, LogEntry, MonitorSession};
use crate::monitor::MonitorState;

/// Durable backing for session records and activity log rows.
///
/// Each call is one atomic write. Implementations report failures and leave
/// retrying to [`super::LogSink`].
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn open_session(&self, session: &MonitorSession) -> Result<()>;

    async fn update_session_state(&self, session_id: &str, state: MonitorState) -> Result<()>;

    async fn close_session(
        &self,
        session_id: &str,
        final_state: MonitorState,
        failure: Option<String>,
        ended_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Stores `entry` unless its sequence is taken; a taken sequence is
    /// reported, never overwritten.
    async fn append_entry(&self, entry: &LogEntry) -> Result<AppendOutcome>;
}

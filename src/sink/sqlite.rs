use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;

use crate::db::Database;
use crate::models::{AppendOutcome, LogEntry, MonitorSession};
use crate::monitor::MonitorState;

use super::ActivityStore;

#[async_trait]
impl ActivityStore for Database {
    async fn open_session(&self, session: &MonitorSession) -> Result<()> {
        self.insert_monitor_session(session)
            .await
            .context("failed to persist monitor session")
    }

    async fn update_session_state(&self, session_id: &str, state: MonitorState) -> Result<()> {
        self.update_monitor_session_state(session_id, state).await
    }

    async fn close_session(
        &self,
        session_id: &str,
        final_state: MonitorState,
        failure: Option<String>,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        self.close_monitor_session(session_id, final_state, failure, ended_at)
            .await
            .context("failed to close monitor session")
    }

    async fn append_entry(&self, entry: &LogEntry) -> Result<AppendOutcome> {
        self.insert_log_entry(entry)
            .await
            .context("failed to persist activity log entry")
    }
}

/// Closes sessions a previous process left open, returning how many it closed.
pub async fn recover_interrupted_sessions(db: &Database) -> Result<usize> {
    let open = db.get_open_monitor_sessions().await?;
    let now = Utc::now();
    for session in &open {
        warn!(
            "Recovered unfinished monitor session {} (last state {}); marking as interrupted",
            session.id, session.final_state
        );
        db.close_monitor_session(
            &session.id,
            MonitorState::Error,
            Some("interrupted".into()),
            now,
        )
        .await?;
    }
    Ok(open.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recovery_closes_open_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("recover.sqlite3")).unwrap();
        let session = MonitorSession {
            id: "crashed".into(),
            started_at: Utc::now(),
            ended_at: None,
            final_state: MonitorState::Running,
            failure: None,
            meeting_url: "https://meet.example.com/room".into(),
            user_id: None,
            meeting_id: None,
            fingerprint: None,
        };
        db.open_session(&session).await.unwrap();

        assert_eq!(recover_interrupted_sessions(&db).await.unwrap(), 1);
        assert_eq!(recover_interrupted_sessions(&db).await.unwrap(), 0);

        let closed = db.get_monitor_session("crashed").await.unwrap().unwrap();
        assert_eq!(closed.final_state, MonitorState::Error);
        assert_eq!(closed.failure.as_deref(), Some("interrupted"));
    }
}

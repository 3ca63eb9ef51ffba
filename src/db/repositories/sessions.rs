use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_optional_datetime, parse_state},
};
use crate::models::MonitorSession;
use crate::monitor::MonitorState;

const SESSION_COLUMNS: &str =
    "id, started_at, ended_at, final_state, failure, meeting_url, user_id, meeting_id, fingerprint";

fn row_to_session(row: &Row) -> Result<MonitorSession> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let final_state: String = row.get("final_state")?;

    Ok(MonitorSession {
        id: row.get("id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        final_state: parse_state(&final_state)?,
        failure: row.get("failure")?,
        meeting_url: row.get("meeting_url")?,
        user_id: row.get("user_id")?,
        meeting_id: row.get("meeting_id")?,
        fingerprint: row.get("fingerprint")?,
    })
}

impl Database {
    pub async fn insert_monitor_session(&self, session: &MonitorSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO monitor_sessions (id, started_at, ended_at, final_state, failure, meeting_url, user_id, meeting_id, fingerprint, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    record.id,
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.final_state.as_str(),
                    record.failure,
                    record.meeting_url,
                    record.user_id,
                    record.meeting_id,
                    record.fingerprint,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn update_monitor_session_state(
        &self,
        session_id: &str,
        state: MonitorState,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE monitor_sessions
                 SET final_state = ?1,
                     updated_at = ?2
                 WHERE id = ?3 AND ended_at IS NULL",
                params![state.as_str(), Utc::now().to_rfc3339(), session_id],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn close_monitor_session(
        &self,
        session_id: &str,
        final_state: MonitorState,
        failure: Option<String>,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows = conn.execute(
                "UPDATE monitor_sessions
                 SET final_state = ?1,
                     failure = ?2,
                     ended_at = ?3,
                     updated_at = ?3
                 WHERE id = ?4",
                params![final_state.as_str(), failure, ended_at.to_rfc3339(), session_id],
            )?;

            if rows == 0 {
                return Err(anyhow!("monitor session {session_id} not found"));
            }
            Ok(())
        })
        .await
    }

    pub async fn get_monitor_session(&self, session_id: &str) -> Result<Option<MonitorSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM monitor_sessions WHERE id = ?1"
            ))?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;
            Ok(session)
        })
        .await
    }

    /// Sessions a crashed process never closed.
    pub async fn get_open_monitor_sessions(&self) -> Result<Vec<MonitorSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM monitor_sessions
                 WHERE ended_at IS NULL
                 ORDER BY started_at DESC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_session(id: &str) -> MonitorSession {
        MonitorSession {
            id: id.into(),
            started_at: Utc::now(),
            ended_at: None,
            final_state: MonitorState::Starting,
            failure: None,
            meeting_url: "https://meet.example.com/room".into(),
            user_id: Some("user-7".into()),
            meeting_id: None,
            fingerprint: Some("host-a".into()),
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("sessions.sqlite3")).unwrap();

        db.insert_monitor_session(&open_session("s-1")).await.unwrap();
        db.update_monitor_session_state("s-1", MonitorState::Running)
            .await
            .unwrap();

        let open = db.get_open_monitor_sessions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].final_state, MonitorState::Running);

        db.close_monitor_session("s-1", MonitorState::Stopped, None, Utc::now())
            .await
            .unwrap();

        let closed = db.get_monitor_session("s-1").await.unwrap().unwrap();
        assert_eq!(closed.final_state, MonitorState::Stopped);
        assert!(closed.ended_at.is_some());
        assert_eq!(closed.user_id.as_deref(), Some("user-7"));
        assert!(db.get_open_monitor_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closing_unknown_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("sessions.sqlite3")).unwrap();

        let result = db
            .close_monitor_session("missing", MonitorState::Error, None, Utc::now())
            .await;
        assert!(result.is_err());
        assert!(db.get_monitor_session("missing").await.unwrap().is_none());
    }
}

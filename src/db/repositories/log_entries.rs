use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_activity_status, parse_datetime, to_i64, to_u64},
};
use crate::models::{AppendOutcome, LogEntry};

const ENTRY_COLUMNS: &str =
    "session_id, sequence, observed_at, activity_status, message, matched_process, page_url";

fn entry_from_row(row: &Row<'_>) -> Result<LogEntry> {
    let observed_at: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(LogEntry {
        session_id: row.get(0)?,
        sequence: to_u64(row.get(1)?, "sequence")?,
        observed_at: parse_datetime(&observed_at, "observed_at")?,
        activity_status: parse_activity_status(&status)?,
        message: row.get(4)?,
        matched_process: row.get(5)?,
        page_url: row.get(6)?,
    })
}

impl Database {
    /// Appends one entry in its own transaction.
    ///
    /// When `(session_id, sequence)` is already taken, the stored row is
    /// compared with `entry`: the same row means an earlier attempt committed
    /// after its caller gave up, anything else is reported as a conflict.
    pub async fn insert_log_entry(&self, entry: &LogEntry) -> Result<AppendOutcome> {
        let record = entry.clone();
        self.execute(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO activity_logs (
                    session_id,
                    sequence,
                    observed_at,
                    activity_status,
                    message,
                    matched_process,
                    page_url,
                    created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (session_id, sequence) DO NOTHING",
                params![
                    record.session_id,
                    to_i64(record.sequence)?,
                    record.observed_at.to_rfc3339(),
                    record.activity_status.as_str(),
                    record.message,
                    record.matched_process,
                    record.page_url,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            if inserted > 0 {
                return Ok(AppendOutcome::Inserted);
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM activity_logs WHERE session_id = ?1 AND sequence = ?2"
            ))?;
            let mut rows = stmt.query(params![record.session_id, to_i64(record.sequence)?])?;
            let stored = match rows.next()? {
                Some(row) => entry_from_row(row)?,
                None => anyhow::bail!(
                    "insert of sequence {} was ignored but no row exists",
                    record.sequence
                ),
            };
            if stored == record {
                Ok(AppendOutcome::AlreadyStored)
            } else {
                Ok(AppendOutcome::Conflict(stored))
            }
        })
        .await
    }

    /// Entries of one session in sequence order, for audit exports.
    pub async fn get_log_entries_for_session(&self, session_id: &str) -> Result<Vec<LogEntry>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS}
                 FROM activity_logs
                 WHERE session_id = ?1
                 ORDER BY sequence ASC"
            ))?;

            let mut rows = stmt.query(params![session_id])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(entry_from_row(row)?);
            }

            Ok(entries)
        })
        .await
    }
}

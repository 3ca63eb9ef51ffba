use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AppendOutcome, LogEntry, MonitorSession};
use crate::monitor::MonitorState;

use super::ActivityStore;

#[derive(Default)]
struct MemoryState {
    sessions: Vec<MonitorSession>,
    entries: Vec<LogEntry>,
    failing_appends: u32,
}

/// Process-local store. Used when persistence is not wanted and in tests,
/// where `fail_next_appends` simulates a storage outage.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The next `count` calls to `append_entry` fail.
    pub fn fail_next_appends(&self, count: u32) {
        self.lock().failing_appends = count;
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.clone()
    }

    pub fn sessions(&self) -> Vec<MonitorSession> {
        self.lock().sessions.clone()
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn open_session(&self, session: &MonitorSession) -> Result<()> {
        self.lock().sessions.push(session.clone());
        Ok(())
    }

    async fn update_session_state(&self, session_id: &str, state: MonitorState) -> Result<()> {
        let mut guard = self.lock();
        let session = guard
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| anyhow!("monitor session {session_id} not found"))?;
        session.final_state = state;
        Ok(())
    }

    async fn close_session(
        &self,
        session_id: &str,
        final_state: MonitorState,
        failure: Option<String>,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut guard = self.lock();
        let session = guard
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| anyhow!("monitor session {session_id} not found"))?;
        session.final_state = final_state;
        session.failure = failure;
        session.ended_at = Some(ended_at);
        Ok(())
    }

    async fn append_entry(&self, entry: &LogEntry) -> Result<AppendOutcome> {
        let mut guard = self.lock();
        if guard.failing_appends > 0 {
            guard.failing_appends -= 1;
            return Err(anyhow!("simulated storage outage"));
        }
        let taken = guard
            .entries
            .iter()
            .find(|e| e.session_id == entry.session_id && e.sequence == entry.sequence);
        match taken {
            Some(stored) if stored == entry => Ok(AppendOutcome::AlreadyStored),
            Some(stored) => Ok(AppendOutcome::Conflict(stored.clone())),
            None => {
                guard.entries.push(entry.clone());
                Ok(AppendOutcome::Inserted)
            }
        }
    }
}

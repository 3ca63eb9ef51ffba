//! Ordered, durable activity log.
//!
//! [`LogSink`] owns the per-session sequence counter. Numbers are handed out
//! only when a write lands, and undelivered entries are replayed oldest-first
//! before anything newer, so the stored log for a session is always `1..=N`
//! in observation order. Entries that cannot be delivered within the backlog
//! bounds are dropped and counted, never silently. A write that timed out
//! keeps its number until confirmed; if it committed after all, the next
//! write finds it as a conflict and the loss is taken back.

mod memory;
mod sqlite;
mod store;

use std::{collections::VecDeque, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use log::{error, warn};
use rand::Rng;

use crate::config::SinkConfig;
use crate::models::{AppendOutcome, LogEntry, Observation};

pub use memory::MemoryStore;
pub use sqlite::recover_interrupted_sessions;
pub use store::ActivityStore;

#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub write_attempts: u32,
    pub backoff: Duration,
    pub write_timeout: Duration,
    pub backlog_capacity: usize,
    pub backlog_retries: u32,
}

impl From<&SinkConfig> for SinkOptions {
    fn from(config: &SinkConfig) -> Self {
        Self {
            write_attempts: config.write_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            backlog_capacity: config.backlog_capacity.max(1),
            backlog_retries: config.backlog_retries,
        }
    }
}

/// Result of one `append` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendReport {
    /// Sequence numbers written during this call, backlog first.
    pub written: Vec<u64>,
    /// Entries still waiting for storage.
    pub pending: usize,
    /// Entries given up on during this call.
    pub dropped: u64,
    /// Entries given up on earlier that turned out to be stored.
    pub recovered: u64,
}

impl AppendReport {
    pub fn is_degraded(&self) -> bool {
        self.pending > 0 || self.dropped > 0
    }
}

struct Pending {
    observation: Observation,
    deferrals: u32,
    /// Sequence the last write was issued under. That write may still commit.
    attempted_at: Option<u64>,
}

pub struct LogSink {
    store: Arc<dyn ActivityStore>,
    options: SinkOptions,
    next_sequence: u64,
    backlog: VecDeque<Pending>,
    lost: u64,
    /// Dropped observations last attempted under `next_sequence`.
    unresolved: Vec<Observation>,
}

impl LogSink {
    pub fn new(store: Arc<dyn ActivityStore>, options: SinkOptions) -> Self {
        Self {
            store,
            options,
            next_sequence: 1,
            backlog: VecDeque::new(),
            lost: 0,
            unresolved: Vec::new(),
        }
    }

    pub fn written(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub async fn append(&mut self, observation: Observation) -> AppendReport {
        let mut report = AppendReport::default();

        let backlog_clear = self.replay_backlog(&mut report).await;

        if backlog_clear {
            let attempts = self.options.write_attempts;
            match self.deliver(&observation, attempts, &mut report).await {
                Ok(sequence) => report.written.push(sequence),
                Err(err) => {
                    warn!("log sink degraded after {attempts} attempt(s): {err:#}");
                    let attempted_at = Some(self.next_sequence);
                    self.enqueue(observation, attempted_at, &mut report);
                }
            }
        } else {
            // Storage is still down; skip the retry cycle and queue behind older entries.
            self.age_backlog(&mut report);
            self.enqueue(observation, None, &mut report);
        }

        report.pending = self.backlog.len();
        report
    }

    /// Last bounded attempt at the backlog; anything left is counted as lost.
    pub async fn close(&mut self) -> AppendReport {
        let mut report = AppendReport::default();
        self.replay_backlog(&mut report).await;

        let remaining = self.backlog.len() as u64;
        if remaining > 0 {
            error!("log sink closing with {remaining} undelivered entr(ies); marking lost");
            self.backlog.clear();
            self.lost += remaining;
            report.dropped += remaining;
        }
        report
    }

    /// One attempt per queued entry, oldest first. Returns `true` once empty.
    async fn replay_backlog(&mut self, report: &mut AppendReport) -> bool {
        while let Some(head) = self.backlog.front() {
            let observation = head.observation.clone();
            match self.deliver(&observation, 1, report).await {
                Ok(sequence) => {
                    self.backlog.pop_front();
                    report.written.push(sequence);
                }
                Err(err) => {
                    let attempted_at = Some(self.next_sequence);
                    if let Some(head) = self.backlog.front_mut() {
                        head.attempted_at = attempted_at;
                    }
                    warn!(
                        "log sink backlog replay failed ({} pending): {err:#}",
                        self.backlog.len()
                    );
                    return false;
                }
            }
        }
        true
    }

    fn age_backlog(&mut self, report: &mut AppendReport) {
        for pending in self.backlog.iter_mut() {
            pending.deferrals += 1;
        }
        while self
            .backlog
            .front()
            .is_some_and(|p| p.deferrals > self.options.backlog_retries)
        {
            if let Some(dropped) = self.backlog.pop_front() {
                self.mark_lost(dropped, report);
            }
        }
    }

    fn enqueue(
        &mut self,
        observation: Observation,
        attempted_at: Option<u64>,
        report: &mut AppendReport,
    ) {
        if self.backlog.len() >= self.options.backlog_capacity {
            if let Some(dropped) = self.backlog.pop_front() {
                self.mark_lost(dropped, report);
            }
        }
        self.backlog.push_back(Pending {
            observation,
            deferrals: 0,
            attempted_at,
        });
    }

    fn mark_lost(&mut self, dropped: Pending, report: &mut AppendReport) {
        let observation = dropped.observation;
        error!(
            "log loss: dropping {} observation from {} for session {}",
            observation.classification.status, observation.observed_at, observation.session_id
        );
        self.lost += 1;
        report.dropped += 1;
        if dropped.attempted_at == Some(self.next_sequence) {
            self.unresolved.push(observation);
        }
    }

    /// Writes `observation` under the next free sequence number.
    ///
    /// A sequence only advances on a confirmed write, so a write that timed
    /// out but committed later shows up as a conflict on the same number.
    async fn deliver(
        &mut self,
        observation: &Observation,
        attempts: u32,
        report: &mut AppendReport,
    ) -> Result<u64> {
        let mut attempt = 1;
        let mut settled_conflict = false;
        loop {
            let sequence = self.next_sequence;
            let entry = observation.clone().into_entry(sequence);
            let err = match self.write_once(&entry).await {
                Ok(AppendOutcome::Inserted | AppendOutcome::AlreadyStored) => {
                    self.advance();
                    return Ok(sequence);
                }
                // Only one number can be in doubt at a time.
                Ok(AppendOutcome::Conflict(stored)) if !settled_conflict => {
                    self.settle_conflict(&stored, report);
                    settled_conflict = true;
                    continue;
                }
                Ok(AppendOutcome::Conflict(stored)) => anyhow!(
                    "sequence {sequence} already holds another entry from {}",
                    stored.observed_at
                ),
                Err(err) => err,
            };
            if attempt >= attempts {
                return Err(err);
            }
            warn!("log write attempt {attempt}/{attempts} failed for sequence {sequence}: {err:#}");
            tokio::time::sleep(backoff_delay(self.options.backoff, attempt)).await;
            attempt += 1;
        }
    }

    /// `stored` occupies `next_sequence`. A match with an entry given up on
    /// takes that loss back; either way numbering moves past the slot.
    fn settle_conflict(&mut self, stored: &LogEntry, report: &mut AppendReport) {
        let sequence = self.next_sequence;
        match self.unresolved.iter().position(|o| o.matches_entry(stored)) {
            Some(index) => {
                self.unresolved.remove(index);
                self.lost = self.lost.saturating_sub(1);
                report.recovered += 1;
                warn!("log entry {sequence} committed after it was given up; no longer counted lost");
            }
            None => error!(
                "sequence {sequence} of session {} holds an entry this sink did not write; skipping it",
                stored.session_id
            ),
        }
        self.advance();
    }

    fn advance(&mut self) {
        self.next_sequence += 1;
        self.unresolved.clear();
    }

    async fn write_once(&self, entry: &LogEntry) -> Result<AppendOutcome> {
        match tokio::time::timeout(self.options.write_timeout, self.store.append_entry(entry)).await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "write timed out after {}ms",
                self.options.write_timeout.as_millis()
            )),
        }
    }
}

/// Exponential backoff with up to 25% jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1 << attempt.saturating_sub(1).min(6));
    let jitter_ms = (exp.as_millis() as u64) / 4;
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ms)
    } else {
        0
    };
    exp + Duration::from_millis(jitter)
}

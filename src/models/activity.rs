use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Safe,
    Warning,
    Danger,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Safe => "safe",
            ActivityStatus::Warning => "warning",
            ActivityStatus::Danger => "danger",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "safe" => Some(ActivityStatus::Safe),
            "warning" => Some(ActivityStatus::Warning),
            "danger" => Some(ActivityStatus::Danger),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output for a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: ActivityStatus,
    pub message: String,
    pub matched_process: Option<String>,
}

/// A classified tick that has not been assigned a sequence number yet.
#[derive(Debug, Clone)]
pub struct Observation {
    pub session_id: String,
    pub observed_at: DateTime<Utc>,
    pub classification: Classification,
    pub page_url: Option<String>,
}

impl Observation {
    pub fn into_entry(self, sequence: u64) -> LogEntry {
        LogEntry {
            session_id: self.session_id,
            sequence,
            observed_at: self.observed_at,
            activity_status: self.classification.status,
            message: self.classification.message,
            matched_process: self.classification.matched_process,
            page_url: self.page_url,
        }
    }

    /// `true` when `entry` is this observation, under whatever sequence.
    pub fn matches_entry(&self, entry: &LogEntry) -> bool {
        self.session_id == entry.session_id
            && self.observed_at == entry.observed_at
            && self.classification.status == entry.activity_status
            && self.classification.message == entry.message
            && self.classification.matched_process == entry.matched_process
            && self.page_url == entry.page_url
    }
}

/// A persisted activity log row. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub session_id: String,
    pub sequence: u64,
    pub observed_at: DateTime<Utc>,
    pub activity_status: ActivityStatus,
    pub message: String,
    pub matched_process: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page_url: Option<String>,
}

/// What a store did with one append.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Inserted,
    /// An earlier attempt already stored this exact entry.
    AlreadyStored,
    /// The sequence number holds a different entry, returned here.
    Conflict(LogEntry),
}

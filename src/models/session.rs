use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitor::MonitorState;

/// One monitoring run, from `start()` to its terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub final_state: MonitorState,
    pub failure: Option<String>,
    pub meeting_url: String,
    pub user_id: Option<String>,
    pub meeting_id: Option<String>,
    /// Host name of the monitored machine.
    pub fingerprint: Option<String>,
}


pub mod activity;
pub mod session;

pub use activity::{ActivityStatus, AppendOutcome, Classification, LogEntry, Observation};
pub use session::MonitorSession;

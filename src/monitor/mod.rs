//! The monitoring state machine and its per-tick pipeline
//! (scan, page check, classify, log).

mod classifier;
mod controller;
mod loop_worker;
mod state;
mod watchdog;

pub use classifier::classify;
pub use controller::{MonitorController, MonitorDeps, StatusObserver};
pub use state::{MonitorState, StatusSnapshot};
pub use watchdog::{PageObservation, PageWatchdog};

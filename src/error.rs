use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by the monitoring engine.
///
/// Fatal variants end the current run in `MonitorState::Error`; the recoverable
/// ones (`PageQueryTransient`, `ProcessEnumeration`) are absorbed by the
/// component that produced them.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("no browser executable found (searched {} candidate(s))", searched.len())]
    BrowserNotFound { searched: Vec<PathBuf> },

    #[error("remote debugging port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("browser debug endpoint not reachable within {timeout_ms}ms")]
    LaunchTimeout { timeout_ms: u64 },

    #[error("browser process exited unexpectedly: {0}")]
    BrowserExited(String),

    #[error("failed to spawn browser {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("navigation to {url} did not complete within {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("debug session lost after {attempts} reconnect attempt(s)")]
    SessionLost { attempts: u32 },

    #[error("page query failed: {0}")]
    PageQueryTransient(String),

    #[error("process enumeration failed: {0}")]
    ProcessEnumeration(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation not allowed while monitor is {state}")]
    InvalidState { state: String },

    #[error("monitor worker stopped unexpectedly: {0}")]
    WorkerFailed(String),
}

/// Flat, serializable discriminant of [`MonitorError`] for status snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    BrowserNotFound,
    PortInUse,
    LaunchTimeout,
    BrowserExited,
    Spawn,
    NavigationTimeout,
    NavigationFailed,
    SessionLost,
    PageQueryTransient,
    ProcessEnumeration,
    Config,
    InvalidState,
    WorkerFailed,
}

impl MonitorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitorError::BrowserNotFound { .. } => ErrorKind::BrowserNotFound,
            MonitorError::PortInUse { .. } => ErrorKind::PortInUse,
            MonitorError::LaunchTimeout { .. } => ErrorKind::LaunchTimeout,
            MonitorError::BrowserExited(_) => ErrorKind::BrowserExited,
            MonitorError::Spawn { .. } => ErrorKind::Spawn,
            MonitorError::NavigationTimeout { .. } => ErrorKind::NavigationTimeout,
            MonitorError::NavigationFailed { .. } => ErrorKind::NavigationFailed,
            MonitorError::SessionLost { .. } => ErrorKind::SessionLost,
            MonitorError::PageQueryTransient(_) => ErrorKind::PageQueryTransient,
            MonitorError::ProcessEnumeration(_) => ErrorKind::ProcessEnumeration,
            MonitorError::Config(_) => ErrorKind::Config,
            MonitorError::InvalidState { .. } => ErrorKind::InvalidState,
            MonitorError::WorkerFailed(_) => ErrorKind::WorkerFailed,
        }
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

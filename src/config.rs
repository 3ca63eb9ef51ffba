use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::MonitorError;

pub const DEFAULT_DEBUG_PORT: u16 = 9222;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Explicit executable; checked before the platform candidates.
    pub executable: Option<PathBuf>,
    /// Replaces the platform candidate table when set. An empty list never resolves.
    pub candidates: Option<Vec<PathBuf>>,
    pub debug_host: String,
    /// `0` picks a free port before spawning.
    pub debug_port: u16,
    /// Parent directory for the disposable profile. System temp dir when unset.
    pub profile_root: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            candidates: None,
            debug_host: "127.0.0.1".into(),
            debug_port: DEFAULT_DEBUG_PORT,
            profile_root: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    pub launch_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    pub query_timeout_ms: u64,
    pub reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    /// Consecutive failed page queries before the watchdog gives up on the session.
    pub failure_threshold: u32,
    pub shutdown_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            launch_timeout_ms: 15_000,
            navigation_timeout_ms: 30_000,
            query_timeout_ms: 3_000,
            reconnect_attempts: 3,
            reconnect_backoff_ms: 250,
            failure_threshold: 5,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub write_attempts: u32,
    pub backoff_ms: u64,
    pub write_timeout_ms: u64,
    pub backlog_capacity: usize,
    /// Later ticks an undelivered entry may wait before it is dropped.
    pub backlog_retries: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            write_attempts: 3,
            backoff_ms: 100,
            write_timeout_ms: 2_000,
            backlog_capacity: 32,
            backlog_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub meeting_url: String,
    /// Drift is detected against this prefix; defaults to `meeting_url`.
    pub meeting_url_prefix: Option<String>,
    pub blocklist: Vec<String>,
    pub database_path: PathBuf,
    pub user_id: Option<String>,
    pub meeting_id: Option<String>,
    pub browser: BrowserConfig,
    pub timing: TimingConfig,
    pub sink: SinkConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            meeting_url: String::new(),
            meeting_url_prefix: None,
            blocklist: vec!["cluely".into()],
            database_path: PathBuf::from("meetwatch.sqlite3"),
            user_id: None,
            meeting_id: None,
            browser: BrowserConfig::default(),
            timing: TimingConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Reads `path` when it exists, then applies `MEETWATCH_*` overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            info!("No config at {}, using defaults", path.display());
            MonitorConfig::default()
        };

        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var("MEETWATCH_MEETING_URL") {
            self.meeting_url = value;
        }
        if let Ok(value) = env::var("MEETWATCH_DB") {
            self.database_path = PathBuf::from(value);
        }
        if let Ok(value) = env::var("MEETWATCH_DEBUG_PORT") {
            self.browser.debug_port = value
                .parse()
                .with_context(|| format!("MEETWATCH_DEBUG_PORT is not a port: {value}"))?;
        }
        if let Ok(value) = env::var("MEETWATCH_BROWSER") {
            self.browser.executable = Some(PathBuf::from(value));
        }
        if let Ok(value) = env::var("MEETWATCH_BLOCKLIST") {
            self.blocklist = value.split(',').map(str::to_string).collect();
        }
        Ok(())
    }

    /// Normalizes the blocklist and rejects values the engine cannot run with.
    pub fn validate(mut self) -> Result<Self, MonitorError> {
        let url = Url::parse(&self.meeting_url)
            .map_err(|err| MonitorError::Config(format!("meeting_url: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MonitorError::Config(format!(
                "meeting_url must be http(s), got {}",
                url.scheme()
            )));
        }

        if let Some(prefix) = &self.meeting_url_prefix {
            if prefix.trim().is_empty() {
                return Err(MonitorError::Config(
                    "meeting_url_prefix must not be empty; omit it to use meeting_url".into(),
                ));
            }
        }

        self.blocklist = self
            .blocklist
            .iter()
            .map(|pattern| pattern.trim().to_lowercase())
            .filter(|pattern| !pattern.is_empty())
            .collect();

        let timing = &self.timing;
        let bounds = [
            ("poll_interval_ms", timing.poll_interval_ms),
            ("launch_timeout_ms", timing.launch_timeout_ms),
            ("navigation_timeout_ms", timing.navigation_timeout_ms),
            ("query_timeout_ms", timing.query_timeout_ms),
            ("shutdown_grace_ms", timing.shutdown_grace_ms),
            ("write_timeout_ms", self.sink.write_timeout_ms),
        ];
        if let Some((name, _)) = bounds.iter().find(|(_, value)| *value == 0) {
            return Err(MonitorError::Config(format!("{name} must be greater than zero")));
        }
        if timing.failure_threshold == 0 || self.sink.write_attempts == 0 {
            return Err(MonitorError::Config(
                "failure_threshold and write_attempts must be at least 1".into(),
            ));
        }

        Ok(self)
    }

    pub fn drift_prefix(&self) -> &str {
        self.meeting_url_prefix
            .as_deref()
            .unwrap_or(&self.meeting_url)
    }
}

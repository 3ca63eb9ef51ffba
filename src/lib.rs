pub mod browser;
pub mod cdp;
mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod monitor;
pub mod scanner;
pub mod sink;
mod utils;

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use log::{info, warn};
use url::Url;

pub use cli::Cli;
pub use config::MonitorConfig;
pub use db::Database;
pub use error::{ErrorKind, MonitorError, MonitorResult};
pub use monitor::{MonitorController, MonitorDeps, MonitorState, StatusObserver, StatusSnapshot};
pub use sink::{recover_interrupted_sessions, ActivityStore, MemoryStore};

/// Prints status-text changes; the CLI's stand-in for a status label.
#[derive(Default)]
struct LogObserver {
    last_text: Mutex<String>,
}

impl StatusObserver for LogObserver {
    fn on_status(&self, snapshot: &StatusSnapshot) {
        let mut last = match self.last_text.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *last != snapshot.status_text {
            info!("[{}] {}", snapshot.state, snapshot.status_text);
            *last = snapshot.status_text.clone();
        }
    }
}

/// Host part of the meeting URL; query strings can carry meeting passwords.
fn redacted(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "<invalid url>".into())
}

pub async fn run(cli: Cli) -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = cli.load_config()?;
    info!(
        "meetwatch starting: meeting on {}, {} blocklist pattern(s), store {}",
        redacted(&config.meeting_url),
        config.blocklist.len(),
        config.database_path.display()
    );

    let database = Database::new(config.database_path.clone())?;

    // Close sessions left open when a previous run crashed.
    let recovered = recover_interrupted_sessions(&database).await?;
    if recovered > 0 {
        warn!("Marked {recovered} interrupted session(s) as failed");
    }

    let deps = MonitorDeps::production(&config, database);
    let controller = MonitorController::new(config, deps)?;
    let observer = controller.observe(Arc::new(LogObserver::default()));

    let session_id = controller.start().await?;
    info!("Session {session_id} started; press Ctrl+C to stop");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!("Could not listen for Ctrl+C: {err}");
            }
            controller.stop().await;
        }
        _ = controller.wait_for_terminal() => {}
    }

    let last = controller.wait_for_terminal().await;
    observer.abort();

    if last.has_log_loss() {
        warn!("{} activity log entr(ies) were lost", last.lost_entries);
    }
    match (last.failure, last.failure_message) {
        (Some(kind), Some(message)) => bail!("monitor failed ({kind:?}): {message}"),
        (Some(kind), None) => bail!("monitor failed ({kind:?})"),
        _ => {
            info!(
                "Session {session_id} finished: {} tick(s), {} entr(ies) written",
                last.ticks, last.entries_written
            );
            Ok(())
        }
    }
}

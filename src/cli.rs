use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::config::MonitorConfig;

/// Meeting integrity monitor
#[derive(Debug, Parser)]
#[command(name = "meetwatch")]
#[command(about = "Launches a monitored browser on a meeting and logs integrity observations", long_about = None)]
#[command(version)]
pub struct Cli {
    /// JSON configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "meetwatch.json")]
    pub config: PathBuf,

    /// Meeting URL to open
    #[arg(short, long)]
    pub url: Option<String>,

    /// SQLite database for session records and the activity log
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Remote-debugging port (0 picks a free one)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Blocked process-name pattern; repeat to add several
    #[arg(short, long = "block")]
    pub block: Vec<String>,
}

impl Cli {
    /// File, then `MEETWATCH_*` variables, then flags.
    pub fn load_config(&self) -> Result<MonitorConfig> {
        let mut config = MonitorConfig::load(&self.config)?;
        if let Some(url) = &self.url {
            config.meeting_url = url.clone();
        }
        if let Some(db) = &self.db {
            config.database_path = db.clone();
        }
        if let Some(port) = self.port {
            config.browser.debug_port = port;
        }
        if !self.block.is_empty() {
            config.blocklist = self.block.clone();
        }
        Ok(config.validate()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        let cli = Cli::parse_from([
            "meetwatch",
            "--config",
            missing.to_str().unwrap(),
            "--url",
            "https://meet.example.com/room/42",
            "--port",
            "0",
            "--block",
            "Cluely",
            "--block",
            "interview-coder",
        ]);

        let config = cli.load_config().unwrap();
        assert_eq!(config.meeting_url, "https://meet.example.com/room/42");
        assert_eq!(config.browser.debug_port, 0);
        assert_eq!(config.blocklist, vec!["cluely", "interview-coder"]);
    }

    #[test]
    fn test_missing_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "meetwatch",
            "--config",
            dir.path().join("absent.json").to_str().unwrap(),
        ]);
        assert!(cli.load_config().is_err());
    }
}

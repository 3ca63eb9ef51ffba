use std::{
    io,
    net::TcpListener,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, info};
use tokio::{process::Command, time::Instant};

use crate::cdp::{fetch_version, DebugEndpoint};
use crate::config::BrowserConfig;
use crate::error::{MonitorError, MonitorResult};

use super::BrowserHandle;

const READY_BACKOFF_START_MS: u64 = 100;
const READY_BACKOFF_MAX_MS: u64 = 1_000;

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Starts a browser with a reachable debug endpoint.
    async fn launch(&self) -> MonitorResult<BrowserHandle>;
}

/// Known install locations, in preference order.
pub fn platform_candidates() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        let suffix = ["Google", "Chrome", "Application", "chrome.exe"];
        ["ProgramFiles", "ProgramFiles(x86)", "LocalAppData"]
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .map(|root| suffix.iter().fold(PathBuf::from(root), |path, part| path.join(part)))
            .collect()
    }

    #[cfg(target_os = "linux")]
    {
        [
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
        .iter()
        .map(PathBuf::from)
        .collect()
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        Vec::new()
    }
}

/// First existing path among `explicit` and `candidates`.
pub fn resolve_executable(
    explicit: Option<&Path>,
    candidates: &[PathBuf],
) -> MonitorResult<PathBuf> {
    let searched: Vec<PathBuf> = explicit
        .map(Path::to_path_buf)
        .into_iter()
        .chain(candidates.iter().cloned())
        .collect();

    searched
        .iter()
        .find(|path| path.is_absolute() && path.is_file())
        .cloned()
        .ok_or(MonitorError::BrowserNotFound { searched })
}

/// Confirms `port` is free, or picks one when it is `0`.
fn reserve_port(host: &str, port: u16) -> MonitorResult<u16> {
    match TcpListener::bind((host, port)) {
        Ok(listener) => listener
            .local_addr()
            .map(|addr| addr.port())
            .map_err(|_| MonitorError::PortInUse { port }),
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => Err(MonitorError::PortInUse { port }),
        Err(err) => Err(MonitorError::Config(format!(
            "cannot bind debug address {host}:{port}: {err}"
        ))),
    }
}

pub struct ChromeLauncher {
    config: BrowserConfig,
    launch_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig, launch_timeout: Duration) -> Self {
        Self {
            config,
            launch_timeout,
        }
    }

    fn candidates(&self) -> Vec<PathBuf> {
        self.config
            .candidates
            .clone()
            .unwrap_or_else(platform_candidates)
    }

    fn create_profile(&self) -> io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("meetwatch-profile-");
        match &self.config.profile_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> MonitorResult<BrowserHandle> {
        let executable = resolve_executable(self.config.executable.as_deref(), &self.candidates())?;
        let port = reserve_port(&self.config.debug_host, self.config.debug_port)?;
        let endpoint = DebugEndpoint::new(self.config.debug_host.clone(), port);

        let profile = self.create_profile().map_err(|source| MonitorError::Spawn {
            path: executable.clone(),
            source,
        })?;

        let mut command = Command::new(&executable);
        command
            .arg(format!("--remote-debugging-port={port}"))
            .arg(format!("--user-data-dir={}", profile.path().display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .args(self.config.extra_args.iter().filter(|arg| !arg.trim().is_empty()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| MonitorError::Spawn {
            path: executable.clone(),
            source,
        })?;

        let mut handle = BrowserHandle::new(child, endpoint, Some(profile));
        info!(
            "Launched {} (pid {:?}) with debug endpoint {}",
            executable.display(),
            handle.pid(),
            handle.endpoint()
        );

        match wait_until_ready(&mut handle, self.launch_timeout).await {
            Ok(browser) => {
                info!("Browser ready: {browser}");
                Ok(handle)
            }
            Err(err) => {
                handle.kill().await;
                Err(err)
            }
        }
    }
}

/// Polls `/json/version` with doubling backoff until it answers or `timeout` passes.
pub async fn wait_until_ready(handle: &mut BrowserHandle, timeout: Duration) -> MonitorResult<String> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(READY_BACKOFF_MAX_MS))
        .no_proxy()
        .build()
        .map_err(|e| MonitorError::Config(format!("http client: {e}")))?;
    let deadline = Instant::now() + timeout;
    let mut backoff = Duration::from_millis(READY_BACKOFF_START_MS);

    loop {
        if let Some(status) = handle.exit_status() {
            return Err(MonitorError::BrowserExited(status));
        }

        match fetch_version(&http, handle.endpoint()).await {
            Ok(version) => return Ok(version.browser),
            Err(err) => debug!("debug endpoint not ready yet: {err}"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(MonitorError::LaunchTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(backoff.min(deadline - now)).await;
        backoff = (backoff * 2).min(Duration::from_millis(READY_BACKOFF_MAX_MS));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_candidate_list_is_not_found() {
        let err = resolve_executable(None, &[]).unwrap_err();
        assert!(matches!(err, MonitorError::BrowserNotFound { ref searched } if searched.is_empty()));
    }

    #[test]
    fn test_first_existing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("chrome-a");
        let second = dir.path().join("chrome-b");
        std::fs::write(&second, b"").unwrap();
        std::fs::write(&first, b"").unwrap();

        let missing = dir.path().join("missing");
        let resolved =
            resolve_executable(None, &[missing, first.clone(), second]).unwrap();
        assert_eq!(resolved, first);
    }

    #[test]
    fn test_explicit_path_is_tried_first() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("custom-chrome");
        let candidate = dir.path().join("chrome");
        std::fs::write(&explicit, b"").unwrap();
        std::fs::write(&candidate, b"").unwrap();

        let resolved = resolve_executable(Some(&explicit), &[candidate]).unwrap();
        assert_eq!(resolved, explicit);
    }

    #[test]
    fn test_relative_and_directory_candidates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_executable(None, &[PathBuf::from("chrome"), dir.path().to_path_buf()])
            .unwrap_err();
        assert!(matches!(err, MonitorError::BrowserNotFound { .. }));
    }

    #[test]
    fn test_occupied_port_is_reported() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let err = reserve_port("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, MonitorError::PortInUse { port: p } if p == port));
    }

    #[test]
    fn test_port_zero_picks_free_port() {
        assert_ne!(reserve_port("127.0.0.1", 0).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_launch_without_candidates_spawns_nothing() {
        let profiles = tempfile::tempdir().unwrap();
        let launcher = ChromeLauncher::new(
            BrowserConfig {
                candidates: Some(Vec::new()),
                profile_root: Some(profiles.path().to_path_buf()),
                debug_port: 0,
                ..BrowserConfig::default()
            },
            Duration::from_secs(1),
        );

        let err = launcher.launch().await.unwrap_err();
        assert!(matches!(err, MonitorError::BrowserNotFound { .. }));
        assert_eq!(std::fs::read_dir(profiles.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreachable_endpoint_times_out_and_kills_child() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let port = reserve_port("127.0.0.1", 0).unwrap();
        let mut handle = BrowserHandle::new(child, DebugEndpoint::new("127.0.0.1", port), None);

        let err = wait_until_ready(&mut handle, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::LaunchTimeout { timeout_ms: 300 }));

        handle.kill().await;
        assert!(handle.exit_status().is_some());
    }
}

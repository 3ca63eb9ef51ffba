use std::time::Duration;

use log::{info, warn};
use tempfile::TempDir;
use tokio::process::Child;

use crate::cdp::DebugEndpoint;

/// A browser process this engine spawned, plus its disposable profile.
///
/// The profile directory is removed once the process is gone.
#[derive(Debug)]
pub struct BrowserHandle {
    child: Child,
    pid: Option<u32>,
    endpoint: DebugEndpoint,
    profile: Option<TempDir>,
}

impl BrowserHandle {
    pub fn new(child: Child, endpoint: DebugEndpoint, profile: Option<TempDir>) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            endpoint,
            profile,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn endpoint(&self) -> &DebugEndpoint {
        &self.endpoint
    }

    /// `Some(description)` once the process has exited on its own.
    pub fn exit_status(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(err) => {
                warn!("Could not poll browser process {:?}: {err}", self.pid);
                None
            }
        }
    }

    /// Asks the browser to exit, force-kills it after `grace`, and reaps it.
    pub async fn terminate(&mut self, grace: Duration) {
        if self.exit_status().is_none() {
            self.request_exit();
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => info!("Browser {:?} exited ({status})", self.pid),
                Ok(Err(err)) => {
                    warn!("Waiting on browser {:?} failed: {err}; killing", self.pid);
                    self.kill().await;
                }
                Err(_) => {
                    warn!(
                        "Browser {:?} still running after {}ms; killing",
                        self.pid,
                        grace.as_millis()
                    );
                    self.kill().await;
                }
            }
        }
        self.remove_profile();
    }

    /// SIGKILL and reap, without a grace period.
    pub async fn kill(&mut self) {
        if let Err(err) = self.child.kill().await {
            warn!("Failed to kill browser {:?}: {err}", self.pid);
        }
        self.remove_profile();
    }

    #[cfg(unix)]
    fn request_exit(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };
        if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("SIGTERM to browser {pid} failed: {err}");
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) {
        if let Err(err) = self.child.start_kill() {
            warn!("Failed to stop browser {:?}: {err}", self.pid);
        }
    }

    fn remove_profile(&mut self) {
        if let Some(profile) = self.profile.take() {
            let path = profile.path().to_path_buf();
            if let Err(err) = profile.close() {
                warn!("Failed to remove browser profile {}: {err}", path.display());
            }
        }
    }
}

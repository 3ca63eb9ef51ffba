use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::browser::BrowserHandle;
use crate::cdp::PageSession;
use crate::error::{MonitorError, MonitorResult};
use crate::models::{ActivityStatus, Observation};
use crate::scanner::ProcessScanner;
use crate::sink::LogSink;

use super::classifier::classify;
use super::state::StatusSnapshot;
use super::watchdog::{PageObservation, PageWatchdog};

// Set to false to silence per-tick logging
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Everything one tick touches. Owned by the worker for the session's lifetime.
pub(super) struct TickContext<'a> {
    pub session_id: &'a str,
    pub scanner: Arc<ProcessScanner>,
    pub watchdog: PageWatchdog,
    pub sink: &'a mut LogSink,
    pub page: &'a mut dyn PageSession,
    pub browser: &'a mut BrowserHandle,
    pub status: &'a watch::Sender<StatusSnapshot>,
    pub snapshot: &'a mut StatusSnapshot,
    pub scan_timeout: Duration,
    pub reconnect_attempts: u32,
}

/// Runs ticks until `cancel` fires (`Ok`) or a tick hits a fatal error.
pub(super) async fn poll_loop(
    mut ctx: TickContext<'_>,
    interval: Duration,
    cancel: &CancellationToken,
) -> MonitorResult<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log_info!("poll loop for session {} stopping", ctx.session_id);
                return Ok(());
            }
            _ = ticker.tick() => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                ctx.tick().await?;
            }
        }
    }
}

impl TickContext<'_> {
    async fn tick(&mut self) -> MonitorResult<()> {
        if let Some(exit) = self.browser.exit_status() {
            log_error!("browser exited mid-session ({})", exit);
            return Err(MonitorError::SessionLost { attempts: 0 });
        }

        let process_match = scan(Arc::clone(&self.scanner), self.scan_timeout).await;
        let page = self.watchdog.check(&mut *self.page).await;
        let classification = classify(process_match.as_deref(), &page);

        match classification.status {
            ActivityStatus::Safe => log_debug!("tick {}: {}", self.snapshot.ticks + 1, classification.message),
            ActivityStatus::Warning => log_warn!("tick {}: {}", self.snapshot.ticks + 1, classification.message),
            ActivityStatus::Danger => log_error!("tick {}: {}", self.snapshot.ticks + 1, classification.message),
        }

        let status = classification.status;
        let message = classification.message.clone();
        let observation = Observation {
            session_id: self.session_id.to_string(),
            observed_at: Utc::now(),
            classification,
            page_url: self.page_url(&page),
        };
        let report = self.sink.append(observation).await;
        if report.is_degraded() {
            log_warn!(
                "activity log degraded: {} pending, {} dropped this tick",
                report.pending,
                report.dropped
            );
        }

        self.snapshot.ticks += 1;
        self.snapshot.last_activity = Some(status);
        self.snapshot.entries_written = self.sink.written();
        self.snapshot.pending_entries = self.sink.pending();
        self.snapshot.lost_entries = self.sink.lost();
        let mut text = format!("{status}: {message}");
        if self.snapshot.has_log_loss() {
            text.push_str(&format!(" (log loss: {})", self.snapshot.lost_entries));
        }
        self.snapshot.status_text = text;
        self.snapshot.updated_at = Utc::now();
        self.status.send_replace(self.snapshot.clone());

        if page == PageObservation::SessionUnreachable {
            return Err(MonitorError::SessionLost {
                attempts: self.reconnect_attempts,
            });
        }
        Ok(())
    }

    fn page_url(&self, page: &PageObservation) -> Option<String> {
        match page {
            PageObservation::UrlDrifted(url) => Some(url.clone()),
            _ => self.watchdog.last_url().map(str::to_string),
        }
    }
}

/// Enumeration is blocking, so it runs off the async workers.
async fn scan(scanner: Arc<ProcessScanner>, limit: Duration) -> Option<String> {
    let task = tokio::task::spawn_blocking(move || scanner.scan());
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(hit)) => hit,
        Ok(Err(err)) => {
            log_warn!("process scan worker failed: {}", err);
            None
        }
        Err(_) => {
            log_warn!(
                "process scan timed out after {}ms; treating as no match",
                limit.as_millis()
            );
            None
        }
    }
}

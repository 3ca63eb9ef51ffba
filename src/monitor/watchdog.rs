use crate::cdp::PageSession;
use crate::error::MonitorError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageObservation {
    Normal,
    NoPagesOpen,
    UrlDrifted(String),
    /// Page queries kept failing past the threshold.
    SessionUnreachable,
}

/// Page-level anomaly check, run once per tick.
///
/// A failed query is read as `Normal` until `failure_threshold` of them occur
/// back to back. Any successful check resets the run.
pub struct PageWatchdog {
    prefix: String,
    failure_threshold: u32,
    consecutive_failures: u32,
    last_url: Option<String>,
}

impl PageWatchdog {
    pub fn new(prefix: impl Into<String>, failure_threshold: u32) -> Self {
        Self {
            prefix: prefix.into(),
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: 0,
            last_url: None,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// URL read by the latest check, if that check got one.
    pub fn last_url(&self) -> Option<&str> {
        self.last_url.as_deref()
    }

    pub async fn check(&mut self, session: &mut dyn PageSession) -> PageObservation {
        self.last_url = None;
        let counted = session.page_count().await;
        let pages = match counted {
            Ok(count) => count,
            Err(err) => return self.record_failure(session, err).await,
        };
        if pages == 0 {
            self.consecutive_failures = 0;
            return PageObservation::NoPagesOpen;
        }

        let queried = session.current_url().await;
        let url = match queried {
            Ok(url) => url,
            Err(err) => return self.record_failure(session, err).await,
        };
        self.consecutive_failures = 0;

        // Title is only for the debug trace; skip the extra round-trip otherwise.
        if ENABLE_LOGS && log::log_enabled!(log::Level::Debug) {
            let title = session.current_title().await.unwrap_or_default();
            log_debug!("{} | {}", url, title);
        }

        self.last_url = Some(url.clone());
        if url.starts_with(&self.prefix) {
            PageObservation::Normal
        } else {
            PageObservation::UrlDrifted(url)
        }
    }

    async fn record_failure(
        &mut self,
        session: &mut dyn PageSession,
        err: MonitorError,
    ) -> PageObservation {
        // Reconnects are already exhausted; no point counting further.
        if matches!(err, MonitorError::SessionLost { .. }) {
            log_warn!("page session lost: {}", err);
            self.consecutive_failures = self.failure_threshold;
            return PageObservation::SessionUnreachable;
        }

        self.consecutive_failures += 1;
        let endpoint = if session.is_alive().await { "up" } else { "down" };
        log_warn!(
            "page query failed ({}/{}, endpoint {}): {}",
            self.consecutive_failures,
            self.failure_threshold,
            endpoint,
            err
        );
        if self.consecutive_failures >= self.failure_threshold {
            PageObservation::SessionUnreachable
        } else {
            PageObservation::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;

    use super::*;
    use crate::error::MonitorResult;

    const MEETING: &str = "https://app.zoom.us/wc/6810523567/join";

    /// Replays scripted `current_url` results; page count is fixed.
    struct ScriptedPage {
        pages: usize,
        urls: VecDeque<MonitorResult<String>>,
        title_queries: usize,
    }

    impl ScriptedPage {
        fn new(pages: usize, urls: Vec<MonitorResult<String>>) -> Self {
            Self {
                pages,
                urls: urls.into(),
                title_queries: 0,
            }
        }
    }

    #[async_trait]
    impl PageSession for ScriptedPage {
        async fn page_count(&mut self) -> MonitorResult<usize> {
            Ok(self.pages)
        }

        async fn current_url(&mut self) -> MonitorResult<String> {
            self.urls
                .pop_front()
                .unwrap_or_else(|| Ok(MEETING.to_string()))
        }

        async fn current_title(&mut self) -> MonitorResult<String> {
            self.title_queries += 1;
            Ok("Zoom".into())
        }

        async fn is_alive(&mut self) -> bool {
            true
        }

        async fn close(&mut self) {}
    }

    fn transient() -> MonitorResult<String> {
        Err(MonitorError::PageQueryTransient("timed out".into()))
    }

    #[tokio::test]
    async fn test_meeting_url_is_normal() {
        let mut watchdog = PageWatchdog::new(MEETING, 3);
        let url = format!("{MEETING}?pwd=abc");
        let mut page = ScriptedPage::new(1, vec![Ok(url.clone())]);
        assert_eq!(watchdog.check(&mut page).await, PageObservation::Normal);
        assert_eq!(watchdog.last_url(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn test_other_url_is_drift() {
        let mut watchdog = PageWatchdog::new(MEETING, 3);
        let mut page = ScriptedPage::new(1, vec![Ok("https://example.com".into())]);
        assert_eq!(
            watchdog.check(&mut page).await,
            PageObservation::UrlDrifted("https://example.com".into())
        );
    }

    #[tokio::test]
    async fn test_zero_pages_reported() {
        let mut watchdog = PageWatchdog::new(MEETING, 3);
        let mut page = ScriptedPage::new(0, vec![]);
        assert_eq!(watchdog.check(&mut page).await, PageObservation::NoPagesOpen);
    }

    #[tokio::test]
    async fn test_single_failure_is_absorbed_and_reset() {
        let mut watchdog = PageWatchdog::new(MEETING, 2);
        let mut page = ScriptedPage::new(1, vec![transient(), Ok(MEETING.into()), transient()]);

        assert_eq!(watchdog.check(&mut page).await, PageObservation::Normal);
        assert_eq!(watchdog.consecutive_failures(), 1);
        assert_eq!(watchdog.check(&mut page).await, PageObservation::Normal);
        assert_eq!(watchdog.consecutive_failures(), 0);
        assert_eq!(watchdog.check(&mut page).await, PageObservation::Normal);
    }

    #[tokio::test]
    async fn test_failure_run_past_threshold_is_unreachable() {
        let mut watchdog = PageWatchdog::new(MEETING, 3);
        let mut page = ScriptedPage::new(1, vec![transient(), transient(), transient()]);

        assert_eq!(watchdog.check(&mut page).await, PageObservation::Normal);
        assert_eq!(watchdog.check(&mut page).await, PageObservation::Normal);
        assert_eq!(
            watchdog.check(&mut page).await,
            PageObservation::SessionUnreachable
        );
    }

    #[tokio::test]
    async fn test_session_lost_is_unreachable_immediately() {
        let mut watchdog = PageWatchdog::new(MEETING, 5);
        let mut page = ScriptedPage::new(1, vec![Err(MonitorError::SessionLost { attempts: 3 })]);
        assert_eq!(
            watchdog.check(&mut page).await,
            PageObservation::SessionUnreachable
        );
    }

    #[tokio::test]
    async fn test_title_not_queried_without_debug_logging() {
        // No logger is installed in unit tests, so debug is disabled.
        let mut watchdog = PageWatchdog::new(MEETING, 3);
        let mut page = ScriptedPage::new(1, vec![]);
        for _ in 0..3 {
            assert_eq!(watchdog.check(&mut page).await, PageObservation::Normal);
        }
        assert_eq!(page.title_queries, 0);
    }
}

use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use sysinfo::System;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    browser::{BrowserHandle, BrowserLauncher, ChromeLauncher},
    cdp::{CdpConnector, PageSession, SessionConnector, SessionOptions},
    config::MonitorConfig,
    db::Database,
    error::{MonitorError, MonitorResult},
    models::MonitorSession,
    scanner::{Blocklist, ProcessScanner, ProcessSource, SysinfoProcessSource},
    sink::{ActivityStore, LogSink, SinkOptions},
};

use super::loop_worker::{poll_loop, TickContext};
use super::state::{MonitorState, StatusSnapshot};
use super::watchdog::PageWatchdog;

/// Receives every published status snapshot, in order.
pub trait StatusObserver: Send + Sync {
    fn on_status(&self, snapshot: &StatusSnapshot);
}

/// The collaborators a controller drives. Swapped for fakes in tests.
#[derive(Clone)]
pub struct MonitorDeps {
    pub launcher: Arc<dyn BrowserLauncher>,
    pub connector: Arc<dyn SessionConnector>,
    pub processes: Arc<dyn ProcessSource>,
    pub store: Arc<dyn ActivityStore>,
}

impl MonitorDeps {
    pub fn production(config: &MonitorConfig, db: Database) -> Self {
        Self {
            launcher: Arc::new(ChromeLauncher::new(
                config.browser.clone(),
                config.timing.launch_timeout(),
            )),
            connector: Arc::new(CdpConnector::new(SessionOptions::from(&config.timing))),
            processes: Arc::new(SysinfoProcessSource::new()),
            store: Arc::new(db),
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

struct ControllerInner {
    config: Arc<MonitorConfig>,
    deps: MonitorDeps,
    status: Arc<watch::Sender<StatusSnapshot>>,
    worker: Mutex<Option<Worker>>,
}

/// Start/stop state machine for one monitoring run at a time.
///
/// `start` and `stop` only request transitions; the session itself runs on a
/// spawned worker, which is the sole writer of the status channel while it
/// is alive.
#[derive(Clone)]
pub struct MonitorController {
    inner: Arc<ControllerInner>,
}

impl MonitorController {
    /// Validates `config` up front so a session never starts on bad timings.
    pub fn new(config: MonitorConfig, deps: MonitorDeps) -> MonitorResult<Self> {
        let config = config.validate()?;
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        Ok(Self {
            inner: Arc::new(ControllerInner {
                config: Arc::new(config),
                deps,
                status: Arc::new(status_tx),
                worker: Mutex::new(None),
            }),
        })
    }

    pub fn status(&self) -> StatusSnapshot {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.status.subscribe()
    }

    /// Forwards every status change to `observer` until the controller is dropped.
    pub fn observe(&self, observer: Arc<dyn StatusObserver>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                observer.on_status(&snapshot);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Begins a session and returns its id. Only valid from `Idle`.
    pub async fn start(&self) -> MonitorResult<String> {
        let mut worker = self.inner.worker.lock().await;
        let state = self.inner.status.borrow().state;
        if state != MonitorState::Idle {
            return Err(MonitorError::InvalidState {
                state: state.to_string(),
            });
        }

        let session_id = Uuid::new_v4().to_string();
        self.inner
            .status
            .send_replace(StatusSnapshot::starting(session_id.clone()));
        info!("Monitor session {session_id} starting");

        let cancel = CancellationToken::new();
        let run = SessionRun {
            session_id: session_id.clone(),
            config: Arc::clone(&self.inner.config),
            deps: self.inner.deps.clone(),
            status: Arc::clone(&self.inner.status),
            cancel: cancel.clone(),
        };
        let handle = spawn_supervised(run);

        *worker = Some(Worker { handle, cancel });
        Ok(session_id)
    }

    /// Requests a stop; observed at the next tick or after the current start step.
    pub async fn stop(&self) {
        let worker = self.inner.worker.lock().await;
        match worker.as_ref() {
            Some(worker) if !worker.cancel.is_cancelled() => {
                info!("Stop requested");
                worker.cancel.cancel();
            }
            _ => {}
        }
    }

    /// Resolves once the current session is `Stopped` or `Error`, with teardown done.
    /// Returns immediately when no session has been started.
    pub async fn wait_for_terminal(&self) -> StatusSnapshot {
        let mut rx = self.subscribe();
        let result = rx
            .wait_for(|snapshot| snapshot.state == MonitorState::Idle || snapshot.state.is_terminal())
            .await
            .map(|snapshot| snapshot.clone());
        match result {
            Ok(snapshot) => snapshot,
            Err(_) => self.status(),
        }
    }

    /// Returns a finished controller to `Idle` so it can start again.
    pub async fn reset(&self) -> MonitorResult<()> {
        let mut worker = self.inner.worker.lock().await;
        let state = self.inner.status.borrow().state;
        if state.is_active() {
            return Err(MonitorError::InvalidState {
                state: state.to_string(),
            });
        }

        if let Some(finished) = worker.take() {
            if let Err(err) = finished.handle.await {
                error!("Monitor worker did not exit cleanly: {err}");
            }
        }
        self.inner.status.send_replace(StatusSnapshot::default());
        Ok(())
    }
}

/// Runs the session on its own task and turns a panic into a terminal `Error`.
/// The browser child is killed on drop, so an unwinding worker still reaps it.
fn spawn_supervised(run: SessionRun) -> JoinHandle<()> {
    let status = Arc::clone(&run.status);
    let store = Arc::clone(&run.deps.store);
    let session_id = run.session_id.clone();

    tokio::spawn(async move {
        let joined = tokio::spawn(run.execute()).await;
        let Err(join_err) = joined else {
            return;
        };
        error!("Monitor worker for session {session_id} panicked: {join_err}");

        let failure = MonitorError::WorkerFailed(join_err.to_string());
        if let Err(err) = store
            .close_session(
                &session_id,
                MonitorState::Error,
                Some(failure.to_string()),
                Utc::now(),
            )
            .await
        {
            warn!("Failed to close session record {session_id}: {err:#}");
        }

        let mut snapshot = status.borrow().clone();
        if !snapshot.state.is_terminal() {
            snapshot.fail(&failure);
            status.send_replace(snapshot);
        }
    })
}

/// One session, executed on the worker task.
struct SessionRun {
    session_id: String,
    config: Arc<MonitorConfig>,
    deps: MonitorDeps,
    status: Arc<watch::Sender<StatusSnapshot>>,
    cancel: CancellationToken,
}

impl SessionRun {
    async fn execute(self) {
        let mut snapshot = self.status.borrow().clone();
        self.open_record().await;

        let mut sink = LogSink::new(
            Arc::clone(&self.deps.store),
            SinkOptions::from(&self.config.sink),
        );

        let mut browser: Option<BrowserHandle> = None;
        let mut page: Option<Box<dyn PageSession>> = None;
        let outcome = self
            .run(&mut snapshot, &mut sink, &mut browser, &mut page)
            .await;

        match &outcome {
            Ok(()) => self.publish(&mut snapshot, MonitorState::Stopping, "Stopping"),
            Err(err) => {
                error!("Monitor session {} failed: {err}", self.session_id);
                snapshot.status_text = format!("Shutting down after failure: {err}");
                self.status.send_replace(snapshot.clone());
            }
        }

        self.teardown(&mut snapshot, &mut sink, browser, page).await;

        let failure = match outcome {
            Ok(()) => {
                snapshot.transition(MonitorState::Stopped, "Stopped");
                None
            }
            Err(err) => {
                snapshot.fail(&err);
                Some(err.to_string())
            }
        };
        // Waiters may exit as soon as they see the terminal state, so the
        // record is closed first.
        self.close_record(snapshot.state, failure).await;
        info!(
            "Monitor session {} ended {} after {} tick(s), {} entr(ies) written, {} lost",
            self.session_id,
            snapshot.state,
            snapshot.ticks,
            snapshot.entries_written,
            snapshot.lost_entries
        );
        self.status.send_replace(snapshot);
    }

    /// Launch, attach, then poll. `Ok` means a requested stop.
    async fn run(
        &self,
        snapshot: &mut StatusSnapshot,
        sink: &mut LogSink,
        browser: &mut Option<BrowserHandle>,
        page: &mut Option<Box<dyn PageSession>>,
    ) -> MonitorResult<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let handle = browser.insert(self.deps.launcher.launch().await?);
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        snapshot.status_text = "Opening meeting page".into();
        self.status.send_replace(snapshot.clone());
        let endpoint = handle.endpoint().clone();
        let session = page.insert(
            self.deps
                .connector
                .attach(&endpoint, &self.config.meeting_url)
                .await?,
        );
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.publish(snapshot, MonitorState::Running, "Monitoring");
        if let Err(err) = self
            .deps
            .store
            .update_session_state(&self.session_id, MonitorState::Running)
            .await
        {
            warn!("Failed to record running state for {}: {err:#}", self.session_id);
        }

        let scanner = Arc::new(ProcessScanner::new(
            Arc::clone(&self.deps.processes),
            Blocklist::new(&self.config.blocklist),
        ));
        let timing = &self.config.timing;
        let ctx = TickContext {
            session_id: &self.session_id,
            scanner,
            watchdog: PageWatchdog::new(self.config.drift_prefix(), timing.failure_threshold),
            sink,
            page: &mut **session,
            browser: handle,
            status: self.status.as_ref(),
            snapshot,
            scan_timeout: timing.query_timeout(),
            reconnect_attempts: timing.reconnect_attempts,
        };
        poll_loop(ctx, timing.poll_interval(), &self.cancel).await
    }

    /// Same path for stop and failure: session, then browser, then the sink backlog.
    async fn teardown(
        &self,
        snapshot: &mut StatusSnapshot,
        sink: &mut LogSink,
        browser: Option<BrowserHandle>,
        page: Option<Box<dyn PageSession>>,
    ) {
        if let Some(mut page) = page {
            page.close().await;
        }
        if let Some(mut browser) = browser {
            browser.terminate(self.config.timing.shutdown_grace()).await;
        }

        let flushed = sink.close().await;
        if !flushed.written.is_empty() {
            info!("Flushed {} backlog entr(ies) on shutdown", flushed.written.len());
        }
        snapshot.entries_written = sink.written();
        snapshot.pending_entries = sink.pending();
        snapshot.lost_entries = sink.lost();
    }

    fn publish(&self, snapshot: &mut StatusSnapshot, state: MonitorState, text: &str) {
        info!("Monitor session {}: {} -> {}", self.session_id, snapshot.state, state);
        snapshot.transition(state, text);
        self.status.send_replace(snapshot.clone());
    }

    async fn open_record(&self) {
        let record = MonitorSession {
            id: self.session_id.clone(),
            started_at: Utc::now(),
            ended_at: None,
            final_state: MonitorState::Starting,
            failure: None,
            meeting_url: self.config.meeting_url.clone(),
            user_id: self.config.user_id.clone(),
            meeting_id: self.config.meeting_id.clone(),
            fingerprint: System::host_name(),
        };
        if let Err(err) = self.deps.store.open_session(&record).await {
            warn!("Failed to record session {}: {err:#}", self.session_id);
        }
    }

    async fn close_record(&self, state: MonitorState, failure: Option<String>) {
        if let Err(err) = self
            .deps
            .store
            .close_session(&self.session_id, state, failure, Utc::now())
            .await
        {
            warn!("Failed to close session record {}: {err:#}", self.session_id);
        }
    }
}

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::config::TimingConfig;
use crate::error::{MonitorError, MonitorResult};

use super::client::CdpClient;
use super::http::{fetch_version, list_pages, new_page, DebugEndpoint, TargetInfo};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const LOAD_POLL_INTERVAL_MS: u64 = 200;

/// Query surface of an attached meeting page.
#[async_trait]
pub trait PageSession: Send {
    /// Open page targets in the browser.
    async fn page_count(&mut self) -> MonitorResult<usize>;
    async fn current_url(&mut self) -> MonitorResult<String>;
    async fn current_title(&mut self) -> MonitorResult<String>;
    async fn is_alive(&mut self) -> bool;
    async fn close(&mut self);
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn attach(
        &self,
        endpoint: &DebugEndpoint,
        target_url: &str,
    ) -> MonitorResult<Box<dyn PageSession>>;
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub navigation_timeout: Duration,
    pub query_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
}

impl From<&TimingConfig> for SessionOptions {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            navigation_timeout: timing.navigation_timeout(),
            query_timeout: timing.query_timeout(),
            reconnect_attempts: timing.reconnect_attempts,
            reconnect_backoff: timing.reconnect_backoff(),
        }
    }
}

/// A DevTools-protocol session on the first page of a browser.
pub struct CdpSession {
    endpoint: DebugEndpoint,
    http: reqwest::Client,
    client: Option<CdpClient>,
    target_id: String,
    options: SessionOptions,
}

impl CdpSession {
    /// Takes the first open page (or opens one), navigates it to `target_url`,
    /// and waits for the load to complete.
    pub async fn attach(
        endpoint: &DebugEndpoint,
        target_url: &str,
        options: SessionOptions,
    ) -> MonitorResult<Self> {
        let navigation_failed = |reason: String| MonitorError::NavigationFailed {
            url: target_url.to_string(),
            reason,
        };

        // The debug endpoint is always local; never route it through a proxy.
        let http = reqwest::Client::builder()
            .timeout(options.query_timeout)
            .no_proxy()
            .build()
            .map_err(|e| MonitorError::Config(format!("http client: {e}")))?;

        let target = acquire_page(&http, endpoint)
            .await
            .map_err(|e| navigation_failed(format!("no page target: {e}")))?;
        let ws_url = target
            .ws_url
            .clone()
            .ok_or_else(|| navigation_failed(format!("page {} has no debugger url", target.id)))?;
        let client = CdpClient::connect(&ws_url)
            .await
            .map_err(|e| navigation_failed(e.to_string()))?;

        log_info!("Attached to page {} ({}) on {}", target.id, target.url, endpoint);

        let mut session = Self {
            endpoint: endpoint.clone(),
            http,
            client: Some(client),
            target_id: target.id,
            options,
        };

        let navigation_timeout = session.options.navigation_timeout;
        let outcome = timeout(navigation_timeout, session.navigate(target_url)).await;
        match outcome {
            Ok(Ok(())) => {
                log_info!("Navigated to meeting URL");
                Ok(session)
            }
            Ok(Err(err)) => {
                session.close().await;
                Err(err)
            }
            Err(_) => {
                session.close().await;
                Err(MonitorError::NavigationTimeout {
                    url: target_url.to_string(),
                    timeout_ms: navigation_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn navigate(&mut self, url: &str) -> MonitorResult<()> {
        let failed = |reason: String| MonitorError::NavigationFailed {
            url: url.to_string(),
            reason,
        };
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| failed("not connected".into()))?;

        client
            .call("Page.enable", serde_json::json!({}))
            .await
            .map_err(|e| failed(e.to_string()))?;
        let result = client
            .call("Page.navigate", serde_json::json!({ "url": url }))
            .await
            .map_err(|e| failed(e.to_string()))?;
        if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
            return Err(failed(error_text.to_string()));
        }

        // Bounded by the caller's navigation timeout.
        loop {
            match client.evaluate_string("document.readyState").await {
                Ok(state) if state == "complete" => {
                    let href = client
                        .evaluate_string("window.location.href")
                        .await
                        .unwrap_or_default();
                    if href != "about:blank" {
                        return Ok(());
                    }
                }
                Ok(_) => {}
                Err(err) if err.is_connection_loss() => return Err(failed(err.to_string())),
                // Execution context swapped out mid-navigation
                Err(err) => log_debug!("readyState check failed during load: {err}"),
            }
            tokio::time::sleep(Duration::from_millis(LOAD_POLL_INTERVAL_MS)).await;
        }
    }

    async fn reconnect(&mut self) -> MonitorResult<()> {
        let attempts = self.options.reconnect_attempts;
        for attempt in 1..=attempts {
            let connected =
                connect_first_page(&self.http, &self.endpoint, self.options.query_timeout).await;
            match connected {
                Ok((client, target)) => {
                    log_info!(
                        "Reconnected to page {} on attempt {}/{}",
                        target.id,
                        attempt,
                        attempts
                    );
                    self.client = Some(client);
                    self.target_id = target.id;
                    return Ok(());
                }
                Err(err) => {
                    log_warn!("Reconnect attempt {}/{} failed: {}", attempt, attempts, err);
                    if attempt < attempts {
                        tokio::time::sleep(self.options.reconnect_backoff * attempt).await;
                    }
                }
            }
        }
        Err(MonitorError::SessionLost { attempts })
    }

    async fn evaluate(&mut self, expression: &str) -> MonitorResult<String> {
        for round in 0..2 {
            if self.client.is_none() {
                self.reconnect().await?;
            }
            let Some(client) = self.client.as_mut() else {
                continue;
            };

            let outcome =
                timeout(self.options.query_timeout, client.evaluate_string(expression)).await;
            match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if err.is_connection_loss() && round == 0 => {
                    log_warn!(
                        "Debug connection to page {} dropped ({}), reconnecting",
                        self.target_id,
                        err
                    );
                    self.client = None;
                }
                Ok(Err(err)) => {
                    if err.is_connection_loss() {
                        self.client = None;
                    }
                    return Err(MonitorError::PageQueryTransient(err.to_string()));
                }
                Err(_) => {
                    return Err(MonitorError::PageQueryTransient(format!(
                        "`{expression}` timed out after {}ms",
                        self.options.query_timeout.as_millis()
                    )))
                }
            }
        }
        Err(MonitorError::PageQueryTransient(
            "connection dropped again after reconnect".into(),
        ))
    }
}

async fn connect_first_page(
    http: &reqwest::Client,
    endpoint: &DebugEndpoint,
    connect_timeout: Duration,
) -> Result<(CdpClient, TargetInfo), String> {
    let pages = list_pages(http, endpoint).await.map_err(|e| e.to_string())?;
    let target = pages
        .into_iter()
        .find(|page| page.ws_url.is_some())
        .ok_or_else(|| "no attachable page".to_string())?;
    let ws_url = target.ws_url.clone().unwrap_or_default();
    let client = timeout(connect_timeout, CdpClient::connect(&ws_url))
        .await
        .map_err(|_| "websocket connect timed out".to_string())?
        .map_err(|e| e.to_string())?;
    Ok((client, target))
}

async fn acquire_page(
    http: &reqwest::Client,
    endpoint: &DebugEndpoint,
) -> reqwest::Result<TargetInfo> {
    let pages = list_pages(http, endpoint).await?;
    match pages.into_iter().find(|page| page.ws_url.is_some()) {
        Some(page) => Ok(page),
        None => new_page(http, endpoint).await,
    }
}

#[async_trait]
impl PageSession for CdpSession {
    async fn page_count(&mut self) -> MonitorResult<usize> {
        list_pages(&self.http, &self.endpoint)
            .await
            .map(|pages| pages.len())
            .map_err(|e| MonitorError::PageQueryTransient(format!("page list: {e}")))
    }

    async fn current_url(&mut self) -> MonitorResult<String> {
        self.evaluate("window.location.href").await
    }

    async fn current_title(&mut self) -> MonitorResult<String> {
        self.evaluate("document.title").await
    }

    async fn is_alive(&mut self) -> bool {
        fetch_version(&self.http, &self.endpoint).await.is_ok()
    }

    async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if timeout(self.options.query_timeout, client.close()).await.is_err() {
                log_warn!("Debug connection close timed out");
            }
        }
    }
}

pub struct CdpConnector {
    options: SessionOptions,
}

impl CdpConnector {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl SessionConnector for CdpConnector {
    async fn attach(
        &self,
        endpoint: &DebugEndpoint,
        target_url: &str,
    ) -> MonitorResult<Box<dyn PageSession>> {
        let session = CdpSession::attach(endpoint, target_url, self.options.clone()).await?;
        Ok(Box::new(session))
    }
}

//! The browser's JSON discovery endpoints (`/json/version`, `/json/list`, `/json/new`).

use std::fmt;

use serde::Deserialize;

/// Host/port of a browser's remote-debugging interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEndpoint {
    pub host: String,
    pub port: u16,
}

impl DebugEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

impl fmt::Display for DebugEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser", default)]
    pub browser: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_url: Option<String>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.kind == "page"
    }
}

pub async fn fetch_version(
    http: &reqwest::Client,
    endpoint: &DebugEndpoint,
) -> reqwest::Result<BrowserVersion> {
    http.get(endpoint.http_url("/json/version"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}

/// Page targets in the browser's own order (most recently focused first).
pub async fn list_pages(
    http: &reqwest::Client,
    endpoint: &DebugEndpoint,
) -> reqwest::Result<Vec<TargetInfo>> {
    let targets: Vec<TargetInfo> = http
        .get(endpoint.http_url("/json/list"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(targets.into_iter().filter(TargetInfo::is_page).collect())
}

/// Opens a blank page. Current Chrome only accepts PUT here.
pub async fn new_page(
    http: &reqwest::Client,
    endpoint: &DebugEndpoint,
) -> reqwest::Result<TargetInfo> {
    http.put(endpoint.http_url("/json/new?about:blank"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}

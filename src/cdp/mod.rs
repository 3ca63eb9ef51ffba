//! DevTools remote-debugging protocol: endpoint discovery, the websocket
//! client, and the page session the monitor queries every tick.

mod client;
mod http;
mod session;
#[cfg(test)]
mod test_support;

pub use client::{CdpClient, CdpError};
pub use http::{fetch_version, list_pages, BrowserVersion, DebugEndpoint, TargetInfo};
pub use session::{CdpConnector, CdpSession, PageSession, SessionConnector, SessionOptions};

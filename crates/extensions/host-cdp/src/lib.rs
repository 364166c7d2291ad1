//! # tabpilot CDP host
//!
//! A [`BrowserHost`](tabpilot_protocols::BrowserHost) backed by the Chrome
//! DevTools Protocol. One browser-level WebSocket carries flattened page
//! sessions; target discovery events become
//! [`HostEvent`](tabpilot_protocols::HostEvent)s.
//!
//! ## Usage
//!
//! 1. Start Chrome with remote debugging:
//!    ```bash
//!    chrome --remote-debugging-port=9222
//!    ```
//!
//! 2. Connect:
//!    ```rust,ignore
//!    let host = CdpHost::connect(&config.host).await?;
//!    ```

mod connection;
mod error;
mod host;
mod input;
mod protocol;
mod sessions;

#[cfg(test)]
mod fake_browser;

pub use connection::CdpConnection;
pub use error::CdpError;
pub use host::CdpHost;
pub use protocol::{BrowserVersion, CdpEvent, CdpTargetInfo};

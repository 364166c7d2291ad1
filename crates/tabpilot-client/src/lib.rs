//! # tabpilot client
//!
//! Orchestrator side of a tabpilot session: a typed command API over the
//! correlated channel, the last-known session state, response formatting
//! and an artifact store, plus the WebSocket endpoint agents connect to.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use tabpilot_client::{listener, PilotClient};
//!
//! let client = Arc::new(PilotClient::from_config(&config.relay));
//! listener::serve(client.clone(), &config.relay).await?;
//! client.wait_for_agent(Duration::from_secs(30)).await?;
//! client.navigate("https://example.com").await?;
//! ```

mod artifacts;
mod client;
mod format;
pub mod listener;
mod state;

pub use artifacts::{ArtifactError, ArtifactStore};
pub use client::PilotClient;
pub use format::{decode_data_uri, format_response, ContentBlock};
pub use state::SessionState;

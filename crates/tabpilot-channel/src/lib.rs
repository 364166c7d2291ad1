//! Correlated request/response channel.
//!
//! Every outbound request gets a monotonic correlation id and a pending entry.
//! Each pending entry is completed exactly once: by the matching response, by
//! its timeout, or by channel teardown.
//!
//! ```text
//! send() ──► pending[id] ──► transport ──► agent
//!                 ▲                          │
//!                 └──── handle_inbound() ◄───┘
//! ```

mod correlated;
mod pending;

pub use correlated::{CorrelatedChannel, InboundOutcome, Ticket};
pub use pending::PendingEntry;

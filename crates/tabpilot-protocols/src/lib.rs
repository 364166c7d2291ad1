//! # tabpilot protocols
//!
//! Shared definitions for the orchestrator and the in-browser agent.
//! Contains only types and traits - no implementations.
//!
//! - [`Envelope`] / [`AgentResponse`] - messages exchanged over the relay
//! - [`Command`] - the typed command model parsed from an envelope
//! - [`BrowserHost`] - the instrumentation channel the agent drives
//! - [`PilotError`] - the error taxonomy shared by every crate

pub mod command;
pub mod error;
pub mod host;
pub mod message;

pub use command::{BatchOperation, Command, Coordinate, KeyCombination, ScrollDirection};
pub use error::{ErrorKind, PilotError, Result};
pub use host::{BrowserHost, Clip, HostEvent, InputOp, TargetInfo, TargetKind, Viewport};
pub use message::{
    AgentResponse, BatchStepReport, Envelope, MessageSource, ResponseStatus, TabSummary,
    VIEWPORT_SYNC,
};

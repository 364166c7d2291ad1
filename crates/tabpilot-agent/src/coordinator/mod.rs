//! Target lifecycle coordinator.
//!
//! Per target: `Idle → NavigationPending → Stabilizing →
//! AttachingInstrumentation → Capturing → Completed → Idle`.
//!
//! Commands that may open a new context (click, key press, navigating key
//! combinations) race a short timer against target activation signals.
//! Everything else takes the simple path. Both end in the shared completion
//! stages, so every command yields the same normalized response shape.

mod completion;
mod coordinator_commands;
mod coordinator_core;
mod coordinator_tabs;
mod detection;
mod navigation;

pub use coordinator_core::Coordinator;
pub(crate) use completion::{CaptureMode, Freshness, TabOutcome};

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;

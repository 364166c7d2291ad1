//! # tabpilot agent
//!
//! The browser-resident half of tabpilot. Commands arrive from the
//! orchestrator, run through the [`Coordinator`] state machine and come back
//! as normalized [`AgentResponse`](tabpilot_protocols::AgentResponse)s.
//!
//! ```text
//! runtime ──► Coordinator ──► InstrumentationSessionManager ──► BrowserHost
//!                 │       └──► StabilityDetector ───────────────┘
//!                 └──► TargetRegistry (targets, active pointer, leases)
//! ```

mod batch;
mod coordinator;
mod registry;
mod runtime;
mod scripts;
mod session;
mod stability;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use coordinator::Coordinator;
pub use registry::{Lease, TargetProcessingState, TargetRecord, TargetRegistry};
pub use runtime::{serve_connection, AgentRuntime};
pub use scripts::{PAGE_HTML, STABILITY_SAMPLE, VIEWPORT_SIZE};
pub use session::{AttachStatus, InstrumentationSessionManager};
pub use stability::{StabilityDetector, StabilityOutcome};

//! Pending request bookkeeping.

use std::collections::HashMap;
use std::time::Instant;

use tabpilot_protocols::{AgentResponse, PilotError};
use tokio::sync::oneshot;

pub(crate) type Completion = oneshot::Sender<Result<AgentResponse, PilotError>>;

/// A request waiting for its response.
pub struct PendingEntry {
    pub command: String,
    pub issued_at: Instant,
    pub(crate) tx: Completion,
}

impl PendingEntry {
    pub(crate) fn new(command: impl Into<String>, tx: Completion) -> Self {
        Self {
            command: command.into(),
            issued_at: Instant::now(),
            tx,
        }
    }

    /// Deliver the outcome. A dropped receiver means the caller gave up.
    pub(crate) fn complete(self, outcome: Result<AgentResponse, PilotError>) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

#[derive(Default)]
pub(crate) struct PendingMap {
    entries: HashMap<u64, PendingEntry>,
}

impl PendingMap {
    pub(crate) fn insert(&mut self, id: u64, entry: PendingEntry) {
        self.entries.insert(id, entry);
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<PendingEntry> {
        self.entries.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Most recent entry a message without correlation id may complete.
    pub(crate) fn newest_matching(&self, message_command: &str) -> Option<u64> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.command == message_command)
            .map(|(id, _)| *id)
            .max()
    }

    pub(crate) fn drain(&mut self) -> Vec<(u64, PendingEntry)> {
        self.entries.drain().collect()
    }
}

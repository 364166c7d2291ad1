//! Target registry: every browsing context the agent knows about, the active
//! pointer, and per-target processing state.
//!
//! Records live in a dense vector; `index` maps target ids to slots and is
//! renumbered when a record is removed. Slot order is registration order,
//! which is also the order `listTabs` reports and `selectTab`/`closeTab`
//! indices address.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tabpilot_protocols::{TabSummary, TargetInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetProcessingState {
    Idle,
    NavigationPending,
    Stabilizing,
    AttachingInstrumentation,
    Capturing,
    Completed,
}

impl TargetProcessingState {
    pub fn is_busy(&self) -> bool {
        !matches!(self, TargetProcessingState::Idle | TargetProcessingState::Completed)
    }
}

/// Time-bounded claim held by a busy state. Once expired, the state may be
/// reclaimed back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub acquired_at: Instant,
    pub ttl: Duration,
}

impl Lease {
    pub fn new(acquired_at: Instant, ttl: Duration) -> Self {
        Self { acquired_at, ttl }
    }

    pub fn expires_at(&self) -> Instant {
        self.acquired_at + self.ttl
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

#[derive(Debug, Clone)]
pub struct TargetRecord {
    pub target_id: String,
    pub url: String,
    pub title: String,
    /// Contexts the agent is responsible for. Untracked ones are incidental
    /// and never become active.
    pub tracked: bool,
    pub state: TargetProcessingState,
    pub lease: Option<Lease>,
}

impl TargetRecord {
    fn from_info(info: &TargetInfo, tracked: bool) -> Self {
        Self {
            target_id: info.target_id.clone(),
            url: info.url.clone(),
            title: info.title.clone(),
            tracked,
            state: TargetProcessingState::Idle,
            lease: None,
        }
    }
}

pub struct TargetRegistry {
    slots: Vec<TargetRecord>,
    index: HashMap<String, usize>,
    /// Slot of the active target; always a live tracked record.
    active: Option<usize>,
    lease_ttl: Duration,
}

impl TargetRegistry {
    pub fn new(lease_ttl: Duration) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            active: None,
            lease_ttl,
        }
    }

    /// Take responsibility for a context. System contexts are refused.
    pub fn track(&mut self, info: &TargetInfo) -> bool {
        if info.is_system() {
            return false;
        }
        match self.index.get(&info.target_id) {
            Some(&slot) => {
                let record = &mut self.slots[slot];
                record.tracked = true;
                record.url = info.url.clone();
                record.title = info.title.clone();
            }
            None => self.insert(TargetRecord::from_info(info, true)),
        }
        true
    }

    /// Remember a context without taking responsibility for it.
    pub fn observe(&mut self, info: &TargetInfo) {
        if !self.index.contains_key(&info.target_id) {
            self.insert(TargetRecord::from_info(info, false));
        }
    }

    fn insert(&mut self, record: TargetRecord) {
        self.index.insert(record.target_id.clone(), self.slots.len());
        self.slots.push(record);
    }

    /// Refresh url/title of a known record.
    pub fn update(&mut self, info: &TargetInfo) {
        if let Some(record) = self.get_mut(&info.target_id) {
            record.url = info.url.clone();
            if !info.title.is_empty() {
                record.title = info.title.clone();
            }
        }
    }

    pub fn set_url(&mut self, target_id: &str, url: &str) {
        if let Some(record) = self.get_mut(target_id) {
            record.url = url.to_string();
        }
    }

    /// Forget a closed context. If it was active, the pointer moves to the
    /// tracked neighbour at the same position (or the last one).
    pub fn remove(&mut self, target_id: &str) -> Option<TargetRecord> {
        let position = self.position(target_id);
        let slot = self.index.remove(target_id)?;
        let record = self.slots.remove(slot);
        for later in self.index.values_mut().filter(|s| **s > slot) {
            *later -= 1;
        }

        if self.active == Some(slot) {
            self.active = None;
            if let Some(position) = position {
                let remaining = self.tracked_slots();
                if !remaining.is_empty() {
                    self.active = Some(remaining[position.min(remaining.len() - 1)]);
                }
            }
        } else if let Some(active) = self.active.filter(|&a| a > slot) {
            self.active = Some(active - 1);
        }
        Some(record)
    }

    pub fn get(&self, target_id: &str) -> Option<&TargetRecord> {
        self.index
            .get(target_id)
            .map(|&slot| &self.slots[slot])
    }

    fn get_mut(&mut self, target_id: &str) -> Option<&mut TargetRecord> {
        let slot = *self.index.get(target_id)?;
        self.slots.get_mut(slot)
    }

    pub fn is_tracked(&self, target_id: &str) -> bool {
        self.get(target_id).is_some_and(|r| r.tracked)
    }

    /// Point at a tracked target. Returns false for unknown or untracked ids.
    pub fn set_active(&mut self, target_id: &str) -> bool {
        match self.index.get(target_id) {
            Some(&slot) if self.slots[slot].tracked => {
                self.active = Some(slot);
                true
            }
            _ => false,
        }
    }

    pub fn active(&self) -> Option<&TargetRecord> {
        self.active.map(|slot| &self.slots[slot])
    }

    pub fn active_id(&self) -> Option<String> {
        self.active().map(|r| r.target_id.clone())
    }

    fn tracked_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, r)| r.tracked)
            .map(|(slot, _)| slot)
            .collect()
    }

    pub fn tracked(&self) -> Vec<&TargetRecord> {
        self.slots.iter().filter(|r| r.tracked).collect()
    }

    pub fn tracked_at(&self, index: usize) -> Option<&TargetRecord> {
        self.tracked().into_iter().nth(index)
    }

    /// Position of a tracked target in listing order.
    pub fn position(&self, target_id: &str) -> Option<usize> {
        self.tracked().iter().position(|r| r.target_id == target_id)
    }

    pub fn summaries(&self) -> Vec<TabSummary> {
        let active = self.active_id();
        self.tracked()
            .into_iter()
            .enumerate()
            .map(|(index, r)| TabSummary {
                index,
                tab_id: r.target_id.clone(),
                url: r.url.clone(),
                title: r.title.clone(),
                active: active.as_deref() == Some(r.target_id.as_str()),
            })
            .collect()
    }

    pub fn state(&self, target_id: &str) -> Option<TargetProcessingState> {
        self.get(target_id).map(|r| r.state)
    }

    /// Move a target to `state`. Entering a busy state takes a lease if none
    /// is held; leaving it releases the lease.
    pub fn set_state(&mut self, target_id: &str, state: TargetProcessingState, now: Instant) {
        let ttl = self.lease_ttl;
        if let Some(record) = self.get_mut(target_id) {
            record.state = state;
            if state.is_busy() {
                record.lease.get_or_insert(Lease::new(now, ttl));
            } else {
                record.lease = None;
            }
        }
    }

    /// Administratively return a target to `Idle`. Returns whether it was busy.
    pub fn reclaim(&mut self, target_id: &str) -> bool {
        match self.get_mut(target_id) {
            Some(record) if record.state.is_busy() => {
                record.state = TargetProcessingState::Idle;
                record.lease = None;
                true
            }
            _ => false,
        }
    }

    /// Reclaim every target whose lease has expired at `now`.
    pub fn reclaim_expired(&mut self, now: Instant) -> Vec<String> {
        let mut reclaimed = Vec::new();
        for record in self.slots.iter_mut() {
            if record.lease.is_some_and(|lease| lease.is_expired(now)) {
                record.state = TargetProcessingState::Idle;
                record.lease = None;
                reclaimed.push(record.target_id.clone());
            }
        }
        reclaimed
    }

    /// Return every busy target to `Idle`.
    pub fn reset_busy(&mut self) -> usize {
        let mut count = 0;
        for record in self.slots.iter_mut() {
            if record.state.is_busy() {
                record.state = TargetProcessingState::Idle;
                record.lease = None;
                count += 1;
            }
        }
        count
    }

    /// Forget everything, including the active pointer.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.active = None;
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

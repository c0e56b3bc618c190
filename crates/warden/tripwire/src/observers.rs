//! Bundled tripwire observers.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::error;
use warden_types::EntityId;

use crate::error::TripwireError;
use crate::event::{TripwireEvent, TripwireKind};
use crate::TripwireObserver;

/// Records every event, in firing order.
pub struct AuditTrail {
    events: Mutex<Vec<TripwireEvent>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<TripwireEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of recorded events of `kind`.
    pub fn count(&self, kind: TripwireKind) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|ev| ev.kind == kind).count())
            .unwrap_or(0)
    }

    pub fn kinds(&self) -> Vec<TripwireKind> {
        self.events
            .lock()
            .map(|e| e.iter().map(|ev| ev.kind).collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl TripwireObserver for AuditTrail {
    fn name(&self) -> &str {
        "audit-trail"
    }

    fn on_tripwire(&self, event: &TripwireEvent) -> Result<(), TripwireError> {
        let mut events = self.events.lock().map_err(|_| TripwireError::LockPoisoned)?;
        events.push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct ResponderState {
    violations: HashMap<EntityId, u32>,
    locked_down: HashSet<EntityId>,
}

/// Counts fatal violations per agent and locks an agent down once it
/// reaches the threshold.
///
/// Advisory kinds are ignored.
pub struct IntrusionResponder {
    threshold: u32,
    state: Mutex<ResponderState>,
}

impl IntrusionResponder {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state: Mutex::new(ResponderState::default()),
        }
    }

    pub fn violations(&self, agent: &EntityId) -> u32 {
        self.state
            .lock()
            .map(|s| s.violations.get(agent).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_locked_down(&self, agent: &EntityId) -> bool {
        // A poisoned lock reads as locked down.
        self.state
            .lock()
            .map(|s| s.locked_down.contains(agent))
            .unwrap_or(true)
    }

    pub fn release(&self, agent: &EntityId) -> Result<(), TripwireError> {
        let mut state = self.state.lock().map_err(|_| TripwireError::LockPoisoned)?;
        state.locked_down.remove(agent);
        state.violations.remove(agent);
        Ok(())
    }
}

impl TripwireObserver for IntrusionResponder {
    fn name(&self) -> &str {
        "intrusion-responder"
    }

    fn on_tripwire(&self, event: &TripwireEvent) -> Result<(), TripwireError> {
        if event.kind.is_advisory() {
            return Ok(());
        }
        let agent = event.snapshot.agent;
        let mut state = self.state.lock().map_err(|_| TripwireError::LockPoisoned)?;
        let count = state.violations.entry(agent).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;
        if count >= self.threshold && state.locked_down.insert(agent) {
            error!(
                agent = %agent,
                violations = count,
                last = %event.kind,
                "Agent locked down after repeated security violations"
            );
        }
        Ok(())
    }
}

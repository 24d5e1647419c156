use crate::cycle::CycleId;
use crate::types::Phase;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Lifecycle notifications published for observers (CLI progress output,
/// log sinks). Publishing never blocks and never fails the cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CycleEvent {
    PhaseChanged {
        cycle_id: CycleId,
        from: Phase,
        to: Phase,
        at: DateTime<Utc>,
    },
    ErrorRecorded {
        cycle_id: CycleId,
        phase: Phase,
        message: String,
        recoverable: bool,
    },
    IterationStarted {
        cycle_id: CycleId,
        iteration: u32,
        max_iterations: u32,
    },
    CycleCompleted {
        cycle_id: CycleId,
    },
    CycleFailed {
        cycle_id: CycleId,
        reason: String,
    },
}

impl CycleEvent {
    pub fn cycle_id(&self) -> CycleId {
        match self {
            CycleEvent::PhaseChanged { cycle_id, .. }
            | CycleEvent::ErrorRecorded { cycle_id, .. }
            | CycleEvent::IterationStarted { cycle_id, .. }
            | CycleEvent::CycleCompleted { cycle_id }
            | CycleEvent::CycleFailed { cycle_id, .. } => *cycle_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CycleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: CycleEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

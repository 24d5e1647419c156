//! Phase state machine for a single cycle.
//!
//! `Lifecycle` is the only code that writes `Cycle::phase`. Every transition
//! is validated against the adjacency graph, persisted through the
//! `CycleStore`, and then published on the `EventBus`, in that order.

use crate::collab::CycleStore;
use crate::cycle::{Cycle, CycleError};
use crate::error::{Result, ShipwrightError};
use crate::events::{CycleEvent, EventBus};
use crate::policy::RetryPolicies;
use crate::types::Phase;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Every phase reachable from `from` in one step.
///
/// Forward successor, `Failed` from any non-terminal phase, and the retry
/// target when it does not lie ahead of `from`.
pub fn allowed_transitions(from: Phase, policies: &RetryPolicies) -> Vec<Phase> {
    if from.is_terminal() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(3);
    if let Some(next) = from.next() {
        out.push(next);
    }
    if let Some(target) = policies.retry_target(from) {
        if target <= from && !out.contains(&target) {
            out.push(target);
        }
    }
    out.push(Phase::Failed);
    out
}

pub struct Lifecycle {
    cycle: Cycle,
    store: Arc<dyn CycleStore>,
    events: EventBus,
    policies: Arc<RetryPolicies>,
}

impl Lifecycle {
    pub fn new(
        cycle: Cycle,
        store: Arc<dyn CycleStore>,
        events: EventBus,
        policies: Arc<RetryPolicies>,
    ) -> Self {
        Self {
            cycle,
            store,
            events,
            policies,
        }
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    pub fn into_cycle(self) -> Cycle {
        self.cycle
    }

    pub fn phase(&self) -> Phase {
        self.cycle.phase
    }

    pub fn is_active(&self) -> bool {
        self.cycle.is_active()
    }

    /// `Idle` → `Analyzing`.
    pub async fn start(&mut self) -> Result<()> {
        if self.cycle.phase != Phase::Idle {
            return Err(ShipwrightError::InvalidTransition {
                from: self.cycle.phase,
                to: Phase::Analyzing,
                reason: "cycle already started".into(),
            });
        }
        self.transition(Phase::Analyzing).await
    }

    /// Pick a persisted cycle back up at its recorded phase.
    pub async fn resume(&mut self) -> Result<()> {
        match self.cycle.phase {
            Phase::Idle => self.start().await,
            p if p.is_terminal() => Err(ShipwrightError::InvalidTransition {
                from: p,
                to: p,
                reason: "cannot resume a finished cycle".into(),
            }),
            p => {
                info!(cycle = %self.cycle.id, phase = %p, "resuming cycle");
                self.events.publish(CycleEvent::PhaseChanged {
                    cycle_id: self.cycle.id,
                    from: p,
                    to: p,
                    at: Utc::now(),
                });
                Ok(())
            }
        }
    }

    pub async fn transition(&mut self, to: Phase) -> Result<()> {
        let from = self.cycle.phase;
        if !allowed_transitions(from, &self.policies).contains(&to) {
            return Err(ShipwrightError::InvalidTransition {
                from,
                to,
                reason: "not in the phase graph".into(),
            });
        }

        self.cycle.phase = to;
        self.cycle.updated_at = Utc::now();
        if let Err(e) = self.store.update(&self.cycle).await {
            self.cycle.phase = from;
            return Err(e);
        }

        info!(cycle = %self.cycle.id, %from, %to, "phase transition");
        self.events.publish(CycleEvent::PhaseChanged {
            cycle_id: self.cycle.id,
            from,
            to,
            at: self.cycle.updated_at,
        });
        match to {
            Phase::Completed => self.events.publish(CycleEvent::CycleCompleted {
                cycle_id: self.cycle.id,
            }),
            Phase::Failed => self.events.publish(CycleEvent::CycleFailed {
                cycle_id: self.cycle.id,
                reason: self
                    .cycle
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "unknown".into()),
            }),
            _ => {}
        }
        Ok(())
    }

    pub fn can_retry_phase(&self, phase: Phase) -> bool {
        self.policies.get(phase).is_some()
            && self.cycle.retries_for(phase) < self.policies.max_retries(phase)
    }

    pub fn retry_target(&self, phase: Phase) -> Option<Phase> {
        self.policies.retry_target(phase)
    }

    pub async fn record_retry(&mut self, phase: Phase) -> Result<u32> {
        let count = {
            let c = self.cycle.retry_counters.entry(phase).or_insert(0);
            *c += 1;
            *c
        };
        self.persist().await?;
        Ok(count)
    }

    /// Count another verification round. Returns `false` once the cycle has
    /// used up `max_iterations`.
    pub async fn increment_iteration(&mut self) -> Result<bool> {
        self.cycle.iterations += 1;
        self.persist().await?;
        let more = self.cycle.iterations < self.cycle.max_iterations;
        if more {
            self.events.publish(CycleEvent::IterationStarted {
                cycle_id: self.cycle.id,
                iteration: self.cycle.iterations,
                max_iterations: self.cycle.max_iterations,
            });
        }
        Ok(more)
    }

    pub async fn set_error(
        &mut self,
        phase: Phase,
        message: impl Into<String>,
        recoverable: bool,
    ) -> Result<()> {
        let message = message.into();
        self.events.publish(CycleEvent::ErrorRecorded {
            cycle_id: self.cycle.id,
            phase,
            message: message.clone(),
            recoverable,
        });
        self.cycle.error = Some(CycleError {
            phase,
            message,
            recoverable,
            at: Utc::now(),
        });
        self.persist().await
    }

    pub async fn clear_error(&mut self) -> Result<()> {
        if self.cycle.error.take().is_some() {
            self.persist().await?;
        }
        Ok(())
    }

    /// Apply a result-recording mutation and persist it. Never touches the
    /// phase.
    pub async fn update<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Cycle),
    {
        let phase = self.cycle.phase;
        f(&mut self.cycle);
        self.cycle.phase = phase;
        self.persist().await
    }

    async fn persist(&mut self) -> Result<()> {
        self.cycle.updated_at = Utc::now();
        self.store.update(&self.cycle).await
    }
}

//! The control loop.
//!
//! `Orchestrator` owns every active cycle. Each `develop`/`resume` call
//! holds one concurrency permit for the life of its cycle and drives the
//! cycle's `Lifecycle` phase by phase until it reaches `Completed` or
//! `Failed`. Cancellation is cooperative and observed between phases.

pub mod background;
mod handlers;

pub use handlers::PhaseOutcome;

use crate::collab::Collaborators;
use crate::config::{Config, PhaseTimeouts, VerificationConfig};
use crate::cycle::{Cycle, CycleId, CycleOptions};
use crate::error::{Result, ShipwrightError};
use crate::events::{CycleEvent, EventBus};
use crate::lifecycle::Lifecycle;
use crate::paths;
use crate::policy::RetryPolicies;
use crate::types::Phase;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_concurrent_cycles: usize,
    pub max_iterations: u32,
    pub fix_attempts: u32,
    pub default_namespace: String,
    pub timeouts: PhaseTimeouts,
    pub verification: VerificationConfig,
    pub policies: RetryPolicies,
    pub auto_commit: bool,
    pub render_diagrams: bool,
    /// Working tree committed after a verified cycle when `auto_commit` is on.
    pub project_root: Option<PathBuf>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default(), None)
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config, project_root: Option<PathBuf>) -> Self {
        Self {
            max_concurrent_cycles: config.orchestrator.max_concurrent_cycles,
            max_iterations: config.orchestrator.max_iterations,
            fix_attempts: config.orchestrator.fix_attempts,
            default_namespace: config.deploy.default_namespace.clone(),
            timeouts: config.orchestrator.phase_timeouts.clone(),
            verification: config.verification.clone(),
            policies: RetryPolicies::default().with_overrides(&config.retry),
            auto_commit: config.orchestrator.auto_commit,
            render_diagrams: config.orchestrator.render_diagrams,
            project_root,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub(crate) struct Inner {
    pub(crate) collab: Collaborators,
    pub(crate) settings: OrchestratorSettings,
    pub(crate) events: EventBus,
    policies: Arc<RetryPolicies>,
    active: DashMap<CycleId, Cycle>,
    cancels: DashMap<CycleId, CancellationToken>,
    permits: Arc<Semaphore>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

/// Removes a cycle from the active maps and releases its permit, however
/// the control loop exits.
struct ActiveGuard {
    inner: Arc<Inner>,
    id: CycleId,
    _permit: OwnedSemaphorePermit,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner.active.remove(&self.id);
        self.inner.cancels.remove(&self.id);
    }
}

enum Entry {
    Start,
    Resume,
}

impl Orchestrator {
    pub fn new(collab: Collaborators, settings: OrchestratorSettings) -> Self {
        Self::with_events(collab, settings, EventBus::default())
    }

    pub fn with_events(
        collab: Collaborators,
        settings: OrchestratorSettings,
        events: EventBus,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_cycles));
        let policies = Arc::new(settings.policies.clone());
        Self {
            inner: Arc::new(Inner {
                collab,
                settings,
                events,
                policies,
                active: DashMap::new(),
                cancels: DashMap::new(),
                permits,
            }),
        }
    }

    /// Run a new cycle for `requirement` to completion.
    ///
    /// Fails with `Exhausted`, and creates nothing, when
    /// `max_concurrent_cycles` cycles are already running.
    pub async fn develop(&self, requirement: &str, options: CycleOptions) -> Result<Cycle> {
        if requirement.trim().is_empty() {
            return Err(ShipwrightError::Validation("requirement is empty".into()));
        }
        if let Some(ns) = &options.namespace {
            paths::validate_name(ns)?;
        }
        let permit = self.acquire()?;

        let cycle = Cycle::new(
            requirement.trim(),
            options,
            &self.inner.settings.default_namespace,
            self.inner.settings.max_iterations,
        );
        self.inner.collab.store.create(&cycle).await?;
        info!(cycle = %cycle.id, "cycle created");
        self.run(cycle, permit, Entry::Start).await
    }

    /// Continue a persisted cycle from its recorded phase.
    pub async fn resume(&self, mut cycle: Cycle) -> Result<Cycle> {
        if self.is_active(cycle.id) {
            return Err(ShipwrightError::Validation(format!(
                "cycle {} is already running",
                cycle.id
            )));
        }
        if !cycle.is_active() {
            return Err(ShipwrightError::InvalidTransition {
                from: cycle.phase,
                to: cycle.phase,
                reason: "cannot resume a finished cycle".into(),
            });
        }
        let permit = self.acquire()?;
        if cycle.files.is_empty() {
            cycle.files = self.inner.collab.store.load_files(cycle.id).await?;
        }
        self.run(cycle, permit, Entry::Resume).await
    }

    pub async fn resume_by_id(&self, id: CycleId) -> Result<Cycle> {
        let cycle = self
            .inner
            .collab
            .store
            .get(id)
            .await?
            .ok_or_else(|| ShipwrightError::CycleNotFound(id.to_string()))?;
        self.resume(cycle).await
    }

    /// Request cancellation. Returns whether the cycle was active.
    pub fn cancel(&self, id: CycleId) -> bool {
        match self.inner.cancels.get(&id) {
            Some(token) => {
                info!(cycle = %id, "cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let ids: Vec<CycleId> = self.inner.cancels.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Snapshots of every running cycle, taken at their last phase boundary.
    pub fn active_cycles(&self) -> Vec<Cycle> {
        self.inner.active.iter().map(|e| e.value().clone()).collect()
    }

    pub fn is_active(&self, id: CycleId) -> bool {
        self.inner.active.contains_key(&id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.inner.events.subscribe()
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.inner.permits.clone().try_acquire_owned().map_err(|_| {
            ShipwrightError::Exhausted(format!(
                "{} cycles already active (max_concurrent_cycles)",
                self.inner.settings.max_concurrent_cycles
            ))
        })
    }

    async fn run(&self, cycle: Cycle, permit: OwnedSemaphorePermit, entry: Entry) -> Result<Cycle> {
        let id = cycle.id;
        let token = CancellationToken::new();
        self.inner.cancels.insert(id, token.clone());
        self.inner.active.insert(id, cycle.clone());
        let _guard = ActiveGuard {
            inner: self.inner.clone(),
            id,
            _permit: permit,
        };

        let mut lc = Lifecycle::new(
            cycle,
            self.inner.collab.store.clone(),
            self.inner.events.clone(),
            self.inner.policies.clone(),
        );
        match entry {
            Entry::Start => lc.start().await?,
            Entry::Resume => lc.resume().await?,
        }
        self.inner.active.insert(id, lc.cycle().clone());

        self.control_loop(&mut lc, &token).await?;
        let cycle = lc.into_cycle();
        info!(cycle = %id, phase = %cycle.phase, iterations = cycle.iterations, "cycle finished");
        Ok(cycle)
    }

    async fn control_loop(&self, lc: &mut Lifecycle, token: &CancellationToken) -> Result<()> {
        while lc.is_active() {
            let phase = lc.phase();
            if token.is_cancelled() {
                lc.set_error(phase, "cancelled", false).await?;
                lc.transition(Phase::Failed).await?;
                break;
            }

            match handlers::run_phase(&self.inner, lc).await {
                Ok(PhaseOutcome::Advance) => {
                    let clear = lc
                        .cycle()
                        .error
                        .as_ref()
                        .is_some_and(|e| e.recoverable && phase >= e.phase);
                    if clear {
                        lc.clear_error().await?;
                    }
                    let next = phase.next().ok_or_else(|| ShipwrightError::InvalidTransition {
                        from: phase,
                        to: phase,
                        reason: "no forward successor".into(),
                    })?;
                    lc.transition(next).await?;
                }
                Ok(PhaseOutcome::Escalate { target, reason }) => {
                    info!(cycle = %lc.cycle().id, %phase, %target, %reason, "escalating");
                    lc.set_error(phase, reason, true).await?;
                    lc.transition(target).await?;
                }
                Ok(PhaseOutcome::Fail { reason }) => {
                    lc.set_error(phase, reason, false).await?;
                    lc.transition(Phase::Failed).await?;
                }
                Err(e) => {
                    warn!(cycle = %lc.cycle().id, %phase, error = %e, "phase failed");
                    let target = lc.retry_target(phase);
                    match target {
                        Some(target) if !e.is_fatal() && lc.can_retry_phase(phase) => {
                            lc.set_error(phase, e.to_string(), true).await?;
                            let attempt = lc.record_retry(phase).await?;
                            info!(cycle = %lc.cycle().id, %phase, %target, attempt, "retrying");
                            lc.transition(target).await?;
                        }
                        _ => {
                            lc.set_error(phase, e.to_string(), false).await?;
                            lc.transition(Phase::Failed).await?;
                        }
                    }
                }
            }
            self.inner.active.insert(lc.cycle().id, lc.cycle().clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;

use crate::types::Phase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a phase reacts to a handler error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRetryPolicy {
    pub max_retries: u32,
    pub escalate_to: Phase,
}

/// Per-phase retry policies. Phases without an entry are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicies {
    policies: BTreeMap<Phase, PhaseRetryPolicy>,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        for phase in [Phase::Analyzing, Phase::Designing] {
            policies.insert(
                phase,
                PhaseRetryPolicy {
                    max_retries: 2,
                    escalate_to: phase,
                },
            );
        }
        for phase in [
            Phase::Coding,
            Phase::Testing,
            Phase::Building,
            Phase::Deploying,
            Phase::Verifying,
        ] {
            policies.insert(
                phase,
                PhaseRetryPolicy {
                    max_retries: 3,
                    escalate_to: Phase::Coding,
                },
            );
        }
        Self { policies }
    }
}

impl RetryPolicies {
    /// Apply overrides on top of the defaults. Overrides that point
    /// forward or into a terminal phase are ignored; retries only ever
    /// move a cycle back.
    pub fn with_overrides(mut self, overrides: &BTreeMap<Phase, PhaseRetryPolicy>) -> Self {
        for (phase, policy) in overrides {
            if phase.is_terminal() || *phase == Phase::Idle {
                continue;
            }
            if policy.escalate_to > *phase || policy.escalate_to.is_terminal() {
                tracing::warn!(
                    phase = %phase,
                    target = %policy.escalate_to,
                    "ignoring retry policy that escalates forward"
                );
                continue;
            }
            self.policies.insert(*phase, *policy);
        }
        self
    }

    pub fn get(&self, phase: Phase) -> Option<&PhaseRetryPolicy> {
        self.policies.get(&phase)
    }

    pub fn retry_target(&self, phase: Phase) -> Option<Phase> {
        self.get(phase).map(|p| p.escalate_to)
    }

    pub fn max_retries(&self, phase: Phase) -> u32 {
        self.get(phase).map(|p| p.max_retries).unwrap_or(0)
    }
}

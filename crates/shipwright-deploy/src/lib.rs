//! Cluster deployment and functional verification.
//!
//! `Engine` performs every cluster mutation behind `Guardrails` and records
//! each attempt in the `ActionHistory`. `verify::Verifier` probes a running
//! service over HTTP. `ClusterDeploymentEngine` plugs both into the
//! orchestrator's `DeploymentEngine` seam.

pub mod adapter;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod expose;
pub mod guard;
pub mod health;
pub mod history;
pub mod manifest;
pub mod remediate;
pub mod rollout;
pub mod verify;

pub use adapter::ClusterDeploymentEngine;
pub use engine::{Engine, EngineSettings, Mutation};
pub use error::{DeployError, Result};
pub use guard::Guardrails;
pub use history::ActionHistory;

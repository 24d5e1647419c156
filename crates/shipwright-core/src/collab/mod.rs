//! Narrow contracts for everything the orchestrator delegates.
//!
//! The orchestrator only ever sees these traits. `tool` backs the
//! generation/build side with external commands, `git` backs version
//! control, `crate::store` backs persistence, and the deploy crate backs
//! `DeploymentEngine`.

pub mod git;
pub mod tool;

use crate::cycle::{
    Architecture, BuildReport, ContinuityToken, Cycle, CycleId, GeneratedFile,
    RequirementAnalysis, TestReport,
};
use crate::deployment::{
    default_health_path, DeploymentDescriptor, DeploymentRecord, EndpointSpec, EnvVarSpec,
    PersistenceSpec, ServiceRecord,
};
use crate::error::Result;
use crate::types::ServiceKind;
use crate::verification::VerificationOutcome;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// AI capability
// ---------------------------------------------------------------------------

/// A value plus the continuity token to forward on the next call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse<T> {
    pub value: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuity_token: Option<ContinuityToken>,
}

impl<T> AiResponse<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            continuity_token: None,
        }
    }
}

/// Everything code generation needs to know about the cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSpec {
    pub service_name: String,
    pub requirement: String,
    pub kind: ServiceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<RequirementAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<Architecture>,
    /// Files from the previous attempt, when regenerating.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_files: Vec<GeneratedFile>,
}

impl CodeSpec {
    pub fn from_cycle(cycle: &Cycle) -> Self {
        Self {
            service_name: cycle.service_name(),
            requirement: cycle.requirement.clone(),
            kind: cycle.kind,
            analysis: cycle.analysis.clone(),
            architecture: cycle.architecture.clone(),
            previous_files: cycle.files.clone(),
        }
    }
}

#[async_trait]
pub trait AiCapability: Send + Sync {
    async fn analyze(&self, requirement: &str) -> Result<AiResponse<RequirementAnalysis>>;

    async fn design(
        &self,
        requirement: &str,
        analysis: &RequirementAnalysis,
        token: Option<&ContinuityToken>,
    ) -> Result<AiResponse<Architecture>>;

    /// `constraints` carries failure context from earlier attempts.
    async fn generate_code(
        &self,
        spec: &CodeSpec,
        constraints: &[String],
        token: Option<&ContinuityToken>,
    ) -> Result<AiResponse<Vec<GeneratedFile>>>;
}

// ---------------------------------------------------------------------------
// Validation, tests, build
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[async_trait]
pub trait CodeValidator: Send + Sync {
    async fn validate(&self, files: &[GeneratedFile]) -> Result<ValidationReport>;

    async fn fix(&self, files: &[GeneratedFile], errors: &[String]) -> Result<Vec<GeneratedFile>>;
}

#[async_trait]
pub trait TestGenerator: Send + Sync {
    /// Returns only the new test files.
    async fn generate(&self, files: &[GeneratedFile]) -> Result<Vec<GeneratedFile>>;
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, files: &[GeneratedFile]) -> Result<TestReport>;
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, name: &str, files: &[GeneratedFile]) -> Result<BuildReport>;
}

// ---------------------------------------------------------------------------
// Manifest hints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: CycleId,
    pub name: String,
    pub requirement: String,
    pub kind: ServiceKind,
    pub image: String,
    pub file_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<Architecture>,
}

/// What the manifest generator knows about how the service wants to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentHints {
    #[serde(default = "default_port")]
    pub port: i32,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub env: Vec<EnvVarSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceSpec>,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ServiceKind>,
}

fn default_port() -> i32 {
    3000
}

fn default_replicas() -> i32 {
    1
}

impl Default for DeploymentHints {
    fn default() -> Self {
        Self {
            port: default_port(),
            replicas: default_replicas(),
            env: Vec::new(),
            persistence: None,
            health_path: default_health_path(),
            endpoints: Vec::new(),
            kind: None,
        }
    }
}

#[async_trait]
pub trait ManifestGenerator: Send + Sync {
    async fn generate(&self, summary: &CycleSummary) -> Result<DeploymentHints>;
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CycleStore: Send + Sync {
    async fn create(&self, cycle: &Cycle) -> Result<()>;

    async fn get(&self, id: CycleId) -> Result<Option<Cycle>>;

    /// Upsert.
    async fn update(&self, cycle: &Cycle) -> Result<()>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<Cycle>>;

    async fn save_files(&self, id: CycleId, files: &[GeneratedFile]) -> Result<()>;

    async fn load_files(&self, id: CycleId) -> Result<Vec<GeneratedFile>>;
}

#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    async fn create(&self, record: &ServiceRecord) -> Result<()>;

    async fn get_by_cycle_id(&self, cycle_id: CycleId) -> Result<Option<ServiceRecord>>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<ServiceRecord>>;
}

// ---------------------------------------------------------------------------
// Best-effort enhancements
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Commit everything under `path`. `Ok(None)` when nothing changed.
    async fn commit(&self, path: &Path, message: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    /// Render and store the architecture diagram for a cycle.
    async fn render(&self, cycle_id: CycleId, architecture: &Architecture) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Deployment engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub cycle_id: CycleId,
    pub descriptor: DeploymentDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub cycle_id: CycleId,
    pub deployment: DeploymentRecord,
    pub requirement: String,
    pub kind: ServiceKind,
    /// Endpoints from the service directory; inferred from the requirement
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Vec<EndpointSpec>>,
}

#[async_trait]
pub trait DeploymentEngine: Send + Sync {
    async fn deploy(&self, request: &DeployRequest) -> Result<DeploymentRecord>;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerificationOutcome>;
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The full set of collaborators one orchestrator works with.
#[derive(Clone)]
pub struct Collaborators {
    pub ai: Arc<dyn AiCapability>,
    pub validator: Arc<dyn CodeValidator>,
    pub test_generator: Arc<dyn TestGenerator>,
    pub test_runner: Arc<dyn TestRunner>,
    pub builder: Arc<dyn ImageBuilder>,
    pub manifests: Arc<dyn ManifestGenerator>,
    pub store: Arc<dyn CycleStore>,
    pub directory: Arc<dyn ServiceDirectory>,
    pub engine: Arc<dyn DeploymentEngine>,
    pub vcs: Option<Arc<dyn VersionControl>>,
    pub diagrams: Option<Arc<dyn DiagramRenderer>>,
}

use crate::deployment::DeploymentRecord;
use crate::types::{dns_label, Phase, ServiceKind};
use crate::verification::VerificationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type CycleId = Uuid;

// ---------------------------------------------------------------------------
// ContinuityToken
// ---------------------------------------------------------------------------

/// Opaque reasoning-continuity state returned by the AI capability.
///
/// Stored and forwarded verbatim; never inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuityToken(String);

impl ContinuityToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Phase results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementAnalysis {
    pub title: String,
    pub complexity: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub responsibility: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFlow {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub overview: String,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub data_flows: Vec<DataFlow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: u32,
    pub failed: u32,
    #[serde(default)]
    pub output: String,
}

impl TestReport {
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub image: String,
    #[serde(default)]
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleError {
    pub phase: Phase,
    pub message: String,
    pub recoverable: bool,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CycleOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleOptions {
    /// Service name; derived from the analysis title when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ServiceKind>,
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

/// One end-to-end attempt to turn a requirement into a verified service.
///
/// `phase` is only ever changed through `Lifecycle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: CycleId,
    pub phase: Phase,
    pub requirement: String,
    pub options: CycleOptions,
    pub namespace: String,
    pub kind: ServiceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<RequirementAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<Architecture>,
    /// Persisted separately through `CycleStore::save_files`.
    #[serde(skip)]
    pub files: Vec<GeneratedFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    #[serde(default)]
    pub iterations: u32,
    pub max_iterations: u32,
    #[serde(default)]
    pub retry_counters: BTreeMap<Phase, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuity_token: Option<ContinuityToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CycleError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cycle {
    pub fn new(
        requirement: impl Into<String>,
        options: CycleOptions,
        default_namespace: &str,
        default_max_iterations: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            phase: Phase::Idle,
            requirement: requirement.into(),
            namespace: options
                .namespace
                .clone()
                .unwrap_or_else(|| default_namespace.to_string()),
            kind: options.kind.unwrap_or_default(),
            max_iterations: options.max_iterations.unwrap_or(default_max_iterations),
            options,
            analysis: None,
            architecture: None,
            files: Vec::new(),
            validation_errors: Vec::new(),
            tests: None,
            build: None,
            deployment: None,
            verification: None,
            iterations: 0,
            retry_counters: BTreeMap::new(),
            continuity_token: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Kubernetes-safe service name: explicit option, then analysis title,
    /// then a short id-based fallback.
    pub fn service_name(&self) -> String {
        let explicit = self.options.name.as_deref().map(dns_label);
        let from_title = self.analysis.as_ref().map(|a| dns_label(&a.title));
        explicit
            .into_iter()
            .chain(from_title)
            .find(|n| !n.is_empty())
            .unwrap_or_else(|| format!("svc-{}", &self.id.simple().to_string()[..8]))
    }

    pub fn retries_for(&self, phase: Phase) -> u32 {
        self.retry_counters.get(&phase).copied().unwrap_or(0)
    }

    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }
}

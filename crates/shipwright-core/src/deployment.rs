//! Deployment-side data model shared by the orchestrator and the engine.

use crate::types::ServiceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// Every cluster-mutating operation the engine can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateDeployment,
    DeleteDeployment,
    CreateService,
    CreateVolumeClaim,
    Rollback,
    Restart,
    Scale,
}

impl ActionKind {
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::CreateDeployment,
            ActionKind::DeleteDeployment,
            ActionKind::CreateService,
            ActionKind::CreateVolumeClaim,
            ActionKind::Rollback,
            ActionKind::Restart,
            ActionKind::Scale,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::CreateDeployment => "create_deployment",
            ActionKind::DeleteDeployment => "delete_deployment",
            ActionKind::CreateService => "create_service",
            ActionKind::CreateVolumeClaim => "create_volume_claim",
            ActionKind::Rollback => "rollback",
            ActionKind::Restart => "restart",
            ActionKind::Scale => "scale",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = crate::error::ShipwrightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::all()
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                crate::error::ShipwrightError::Configuration(format!("unknown action '{s}'"))
            })
    }
}

// ---------------------------------------------------------------------------
// DeploymentDescriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EnvSource {
    Plain { value: String },
    Secret { secret: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVarSpec {
    pub name: String,
    #[serde(flatten)]
    pub source: EnvSource,
}

impl EnvVarSpec {
    pub fn plain(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: EnvSource::Plain {
                value: value.into(),
            },
        }
    }

    pub fn secret(
        name: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: EnvSource::Secret {
                secret: secret.into(),
                key: key.into(),
            },
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self.source, EnvSource::Secret { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PersistenceSpec {
    /// Mount a PersistentVolumeClaim named `<deployment>-data`.
    VolumeClaim {
        size: String,
        mount_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        storage_class: Option<String>,
    },
    /// Connection material for an external database, read from an existing
    /// secret. Each key becomes an env var of the same name (upper-cased);
    /// `url_template` may reference them as `$(KEY)`.
    ExternalDatabase {
        secret_name: String,
        keys: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url_env: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url_template: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    pub name: String,
    pub namespace: String,
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    pub port: i32,
    #[serde(default)]
    pub env: Vec<EnvVarSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceSpec>,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// `None` defers to the engine's configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_metrics: Option<bool>,
}

fn default_replicas() -> i32 {
    1
}

pub fn default_health_path() -> String {
    "/health".to_string()
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    Degraded,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::Running => f.write_str("running"),
            DeploymentStatus::Degraded => f.write_str("degraded"),
        }
    }
}

/// What a create-or-replace call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployAction {
    Created,
    Configured,
    DryRun,
}

impl fmt::Display for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployAction::Created => f.write_str("created"),
            DeployAction::Configured => f.write_str("configured"),
            DeployAction::DryRun => f.write_str("dry_run"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUrls {
    /// In-cluster DNS URL; always computable.
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

impl ServiceUrls {
    /// The URL most likely reachable from outside the cluster.
    pub fn best(&self) -> &str {
        self.external
            .as_deref()
            .or(self.node.as_deref())
            .unwrap_or(&self.cluster)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub replicas: i32,
    pub port: i32,
    pub status: DeploymentStatus,
    pub action: DeployAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<ServiceUrls>,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_tail: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Action history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionResult {
    Succeeded { detail: String },
    DryRun,
    Denied { reason: String },
    Failed { reason: String },
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Succeeded { .. })
    }
}

/// Append-only audit record written by every cluster-mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionHistoryEntry {
    pub action: ActionKind,
    pub deployment: String,
    pub namespace: String,
    pub timestamp: DateTime<Utc>,
    pub result: ActionResult,
    pub correlation_id: Uuid,
}

// ---------------------------------------------------------------------------
// Service directory records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EndpointSpec {
    pub fn new(method: &str, path: impl Into<String>) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.into(),
            expected_status: None,
            description: None,
        }
    }

    pub fn accepts_body(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH")
    }
}

/// Authoritative description of a deployed service, written after a
/// successful deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub name: String,
    pub namespace: String,
    pub kind: ServiceKind,
    pub url: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
    pub created_at: DateTime<Utc>,
}

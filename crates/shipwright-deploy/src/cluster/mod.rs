//! The narrow slice of the Kubernetes API the engine needs.
//!
//! Everything the engine touches goes through `Cluster`, so the engine can
//! run against a real API server (`KubeCluster`) or an in-memory fake.

pub mod live;

#[cfg(test)]
pub(crate) mod fake;

pub use live::KubeCluster;

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, PodTemplateSpec, Service};

#[async_trait]
pub trait Cluster: Send + Sync {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()>;

    /// Deleting an absent deployment is not an error.
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    /// JSON merge patch.
    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()>;

    /// Pod template of the revision before the current one.
    async fn previous_template(&self, namespace: &str, name: &str)
        -> Result<Option<PodTemplateSpec>>;

    /// Pods labelled `app=<app>`.
    async fn list_pods(&self, namespace: &str, app: &str) -> Result<Vec<Pod>>;

    async fn pod_logs(&self, namespace: &str, pod: &str, tail_lines: i64) -> Result<String>;

    /// Create or update the service, returning the stored object.
    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<Service>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Returns `true` when the claim was created, `false` if it already existed.
    async fn ensure_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<bool>;

    /// `InternalIP` addresses of the cluster's nodes.
    async fn node_addresses(&self) -> Result<Vec<String>>;
}

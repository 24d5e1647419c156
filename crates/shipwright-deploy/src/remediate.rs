//! Operator remediations on a running deployment.

use crate::engine::{Engine, Mutation};
use crate::error::{DeployError, Result};
use chrono::Utc;
use serde_json::json;
use shipwright_core::deployment::ActionKind;

const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";
const TEMPLATE_HASH: &str = "pod-template-hash";

impl Engine {
    /// Roll back to the previous ReplicaSet's pod template.
    pub async fn rollback(&self, name: &str, namespace: &str) -> Result<Mutation<()>> {
        self.mutate(ActionKind::Rollback, namespace, name, || async {
            let mut template = self
                .cluster
                .previous_template(namespace, name)
                .await?
                .ok_or_else(|| DeployError::NoPreviousRevision(name.to_string()))?;
            if let Some(labels) = template.metadata.as_mut().and_then(|m| m.labels.as_mut()) {
                labels.remove(TEMPLATE_HASH);
            }
            let patch = json!({ "spec": { "template": template } });
            self.cluster.patch_deployment(namespace, name, &patch).await?;
            Ok(((), "rolled back to previous revision".to_string()))
        })
        .await
    }

    pub async fn restart(&self, name: &str, namespace: &str) -> Result<Mutation<()>> {
        self.mutate(ActionKind::Restart, namespace, name, || async {
            let now = Utc::now().to_rfc3339();
            let patch = json!({
                "spec": { "template": { "metadata": { "annotations": { RESTARTED_AT: now } } } }
            });
            self.cluster.patch_deployment(namespace, name, &patch).await?;
            Ok(((), format!("restart requested at {now}")))
        })
        .await
    }

    pub async fn scale(&self, name: &str, namespace: &str, replicas: i32) -> Result<Mutation<()>> {
        self.mutate(ActionKind::Scale, namespace, name, || async {
            if replicas < 0 {
                return Err(DeployError::Manifest(format!(
                    "replicas must not be negative, got {replicas}"
                )));
            }
            let patch = json!({ "spec": { "replicas": replicas } });
            self.cluster.patch_deployment(namespace, name, &patch).await?;
            Ok(((), format!("scaled to {replicas} replicas")))
        })
        .await
    }
}

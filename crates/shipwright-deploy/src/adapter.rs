use crate::engine::Engine;
use crate::verify::VerifyTarget;
use async_trait::async_trait;
use shipwright_core::collab::{DeployRequest, DeploymentEngine, VerifyRequest};
use shipwright_core::deployment::DeploymentRecord;
use shipwright_core::verification::VerificationOutcome;
use std::sync::Arc;
use tracing::info;

/// The orchestrator's view of the engine.
#[derive(Clone)]
pub struct ClusterDeploymentEngine {
    engine: Arc<Engine>,
}

impl ClusterDeploymentEngine {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

#[async_trait]
impl DeploymentEngine for ClusterDeploymentEngine {
    async fn deploy(&self, request: &DeployRequest) -> shipwright_core::Result<DeploymentRecord> {
        info!(cycle = %request.cycle_id, name = %request.descriptor.name, "deploying");
        Ok(self.engine.deploy(&request.descriptor).await?)
    }

    async fn verify(&self, request: &VerifyRequest) -> shipwright_core::Result<VerificationOutcome> {
        let deployment = &request.deployment;
        let base_url = match &deployment.urls {
            Some(urls) => urls.best().to_string(),
            None => self
                .engine
                .predicted_urls(&deployment.name, &deployment.namespace)
                .cluster,
        };
        let target = VerifyTarget {
            health_path: deployment.health_path.clone(),
            requirement: request.requirement.clone(),
            endpoints: request.endpoints.clone(),
            ..VerifyTarget::new(base_url, request.kind)
        };
        info!(cycle = %request.cycle_id, url = %target.base_url, "verifying");
        Ok(self.engine.verify_deployment(deployment, target).await?)
    }
}

use k8s_openapi::api::apps::v1::Deployment;
use serde::Serialize;

/// Replica counts reported by a Deployment's status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RolloutStatus {
    pub desired: i32,
    pub updated: i32,
    pub ready: i32,
    pub available: i32,
    /// The controller has seen the latest spec.
    pub observed: bool,
}

impl RolloutStatus {
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let desired = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let status = deployment.status.clone().unwrap_or_default();
        let observed = match (deployment.metadata.generation, status.observed_generation) {
            (Some(generation), Some(seen)) => seen >= generation,
            (None, _) => true,
            (Some(_), None) => false,
        };
        Self {
            desired,
            updated: status.updated_replicas.unwrap_or(0),
            ready: status.ready_replicas.unwrap_or(0),
            available: status.available_replicas.unwrap_or(0),
            observed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.observed
            && self.updated == self.desired
            && self.ready == self.desired
            && self.available == self.desired
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RolloutOutcome {
    pub status: RolloutStatus,
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(generation: i64, status: serde_json::Value) -> Deployment {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "api", "generation": generation },
            "spec": {
                "replicas": 2,
                "selector": { "matchLabels": { "app": "api" } },
                "template": { "spec": { "containers": [{ "name": "api" }] } },
            },
            "status": status,
        }))
        .unwrap()
    }

    #[test]
    fn complete_when_all_counts_match() {
        let d = deployment(
            3,
            json!({ "observedGeneration": 3, "updatedReplicas": 2, "readyReplicas": 2, "availableReplicas": 2 }),
        );
        assert!(RolloutStatus::from_deployment(&d).is_complete());
    }

    #[test]
    fn incomplete_while_any_count_lags() {
        let d = deployment(
            3,
            json!({ "observedGeneration": 3, "updatedReplicas": 2, "readyReplicas": 1, "availableReplicas": 1 }),
        );
        let status = RolloutStatus::from_deployment(&d);
        assert!(!status.is_complete());
        assert_eq!(status.ready, 1);
    }

    #[test]
    fn stale_observation_is_incomplete() {
        let d = deployment(
            4,
            json!({ "observedGeneration": 3, "updatedReplicas": 2, "readyReplicas": 2, "availableReplicas": 2 }),
        );
        assert!(!RolloutStatus::from_deployment(&d).is_complete());
    }
}

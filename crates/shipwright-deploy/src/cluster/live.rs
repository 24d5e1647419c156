use super::Cluster;
use crate::error::{DeployError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{
    Node, PersistentVolumeClaim, Pod, PodTemplateSpec, Service,
};
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

const FIELD_MANAGER: &str = "shipwright";
const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

/// `Cluster` backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 404)
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(self.deployments(namespace).get_opt(name).await?)
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()> {
        self.deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await?;
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .deployments(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(name, namespace, "deployment already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn previous_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodTemplateSpec>> {
        let sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let list = sets
            .list(&ListParams::default().labels(&format!("app={name}")))
            .await?;

        let mut revisions: Vec<(i64, ReplicaSet)> = list
            .items
            .into_iter()
            .filter(|rs| {
                rs.metadata
                    .owner_references
                    .as_ref()
                    .is_some_and(|refs| refs.iter().any(|o| o.kind == "Deployment" && o.name == name))
            })
            .filter_map(|rs| {
                let revision = rs
                    .metadata
                    .annotations
                    .as_ref()?
                    .get(REVISION_ANNOTATION)?
                    .parse::<i64>()
                    .ok()?;
                Some((revision, rs))
            })
            .collect();
        revisions.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(revisions
            .into_iter()
            .nth(1)
            .and_then(|(_, rs)| rs.spec)
            .and_then(|spec| spec.template))
    }

    async fn list_pods(&self, namespace: &str, app: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(&format!("app={app}")))
            .await?;
        Ok(list.items)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, tail_lines: i64) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };
        Ok(pods.logs(pod, &params).await?)
    }

    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let name = service
            .metadata
            .name
            .clone()
            .ok_or_else(|| DeployError::Manifest("service has no name".into()))?;
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        Ok(services.patch(&name, &params, &Patch::Apply(service)).await?)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(services.get_opt(name).await?)
    }

    async fn ensure_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<bool> {
        let name = claim
            .metadata
            .name
            .clone()
            .ok_or_else(|| DeployError::Manifest("volume claim has no name".into()))?;
        let claims: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        if claims.get_opt(&name).await?.is_some() {
            return Ok(false);
        }
        claims.create(&PostParams::default(), claim).await?;
        Ok(true)
    }

    async fn node_addresses(&self) -> Result<Vec<String>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|n| n.status?.addresses)
            .flatten()
            .filter(|a| a.type_ == "InternalIP")
            .map(|a| a.address)
            .collect())
    }
}

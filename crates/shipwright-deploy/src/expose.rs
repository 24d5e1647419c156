//! NodePort exposure and URL discovery.

use crate::engine::{Engine, Mutation};
use crate::error::{DeployError, Result};
use crate::manifest::{self, SERVICE_PORT};
use k8s_openapi::api::core::v1::Service;
use shipwright_core::deployment::{ActionKind, ServiceUrls};
use tracing::{debug, warn};

fn cluster_url(name: &str, namespace: &str) -> String {
    format!("http://{name}.{namespace}.svc.cluster.local:{SERVICE_PORT}")
}

impl Engine {
    /// URLs the service will have once exposed; only the in-cluster URL is
    /// known without asking the cluster.
    pub fn predicted_urls(&self, name: &str, namespace: &str) -> ServiceUrls {
        ServiceUrls {
            cluster: cluster_url(name, namespace),
            node: None,
            external: None,
        }
    }

    pub async fn create_node_port_service(
        &self,
        name: &str,
        namespace: &str,
        port: i32,
    ) -> Result<ServiceUrls> {
        let service = manifest::node_port_service(name, namespace, port)?;
        let applied = self
            .mutate(ActionKind::CreateService, namespace, name, || async {
                let stored = self.cluster.apply_service(namespace, &service).await?;
                Ok((stored, format!("service {name} exposed on port {port}")))
            })
            .await?;
        match applied {
            Mutation::Applied(stored) => Ok(self.urls_for(name, namespace, &stored).await),
            Mutation::DryRun => Ok(self.predicted_urls(name, namespace)),
        }
    }

    pub async fn get_service_info(&self, name: &str, namespace: &str) -> Result<ServiceUrls> {
        let service = self
            .cluster
            .get_service(namespace, name)
            .await?
            .ok_or_else(|| DeployError::not_found("service", name, namespace))?;
        Ok(self.urls_for(name, namespace, &service).await)
    }

    async fn urls_for(&self, name: &str, namespace: &str, service: &Service) -> ServiceUrls {
        let node_port = service
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .and_then(|ports| ports.first())
            .and_then(|p| p.node_port);

        let node = match (node_port, self.node_address().await) {
            (Some(port), Some(addr)) => Some(format!("http://{addr}:{port}")),
            _ => None,
        };

        let ingress = service
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|ingress| ingress.first())
            .and_then(|i| i.ip.clone().or_else(|| i.hostname.clone()));
        let external = ingress
            .map(|host| format!("http://{host}:{SERVICE_PORT}"))
            .or_else(|| node.clone());

        ServiceUrls {
            cluster: cluster_url(name, namespace),
            node,
            external,
        }
    }

    async fn node_address(&self) -> Option<String> {
        if let Some(addr) = &self.settings.node_address {
            return Some(addr.clone());
        }
        if !self.settings.in_cluster {
            return None;
        }
        match self.cluster.node_addresses().await {
            Ok(addrs) => {
                debug!(count = addrs.len(), "discovered node addresses");
                addrs.into_iter().next()
            }
            Err(e) => {
                warn!(error = %e, "node address discovery failed");
                None
            }
        }
    }
}

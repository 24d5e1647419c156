//! In-memory `Cluster` for engine tests. Rollouts complete instantly unless
//! held, and every deployment gets one running, ready pod per replica.

use super::Cluster;
use crate::error::{DeployError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, PodTemplateSpec, Service};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct State {
    deployments: BTreeMap<Key, Deployment>,
    revisions: BTreeMap<Key, Vec<PodTemplateSpec>>,
    pods: BTreeMap<Key, Vec<Pod>>,
    services: BTreeMap<Key, Service>,
    claims: BTreeMap<Key, PersistentVolumeClaim>,
    nodes: Vec<String>,
    logs: String,
    hold_rollout: bool,
    creates: usize,
    deletes: usize,
    /// Gets a deleted deployment stays visible for.
    linger: usize,
    terminating: BTreeMap<Key, usize>,
}

#[derive(Default)]
pub(crate) struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Keep new deployments at zero ready replicas.
    pub fn hold_rollout(&self) {
        self.state().hold_rollout = true;
    }

    /// Keep deleted deployments visible, as if terminating, for `gets`
    /// further `get_deployment` calls.
    pub fn linger_on_delete(&self, gets: usize) {
        self.state().linger = gets;
    }

    pub fn set_pods(&self, namespace: &str, app: &str, pods: Vec<Pod>) {
        self.state().pods.insert(key(namespace, app), pods);
    }

    pub fn set_nodes(&self, addresses: &[&str]) {
        self.state().nodes = addresses.iter().map(|a| a.to_string()).collect();
    }

    pub fn set_logs(&self, logs: &str) {
        self.state().logs = logs.to_string();
    }

    pub fn set_load_balancer(&self, namespace: &str, name: &str, ip: &str) {
        let mut state = self.state();
        if let Some(svc) = state.services.get_mut(&key(namespace, name)) {
            let mut value = serde_json::to_value(&*svc).unwrap();
            value["status"] = json!({ "loadBalancer": { "ingress": [{ "ip": ip }] } });
            *svc = serde_json::from_value(value).unwrap();
        }
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state().deployments.get(&key(namespace, name)).cloned()
    }

    pub fn deployment_count(&self) -> usize {
        self.state().deployments.len()
    }

    pub fn has_claim(&self, namespace: &str, name: &str) -> bool {
        self.state().claims.contains_key(&key(namespace, name))
    }

    pub fn creates(&self) -> usize {
        self.state().creates
    }

    pub fn deletes(&self) -> usize {
        self.state().deletes
    }
}

pub(crate) fn pod(name: &str, phase: &str, ready: bool, restarts: i32) -> Pod {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name },
        "status": {
            "phase": phase,
            "containerStatuses": [{
                "name": "app",
                "image": "app:latest",
                "imageID": "",
                "ready": ready,
                "restartCount": restarts,
            }],
        },
    }))
    .unwrap()
}

fn settle(deployment: &mut Deployment, hold: bool) {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = if hold { 0 } else { desired };
    deployment.status = Some(DeploymentStatus {
        replicas: Some(desired),
        updated_replicas: Some(desired),
        ready_replicas: Some(ready),
        available_replicas: Some(ready),
        observed_generation: deployment.metadata.generation,
        ..DeploymentStatus::default()
    });
}

fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(existing) = target {
        for (k, v) in fields {
            if v.is_null() {
                existing.remove(k);
            } else {
                merge_patch(existing.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let mut state = self.state();
        let k = key(namespace, name);
        if let Some(left) = state.terminating.get_mut(&k) {
            if *left == 0 {
                state.terminating.remove(&k);
                state.deployments.remove(&k);
            } else {
                *left -= 1;
            }
        }
        Ok(state.deployments.get(&k).cloned())
    }

    async fn create_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<()> {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        let k = key(namespace, &name);
        if state.deployments.contains_key(&k) {
            return Err(DeployError::Manifest(format!("deployment '{name}' already exists")));
        }
        let mut stored = deployment.clone();
        stored.metadata.generation = Some(1);
        settle(&mut stored, state.hold_rollout);
        if let Some(spec) = &stored.spec {
            state.revisions.entry(k.clone()).or_default().push(spec.template.clone());
        }
        state.deployments.insert(k, stored);
        state.creates += 1;
        Ok(())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        let k = key(namespace, name);
        if !state.deployments.contains_key(&k) || state.terminating.contains_key(&k) {
            return Ok(());
        }
        state.deletes += 1;
        if state.linger == 0 {
            state.deployments.remove(&k);
        } else {
            let linger = state.linger;
            state.terminating.insert(k, linger);
        }
        Ok(())
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        let mut state = self.state();
        let k = key(namespace, name);
        let current = state
            .deployments
            .get(&k)
            .ok_or_else(|| DeployError::not_found("deployment", name, namespace))?;
        let mut value = serde_json::to_value(current)?;
        merge_patch(&mut value, patch);
        let mut patched: Deployment = serde_json::from_value(value)?;
        patched.metadata.generation = Some(patched.metadata.generation.unwrap_or(1) + 1);
        let hold = state.hold_rollout;
        settle(&mut patched, hold);
        if patch.pointer("/spec/template").is_some() {
            if let Some(spec) = &patched.spec {
                state.revisions.entry(k.clone()).or_default().push(spec.template.clone());
            }
        }
        state.deployments.insert(k, patched);
        Ok(())
    }

    async fn previous_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodTemplateSpec>> {
        let state = self.state();
        Ok(state.revisions.get(&key(namespace, name)).and_then(|revs| {
            revs.len().checked_sub(2).map(|i| revs[i].clone())
        }))
    }

    async fn list_pods(&self, namespace: &str, app: &str) -> Result<Vec<Pod>> {
        let state = self.state();
        if let Some(pods) = state.pods.get(&key(namespace, app)) {
            return Ok(pods.clone());
        }
        let Some(deployment) = state.deployments.get(&key(namespace, app)) else {
            return Ok(Vec::new());
        };
        let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = !state.hold_rollout;
        let phase = if ready { "Running" } else { "Pending" };
        Ok((0..desired)
            .map(|i| pod(&format!("{app}-{i}"), phase, ready, 0))
            .collect())
    }

    async fn pod_logs(&self, _namespace: &str, _pod: &str, tail_lines: i64) -> Result<String> {
        let state = self.state();
        let lines: Vec<&str> = state.logs.lines().collect();
        let skip = lines.len().saturating_sub(tail_lines.max(0) as usize);
        Ok(lines[skip..].join("\n"))
    }

    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        let name = service.metadata.name.clone().unwrap_or_default();
        let mut stored = service.clone();
        if let Some(spec) = stored.spec.as_mut() {
            for (i, port) in spec.ports.iter_mut().flatten().enumerate() {
                port.node_port.get_or_insert(30080 + i as i32);
            }
        }
        self.state()
            .services
            .insert(key(namespace, &name), stored.clone());
        Ok(stored)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.state().services.get(&key(namespace, name)).cloned())
    }

    async fn ensure_volume_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<bool> {
        let name = claim.metadata.name.clone().unwrap_or_default();
        let mut state = self.state();
        let k = key(namespace, &name);
        if state.claims.contains_key(&k) {
            return Ok(false);
        }
        state.claims.insert(k, claim.clone());
        Ok(true)
    }

    async fn node_addresses(&self) -> Result<Vec<String>> {
        Ok(self.state().nodes.clone())
    }
}

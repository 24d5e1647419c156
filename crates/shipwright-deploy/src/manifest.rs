//! Kubernetes objects built from a `DeploymentDescriptor`.
//!
//! One Deployment, one NodePort Service and, for volume persistence, one
//! PersistentVolumeClaim per service.

use crate::error::{DeployError, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use serde_json::{json, Value};
use shipwright_core::deployment::{DeploymentDescriptor, EnvSource, EnvVarSpec, PersistenceSpec};
use shipwright_core::paths;
use std::collections::BTreeMap;

pub const MANAGED_BY: &str = "shipwright";
pub const SERVICE_PORT: i32 = 80;
const METRICS_PATH: &str = "/metrics";
const VOLUME_NAME: &str = "data";

pub fn labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), name.to_string()),
        ("app.kubernetes.io/name".to_string(), name.to_string()),
        ("app.kubernetes.io/managed-by".to_string(), MANAGED_BY.to_string()),
    ])
}

pub fn claim_name(name: &str) -> String {
    format!("{name}-data")
}

pub fn validate(descriptor: &DeploymentDescriptor) -> Result<()> {
    let check = |v: &str| paths::validate_name(v).map_err(|e| DeployError::Manifest(e.to_string()));
    check(&descriptor.name)?;
    check(&descriptor.namespace)?;
    if descriptor.image.trim().is_empty() {
        return Err(DeployError::Manifest("image is empty".into()));
    }
    if !(1..=65535).contains(&descriptor.port) {
        return Err(DeployError::Manifest(format!(
            "port {} is out of range",
            descriptor.port
        )));
    }
    if descriptor.replicas < 0 {
        return Err(DeployError::Manifest("replicas must not be negative".into()));
    }
    Ok(())
}

/// Container environment in apply order: secret-backed variables first so
/// plain values can reference them as `$(VAR)`.
pub fn ordered_env(descriptor: &DeploymentDescriptor) -> Vec<EnvVarSpec> {
    let mut secrets = Vec::new();
    let mut plain = Vec::new();

    if let Some(PersistenceSpec::ExternalDatabase {
        secret_name, keys, ..
    }) = &descriptor.persistence
    {
        for key in keys {
            secrets.push(EnvVarSpec::secret(env_name(key), secret_name, key));
        }
    }
    for var in &descriptor.env {
        if var.is_secret() {
            secrets.push(var.clone());
        } else {
            plain.push(var.clone());
        }
    }
    if let Some(PersistenceSpec::ExternalDatabase {
        url_env: Some(env),
        url_template: Some(template),
        ..
    }) = &descriptor.persistence
    {
        plain.push(EnvVarSpec::plain(env, template));
    }

    secrets.extend(plain);
    secrets
}

fn env_name(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn env_json(var: &EnvVarSpec) -> Value {
    match &var.source {
        EnvSource::Plain { value } => json!({ "name": var.name, "value": value }),
        EnvSource::Secret { secret, key } => json!({
            "name": var.name,
            "valueFrom": { "secretKeyRef": { "name": secret, "key": key } },
        }),
    }
}

pub fn deployment(descriptor: &DeploymentDescriptor, default_scrape: bool) -> Result<Deployment> {
    validate(descriptor)?;
    let name = &descriptor.name;
    let labels = labels(name);
    let env: Vec<Value> = ordered_env(descriptor).iter().map(env_json).collect();

    let mut annotations = BTreeMap::new();
    if descriptor.scrape_metrics.unwrap_or(default_scrape) {
        annotations.insert("prometheus.io/scrape".to_string(), "true".to_string());
        annotations.insert("prometheus.io/port".to_string(), descriptor.port.to_string());
        annotations.insert("prometheus.io/path".to_string(), METRICS_PATH.to_string());
    }

    let probe = |initial: i32, period: i32| {
        json!({
            "httpGet": { "path": descriptor.health_path, "port": descriptor.port },
            "initialDelaySeconds": initial,
            "periodSeconds": period,
        })
    };

    let mut container = json!({
        "name": name,
        "image": descriptor.image,
        "ports": [{ "name": "http", "containerPort": descriptor.port }],
        "env": env,
        "readinessProbe": probe(3, 5),
        "livenessProbe": probe(15, 10),
    });
    let mut pod_spec = json!({ "containers": [] });

    if let Some(PersistenceSpec::VolumeClaim { mount_path, .. }) = &descriptor.persistence {
        container["volumeMounts"] = json!([{ "name": VOLUME_NAME, "mountPath": mount_path }]);
        pod_spec["volumes"] = json!([{
            "name": VOLUME_NAME,
            "persistentVolumeClaim": { "claimName": claim_name(name) },
        }]);
    }
    pod_spec["containers"] = json!([container]);

    let manifest = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": descriptor.namespace,
            "labels": labels,
        },
        "spec": {
            "replicas": descriptor.replicas,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": labels, "annotations": annotations },
                "spec": pod_spec,
            },
        },
    });
    Ok(serde_json::from_value(manifest)?)
}

pub fn node_port_service(name: &str, namespace: &str, port: i32) -> Result<Service> {
    let manifest = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "namespace": namespace, "labels": labels(name) },
        "spec": {
            "type": "NodePort",
            "selector": { "app": name },
            "ports": [{ "name": "http", "port": SERVICE_PORT, "targetPort": port }],
        },
    });
    Ok(serde_json::from_value(manifest)?)
}

pub fn volume_claim(
    name: &str,
    namespace: &str,
    size: &str,
    storage_class: Option<&str>,
) -> Result<PersistentVolumeClaim> {
    let mut spec = json!({
        "accessModes": ["ReadWriteOnce"],
        "resources": { "requests": { "storage": size } },
    });
    if let Some(class) = storage_class {
        spec["storageClassName"] = json!(class);
    }
    let manifest = json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": claim_name(name), "namespace": namespace, "labels": labels(name) },
        "spec": spec,
    });
    Ok(serde_json::from_value(manifest)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_core::deployment::default_health_path;

    fn descriptor() -> DeploymentDescriptor {
        DeploymentDescriptor {
            name: "todo-api".into(),
            namespace: "default".into(),
            image: "registry.local/todo-api:1".into(),
            replicas: 2,
            port: 3000,
            env: vec![
                EnvVarSpec::plain("DATABASE_URL", "postgres://$(DB_USER):$(DB_PASSWORD)@db/app"),
                EnvVarSpec::secret("DB_PASSWORD", "db-creds", "password"),
            ],
            persistence: None,
            health_path: default_health_path(),
            scrape_metrics: None,
        }
    }

    fn env_names(dep: &Deployment) -> Vec<String> {
        let spec = dep.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        spec.containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    #[test]
    fn secrets_precede_plain_values() {
        let mut d = descriptor();
        d.persistence = Some(PersistenceSpec::ExternalDatabase {
            secret_name: "db-creds".into(),
            keys: vec!["db-user".into()],
            url_env: Some("DB_URL".into()),
            url_template: Some("postgres://$(DB_USER)@db".into()),
        });
        let dep = deployment(&d, true).unwrap();
        assert_eq!(
            env_names(&dep),
            vec!["DB_USER", "DB_PASSWORD", "DATABASE_URL", "DB_URL"]
        );
    }

    #[test]
    fn labels_and_scrape_annotations() {
        let dep = deployment(&descriptor(), true).unwrap();
        let labels = dep.metadata.labels.unwrap();
        assert_eq!(labels["app"], "todo-api");
        assert_eq!(labels["app.kubernetes.io/managed-by"], "shipwright");

        let template = dep.spec.unwrap().template;
        let annotations = template.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations["prometheus.io/scrape"], "true");
        assert_eq!(annotations["prometheus.io/port"], "3000");
    }

    #[test]
    fn scrape_can_be_disabled_per_service() {
        let mut d = descriptor();
        d.scrape_metrics = Some(false);
        let dep = deployment(&d, true).unwrap();
        let template = dep.spec.unwrap().template;
        let annotations = template.metadata.unwrap().annotations.unwrap_or_default();
        assert!(annotations.is_empty());
    }

    #[test]
    fn volume_claim_is_mounted() {
        let mut d = descriptor();
        d.persistence = Some(PersistenceSpec::VolumeClaim {
            size: "1Gi".into(),
            mount_path: "/data".into(),
            storage_class: None,
        });
        let dep = deployment(&d, false).unwrap();
        let pod = dep.spec.unwrap().template.spec.unwrap();
        let volume = &pod.volumes.unwrap()[0];
        assert_eq!(
            volume.persistent_volume_claim.as_ref().unwrap().claim_name,
            "todo-api-data"
        );
        assert_eq!(
            pod.containers[0].volume_mounts.as_ref().unwrap()[0].mount_path,
            "/data"
        );

        let pvc = volume_claim("todo-api", "default", "1Gi", Some("standard")).unwrap();
        assert_eq!(pvc.metadata.name.as_deref(), Some("todo-api-data"));
    }

    #[test]
    fn rejects_bad_descriptors() {
        let mut d = descriptor();
        d.name = "Todo_API".into();
        assert!(matches!(deployment(&d, true), Err(DeployError::Manifest(_))));

        let mut d = descriptor();
        d.port = 0;
        assert!(validate(&d).is_err());
    }

    #[test]
    fn service_is_node_port() {
        let svc = node_port_service("todo-api", "default", 3000).unwrap();
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.ports.unwrap()[0].port, SERVICE_PORT);
    }
}

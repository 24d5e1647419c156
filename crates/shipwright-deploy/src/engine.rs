//! The deployment engine.
//!
//! Every cluster mutation goes through `Engine::mutate`, which asks the
//! guardrails, honours dry-run and appends exactly one history entry
//! whatever the outcome. Read-only calls (rollout status, health, logs,
//! service lookup) bypass the guardrails.

use crate::cluster::Cluster;
use crate::error::{DeployError, Result};
use crate::guard::Guardrails;
use crate::health::{self, HealthReport};
use crate::history::ActionHistory;
use crate::manifest;
use crate::rollout::{RolloutOutcome, RolloutStatus};
use crate::verify::{PodReadiness, Verifier, VerifyTarget};
use chrono::Utc;
use shipwright_core::config::{DeployConfig, VerificationConfig};
use shipwright_core::deployment::{
    ActionHistoryEntry, ActionKind, ActionResult, DeployAction, DeploymentDescriptor,
    DeploymentRecord, DeploymentStatus, PersistenceSpec,
};
use shipwright_core::verification::{
    CheckDetails, CheckType, VerificationCheck, VerificationOutcome, VerificationResult,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub rollout_timeout: Duration,
    pub rollout_poll: Duration,
    pub replace_grace: Duration,
    pub restart_threshold: i32,
    pub node_address: Option<String>,
    /// Discover node addresses from the API when none is configured.
    pub in_cluster: bool,
    pub scrape_metrics: bool,
    pub log_tail_lines: i64,
    pub log_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &DeployConfig) -> Self {
        Self {
            rollout_timeout: Duration::from_secs(config.rollout_timeout_secs),
            rollout_poll: Duration::from_millis(config.rollout_poll_ms),
            replace_grace: Duration::from_millis(config.replace_grace_ms),
            restart_threshold: config.restart_threshold,
            node_address: config.node_address.clone(),
            in_cluster: std::env::var_os("KUBERNETES_SERVICE_HOST").is_some(),
            scrape_metrics: config.scrape_metrics,
            log_tail_lines: config.log_tail_lines,
            log_timeout: Duration::from_secs(config.log_timeout_secs),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&DeployConfig::default())
    }
}

/// Result of a guarded mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<T> {
    Applied(T),
    DryRun,
}

impl<T> Mutation<T> {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Mutation::DryRun)
    }
}

pub struct Engine {
    pub(crate) cluster: Arc<dyn Cluster>,
    guard: Arc<Guardrails>,
    history: Arc<ActionHistory>,
    pub(crate) settings: EngineSettings,
    verifier: Verifier,
}

impl Engine {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        guard: Arc<Guardrails>,
        settings: EngineSettings,
        verifier: Verifier,
    ) -> Self {
        Self {
            cluster,
            guard,
            history: Arc::new(ActionHistory::new()),
            settings,
            verifier,
        }
    }

    pub fn from_config(
        cluster: Arc<dyn Cluster>,
        deploy: &DeployConfig,
        verification: &VerificationConfig,
    ) -> Result<Self> {
        Ok(Self::new(
            cluster,
            Arc::new(Guardrails::from_config(deploy)),
            EngineSettings::from_config(deploy),
            Verifier::new(verification.clone())?,
        ))
    }

    pub fn guardrails(&self) -> &Arc<Guardrails> {
        &self.guard
    }

    pub fn history(&self) -> &Arc<ActionHistory> {
        &self.history
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    fn record(
        &self,
        action: ActionKind,
        namespace: &str,
        name: &str,
        result: ActionResult,
        correlation_id: Uuid,
    ) {
        self.history.record(ActionHistoryEntry {
            action,
            deployment: name.to_string(),
            namespace: namespace.to_string(),
            timestamp: Utc::now(),
            result,
            correlation_id,
        });
    }

    /// Guardrail check that records a denial.
    fn authorize(
        &self,
        action: ActionKind,
        namespace: &str,
        name: &str,
        correlation_id: Uuid,
    ) -> Result<()> {
        self.guard.check(action, namespace).inspect_err(|e| {
            warn!(%action, namespace, name, error = %e, "action denied");
            self.record(
                action,
                namespace,
                name,
                ActionResult::Denied {
                    reason: e.to_string(),
                },
                correlation_id,
            );
        })
    }

    /// Run one cluster mutation under the guardrails and record it.
    pub(crate) async fn mutate<T, F, Fut>(
        &self,
        action: ActionKind,
        namespace: &str,
        name: &str,
        op: F,
    ) -> Result<Mutation<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, String)>>,
    {
        let correlation_id = Uuid::new_v4();
        let record = |result: ActionResult| {
            self.record(action, namespace, name, result, correlation_id)
        };

        self.authorize(action, namespace, name, correlation_id)?;
        if self.guard.is_dry_run() {
            info!(%action, namespace, name, "dry run, cluster unchanged");
            record(ActionResult::DryRun);
            return Ok(Mutation::DryRun);
        }

        match op().await {
            Ok((value, detail)) => {
                info!(%action, namespace, name, %correlation_id, "{detail}");
                record(ActionResult::Succeeded { detail });
                Ok(Mutation::Applied(value))
            }
            Err(e) => {
                warn!(%action, namespace, name, %correlation_id, error = %e, "action failed");
                record(ActionResult::Failed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Poll until a deleted deployment is no longer visible. Falls back to
    /// sleeping `replace_grace` once `rollout_timeout` passes with the object
    /// still terminating.
    async fn wait_for_removal(&self, ns: &str, name: &str) -> Result<()> {
        let started = Instant::now();
        while started.elapsed() < self.settings.rollout_timeout {
            if self.cluster.get_deployment(ns, name).await?.is_none() {
                return Ok(());
            }
            tokio::time::sleep(self.settings.rollout_poll).await;
        }
        warn!(namespace = ns, name, "deployment still terminating, waiting out replace grace");
        tokio::time::sleep(self.settings.replace_grace).await;
        Ok(())
    }

    /// Create the deployment, replacing any existing one of the same name.
    pub async fn create_deployment(&self, descriptor: &DeploymentDescriptor) -> Result<DeployAction> {
        let name = descriptor.name.as_str();
        let ns = descriptor.namespace.as_str();
        let object = manifest::deployment(descriptor, self.settings.scrape_metrics)?;

        // Fail closed before touching anything else.
        self.authorize(ActionKind::CreateDeployment, ns, name, Uuid::new_v4())?;

        if let Some(PersistenceSpec::VolumeClaim {
            size,
            storage_class,
            ..
        }) = &descriptor.persistence
        {
            let claim = manifest::volume_claim(name, ns, size, storage_class.as_deref())?;
            self.mutate(ActionKind::CreateVolumeClaim, ns, name, || async {
                let created = self.cluster.ensure_volume_claim(ns, &claim).await?;
                let verb = if created { "created" } else { "kept existing" };
                Ok(((), format!("{verb} volume claim {}", manifest::claim_name(name))))
            })
            .await?;
        }

        let existing = self.cluster.get_deployment(ns, name).await?.is_some();
        if existing {
            let deleted = self
                .mutate(ActionKind::DeleteDeployment, ns, name, || async {
                    self.cluster.delete_deployment(ns, name).await?;
                    Ok(((), "deleted for replacement".to_string()))
                })
                .await?;
            if !deleted.is_dry_run() {
                self.wait_for_removal(ns, name).await?;
            }
        }

        let action = if existing {
            DeployAction::Configured
        } else {
            DeployAction::Created
        };
        let done = self
            .mutate(ActionKind::CreateDeployment, ns, name, || async {
                self.cluster.create_deployment(ns, &object).await?;
                Ok(((), format!("deployment {action} with image {}", descriptor.image)))
            })
            .await?;
        Ok(match done {
            Mutation::Applied(()) => action,
            Mutation::DryRun => DeployAction::DryRun,
        })
    }

    /// Poll until the rollout completes or `timeout` elapses.
    pub async fn wait_for_rollout(
        &self,
        name: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<RolloutOutcome> {
        let started = Instant::now();
        loop {
            let deployment = self
                .cluster
                .get_deployment(namespace, name)
                .await?
                .ok_or_else(|| DeployError::not_found("deployment", name, namespace))?;
            let status = RolloutStatus::from_deployment(&deployment);
            if status.is_complete() {
                return Ok(RolloutOutcome {
                    status,
                    complete: true,
                });
            }
            if started.elapsed() >= timeout {
                warn!(name, namespace, ?status, "rollout did not complete in time");
                return Ok(RolloutOutcome {
                    status,
                    complete: false,
                });
            }
            tokio::time::sleep(self.settings.rollout_poll.min(timeout)).await;
        }
    }

    pub async fn check_deployment_health(&self, name: &str, namespace: &str) -> Result<HealthReport> {
        let deployment = self
            .cluster
            .get_deployment(namespace, name)
            .await?
            .ok_or_else(|| DeployError::not_found("deployment", name, namespace))?;
        let desired = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        let pods = self.cluster.list_pods(namespace, name).await?;
        let report = health::evaluate(desired, ready, &pods, self.settings.restart_threshold);
        if !report.healthy {
            warn!(name, namespace, summary = %report.summary(), "deployment unhealthy");
        }
        Ok(report)
    }

    /// Bounded tail of the first pod's logs; `None` when there are no pods.
    pub async fn fetch_logs(
        &self,
        name: &str,
        namespace: &str,
        tail_lines: Option<i64>,
    ) -> Result<Option<String>> {
        let pods = self.cluster.list_pods(namespace, name).await?;
        let Some(pod) = pods.first().and_then(|p| p.metadata.name.clone()) else {
            return Ok(None);
        };
        let tail = tail_lines.unwrap_or(self.settings.log_tail_lines);
        let timeout = self.settings.log_timeout;
        let logs = tokio::time::timeout(timeout, self.cluster.pod_logs(namespace, &pod, tail))
            .await
            .map_err(|_| DeployError::Timeout {
                operation: format!("log fetch for {pod}"),
                seconds: timeout.as_secs(),
            })??;
        Ok(Some(logs))
    }

    /// Logs for diagnostics; failures are logged and swallowed.
    async fn diagnostic_logs(&self, name: &str, namespace: &str) -> Option<String> {
        match self.fetch_logs(name, namespace, None).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!(name, namespace, error = %e, "could not fetch logs");
                None
            }
        }
    }

    /// Create or replace, wait for the rollout, check health, expose.
    pub async fn deploy(&self, descriptor: &DeploymentDescriptor) -> Result<DeploymentRecord> {
        let name = descriptor.name.as_str();
        let ns = descriptor.namespace.as_str();
        let action = self.create_deployment(descriptor).await?;

        let mut record = DeploymentRecord {
            name: name.to_string(),
            namespace: ns.to_string(),
            image: descriptor.image.clone(),
            replicas: descriptor.replicas,
            port: descriptor.port,
            status: DeploymentStatus::Running,
            action,
            urls: None,
            health_path: descriptor.health_path.clone(),
            log_tail: None,
            deployed_at: Utc::now(),
        };
        if action == DeployAction::DryRun {
            record.urls = Some(self.predicted_urls(name, ns));
            return Ok(record);
        }

        let rollout = self
            .wait_for_rollout(name, ns, self.settings.rollout_timeout)
            .await?;
        let health = self.check_deployment_health(name, ns).await?;
        record.urls = Some(
            self.create_node_port_service(name, ns, descriptor.port)
                .await?,
        );

        if !(rollout.complete && health.healthy) {
            record.status = DeploymentStatus::Degraded;
            record.log_tail = self.diagnostic_logs(name, ns).await;
        }
        info!(
            name,
            namespace = ns,
            %action,
            status = %record.status,
            url = record.urls.as_ref().map(|u| u.best()).unwrap_or_default(),
            "deployment finished"
        );
        Ok(record)
    }

    /// Run the verification protocol against a deployed service.
    pub async fn verify_deployment(
        &self,
        deployment: &DeploymentRecord,
        target: VerifyTarget,
    ) -> Result<VerificationOutcome> {
        if deployment.action == DeployAction::DryRun {
            return Ok(VerificationOutcome {
                result: dry_run_result(self.verifier.config().pass_threshold),
                log_tail: None,
            });
        }

        let pod = match self
            .check_deployment_health(&deployment.name, &deployment.namespace)
            .await
        {
            Ok(report) => PodReadiness {
                ready: report.healthy,
                detail: report.summary(),
            },
            Err(e) => PodReadiness {
                ready: false,
                detail: e.to_string(),
            },
        };

        let result = self.verifier.verify(&target.with_pod(pod)).await;
        let log_tail = if result.success {
            None
        } else {
            self.diagnostic_logs(&deployment.name, &deployment.namespace)
                .await
        };
        Ok(VerificationOutcome { result, log_tail })
    }
}

fn dry_run_result(threshold: f64) -> VerificationResult {
    let check = VerificationCheck {
        check_type: CheckType::PodReadiness,
        name: "dry run".into(),
        passed: true,
        confidence: 0.0,
        duration_ms: 0,
        details: CheckDetails {
            note: Some("dry run: nothing was deployed, nothing was probed".into()),
            ..CheckDetails::default()
        },
    };
    VerificationResult::from_checks(vec![check], threshold, 0)
}

//! Pod-level health classification.

use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthIssue {
    pub pod: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub desired: i32,
    pub ready: i32,
    pub issues: Vec<HealthIssue>,
}

impl HealthReport {
    pub fn has_critical(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn summary(&self) -> String {
        let mut s = format!("{}/{} replicas ready", self.ready, self.desired);
        for issue in &self.issues {
            s.push_str(&format!("; {} {}: {}", issue.severity, issue.pod, issue.message));
        }
        s
    }
}

/// Healthy iff no pod has a critical issue and every desired replica is
/// ready.
pub fn evaluate(desired: i32, ready: i32, pods: &[Pod], restart_threshold: i32) -> HealthReport {
    let mut issues = Vec::new();
    for pod in pods {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let Some(status) = &pod.status else {
            continue;
        };
        let mut issue = |severity, message: String| {
            issues.push(HealthIssue {
                pod: name.clone(),
                severity,
                message,
            })
        };

        match status.phase.as_deref() {
            Some("Failed") => issue(Severity::Critical, "pod failed".into()),
            Some("Pending") => issue(Severity::Warning, "pod pending".into()),
            _ => {}
        }

        for container in status.container_statuses.iter().flatten() {
            if !container.ready {
                let reason = container
                    .state
                    .as_ref()
                    .and_then(|s| s.waiting.as_ref())
                    .and_then(|w| w.reason.clone())
                    .map(|r| format!(" ({r})"))
                    .unwrap_or_default();
                issue(
                    Severity::Warning,
                    format!("container '{}' not ready{reason}", container.name),
                );
            }
            let restarts = container.restart_count;
            if restarts > restart_threshold.saturating_mul(2) {
                issue(
                    Severity::Critical,
                    format!("container '{}' restarted {restarts} times", container.name),
                );
            } else if restarts > restart_threshold {
                issue(
                    Severity::Warning,
                    format!("container '{}' restarted {restarts} times", container.name),
                );
            }
        }
    }

    let healthy = ready == desired && !issues.iter().any(|i| i.severity == Severity::Critical);
    HealthReport {
        healthy,
        desired,
        ready,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::pod;

    #[test]
    fn all_ready_is_healthy() {
        let pods = vec![pod("a", "Running", true, 0), pod("b", "Running", true, 1)];
        let report = evaluate(2, 2, &pods, 3);
        assert!(report.healthy);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn failed_pod_is_critical() {
        let report = evaluate(1, 1, &[pod("a", "Failed", false, 0)], 3);
        assert!(!report.healthy);
        assert!(report.has_critical());
    }

    #[test]
    fn pending_and_unready_are_warnings() {
        let report = evaluate(1, 1, &[pod("a", "Pending", false, 0)], 3);
        assert_eq!(report.issues.len(), 2);
        assert!(!report.has_critical());
        assert!(report.healthy);
    }

    #[test]
    fn restart_thresholds() {
        let warn = evaluate(1, 1, &[pod("a", "Running", true, 4)], 3);
        assert_eq!(warn.issues[0].severity, Severity::Warning);
        assert!(warn.healthy);

        let crit = evaluate(1, 1, &[pod("a", "Running", true, 7)], 3);
        assert_eq!(crit.issues[0].severity, Severity::Critical);
        assert!(!crit.healthy);
    }

    #[test]
    fn missing_replicas_are_unhealthy() {
        let report = evaluate(2, 1, &[pod("a", "Running", true, 0)], 3);
        assert!(!report.healthy);
        assert!(report.summary().starts_with("1/2 replicas ready"));
    }
}

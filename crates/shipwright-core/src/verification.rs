//! Functional verification results.
//!
//! A `VerificationResult` is computed once from its checks and never edited
//! afterwards; the cycle stores it as-is.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    PodReadiness,
    Health,
    StaticAsset,
    ApiProxy,
    Endpoint,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckType::PodReadiness => "pod_readiness",
            CheckType::Health => "health",
            CheckType::StaticAsset => "static_asset",
            CheckType::ApiProxy => "api_proxy",
            CheckType::Endpoint => "endpoint",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Leading part of the response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_excerpt: Option<String>,
    /// Parsed JSON response body, when the response was JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Request body sent after schema discovery, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub check_type: CheckType,
    pub name: String,
    pub passed: bool,
    /// How much this verdict can be trusted, in `0.0..=1.0`.
    pub confidence: f64,
    pub duration_ms: u64,
    #[serde(default)]
    pub details: CheckDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub checks: Vec<VerificationCheck>,
    pub success: bool,
    pub pass_rate: f64,
    pub threshold: f64,
    /// Mean confidence across all checks.
    pub confidence: f64,
    pub duration_ms: u64,
}

impl VerificationResult {
    /// Aggregate checks: `success` iff `passed / total >= threshold`.
    ///
    /// An empty check list is a failure; nothing was verified.
    pub fn from_checks(checks: Vec<VerificationCheck>, threshold: f64, duration_ms: u64) -> Self {
        let total = checks.len();
        let passed = checks.iter().filter(|c| c.passed).count();
        let pass_rate = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64
        };
        let confidence = if total == 0 {
            0.0
        } else {
            checks.iter().map(|c| c.confidence.clamp(0.0, 1.0)).sum::<f64>() / total as f64
        };
        Self {
            success: total > 0 && pass_rate + f64::EPSILON >= threshold,
            checks,
            pass_rate,
            threshold,
            confidence,
            duration_ms,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &VerificationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} checks passed ({:.0}%, threshold {:.0}%)",
            self.passed_count(),
            self.checks.len(),
            self.pass_rate * 100.0,
            self.threshold * 100.0
        )
    }
}

/// What the engine hands back for a verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub result: VerificationResult,
    /// Bounded tail of the workload's logs, fetched only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_tail: Option<String>,
}

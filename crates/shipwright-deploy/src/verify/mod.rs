//! Functional verification of a running service.
//!
//! 1. Wait for the health endpoint with capped exponential backoff.
//! 2. Run the ordered plan from `endpoints::plan`, with pod readiness first.
//! 3. Body-accepting endpoints go through schema discovery before their
//!    real request.
//! 4. Each response is judged by `status::interpret`.
//!
//! The verifier never errors: a probe that cannot connect is a failed check.

pub mod endpoints;
pub mod probe;
pub mod schema;
pub mod status;

use crate::error::Result;
use endpoints::PlannedCheck;
use probe::{excerpt, ProbeResponse, Prober};
use serde_json::{json, Value};
use shipwright_core::config::VerificationConfig;
use shipwright_core::deployment::{default_health_path, EndpointSpec};
use shipwright_core::types::ServiceKind;
use shipwright_core::verification::{
    CheckDetails, CheckType, VerificationCheck, VerificationResult,
};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POD_CONFIDENCE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodReadiness {
    pub ready: bool,
    pub detail: String,
}

/// What to verify and where.
#[derive(Debug, Clone)]
pub struct VerifyTarget {
    pub base_url: String,
    pub kind: ServiceKind,
    pub health_path: String,
    pub requirement: String,
    /// Authoritative endpoints from the service directory.
    pub endpoints: Option<Vec<EndpointSpec>>,
    pub pod: Option<PodReadiness>,
}

impl VerifyTarget {
    pub fn new(base_url: impl Into<String>, kind: ServiceKind) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            kind,
            health_path: default_health_path(),
            requirement: String::new(),
            endpoints: None,
            pod: None,
        }
    }

    pub fn with_pod(mut self, pod: PodReadiness) -> Self {
        self.pod = Some(pod);
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verifier {
    prober: Prober,
    config: VerificationConfig,
}

impl Verifier {
    pub fn new(config: VerificationConfig) -> Result<Self> {
        let prober = Prober::new(Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self { prober, config })
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Poll the health endpoint until it answers 2xx. Returns whether it did.
    pub async fn wait_until_ready(&self, target: &VerifyTarget) -> bool {
        let url = target.url(&target.health_path);
        let cap = Duration::from_millis(self.config.backoff_max_ms);
        let mut delay = Duration::from_millis(self.config.backoff_initial_ms);
        let attempts = self.config.readiness_attempts.max(1);

        for attempt in 1..=attempts {
            match self.prober.send("GET", &url, None).await {
                Ok(resp) if resp.is_success() => {
                    debug!(url, attempt, "service ready");
                    return true;
                }
                Ok(resp) => debug!(url, attempt, status = resp.status, "not ready yet"),
                Err(e) => debug!(url, attempt, error = %e, "not reachable yet"),
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(cap);
            }
        }
        warn!(url, attempts, "service never became ready");
        false
    }

    pub async fn verify(&self, target: &VerifyTarget) -> VerificationResult {
        let started = Instant::now();
        self.wait_until_ready(target).await;

        let mut checks = Vec::new();
        if let Some(pod) = &target.pod {
            checks.push(VerificationCheck {
                check_type: CheckType::PodReadiness,
                name: "pod readiness".into(),
                passed: pod.ready,
                confidence: POD_CONFIDENCE,
                duration_ms: 0,
                details: CheckDetails {
                    note: Some(pod.detail.clone()),
                    ..CheckDetails::default()
                },
            });
        }
        for planned in endpoints::plan(target, &self.config) {
            checks.push(self.run(target, &planned).await);
        }

        let result = VerificationResult::from_checks(
            checks,
            self.config.pass_threshold,
            started.elapsed().as_millis() as u64,
        );
        info!(url = %target.base_url, summary = %result.summary(), success = result.success, "verification finished");
        result
    }

    async fn run(&self, target: &VerifyTarget, planned: &PlannedCheck) -> VerificationCheck {
        let started = Instant::now();
        let url = target.url(&planned.path);

        let outcome = if planned.accepts_body() {
            self.discover_and_send(&planned.method, &url).await
        } else {
            self.prober
                .send(&planned.method, &url, None)
                .await
                .map(|r| (r, None))
        };

        let mut details = CheckDetails {
            method: Some(planned.method.clone()),
            path: Some(planned.path.clone()),
            ..CheckDetails::default()
        };
        let passed = match outcome {
            Ok((resp, request_body)) => {
                let (passed, note) = self.judge(planned, &resp);
                details.status = Some(resp.status);
                details.body_excerpt = Some(resp.excerpt()).filter(|s| !s.is_empty());
                details.body = resp.json;
                details.request_body = request_body;
                details.note = note;
                passed
            }
            Err(e) => {
                details.note = Some(format!("request failed: {}", excerpt(&e.to_string())));
                false
            }
        };
        debug!(check = %planned.name, passed, "check finished");

        VerificationCheck {
            check_type: planned.check_type,
            name: planned.name.clone(),
            passed,
            confidence: planned.confidence,
            duration_ms: started.elapsed().as_millis() as u64,
            details,
        }
    }

    fn judge(&self, planned: &PlannedCheck, resp: &ProbeResponse) -> (bool, Option<String>) {
        match planned.check_type {
            CheckType::StaticAsset => {
                let ok = resp.is_success() && resp.is_html();
                (ok, (!ok).then(|| "expected an HTML page".to_string()))
            }
            // A proxy that falls through to index.html is not a proxy.
            CheckType::ApiProxy => {
                let ok = resp.is_success() && !resp.is_html();
                (ok, (!ok).then(|| "expected the API behind the same origin".to_string()))
            }
            CheckType::Health | CheckType::PodReadiness => (resp.is_success(), None),
            CheckType::Endpoint => {
                let verdict = status::interpret(
                    &planned.method,
                    &planned.path,
                    resp.status,
                    &resp.text,
                    planned.expected_status,
                    &self.config,
                );
                (verdict.passed, verdict.note)
            }
        }
    }

    /// Probe with `{}`, synthesize from the validation error, re-probe once,
    /// and send the merged body. Returns the final response and the body
    /// that produced it.
    async fn discover_and_send(
        &self,
        method: &str,
        url: &str,
    ) -> Result<(ProbeResponse, Option<Value>)> {
        let empty = json!({});
        let first = self.prober.send(method, url, Some(&empty)).await?;
        let reqs = first
            .json
            .as_ref()
            .map(schema::parse_requirements)
            .unwrap_or_default();
        if first.is_success() || reqs.is_empty() {
            return Ok((first, Some(empty)));
        }

        let mut body = schema::synthesize(&reqs, &self.config);
        debug!(url, fields = reqs.len(), "schema discovered");
        let second = self.prober.send(method, url, Some(&body)).await?;
        let more = second
            .json
            .as_ref()
            .map(schema::parse_requirements)
            .unwrap_or_default();
        if second.is_success() || more.is_empty() {
            return Ok((second, Some(body)));
        }

        schema::merge(&mut body, &more, &self.config);
        debug!(url, fields = more.len(), "schema refined");
        let last = self.prober.send(method, url, Some(&body)).await?;
        Ok((last, Some(body)))
    }
}

use crate::deployment::ActionKind;
use crate::error::Result;
use crate::paths;
use crate::policy::PhaseRetryPolicy;
use crate::types::Phase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// OrchestratorConfig
// ---------------------------------------------------------------------------

/// Upper bound, in seconds, on each phase's collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTimeouts {
    #[serde(default = "default_short_timeout")]
    pub analyzing: u64,
    #[serde(default = "default_short_timeout")]
    pub designing: u64,
    #[serde(default = "default_long_timeout")]
    pub coding: u64,
    #[serde(default = "default_long_timeout")]
    pub testing: u64,
    #[serde(default = "default_build_timeout")]
    pub building: u64,
    #[serde(default = "default_long_timeout")]
    pub deploying: u64,
    #[serde(default = "default_short_timeout")]
    pub verifying: u64,
}

fn default_short_timeout() -> u64 {
    300
}

fn default_long_timeout() -> u64 {
    600
}

fn default_build_timeout() -> u64 {
    900
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            analyzing: default_short_timeout(),
            designing: default_short_timeout(),
            coding: default_long_timeout(),
            testing: default_long_timeout(),
            building: default_build_timeout(),
            deploying: default_long_timeout(),
            verifying: default_short_timeout(),
        }
    }
}

impl PhaseTimeouts {
    pub fn for_phase(&self, phase: Phase) -> Duration {
        let secs = match phase {
            Phase::Analyzing => self.analyzing,
            Phase::Designing => self.designing,
            Phase::Coding => self.coding,
            Phase::Testing => self.testing,
            Phase::Building => self.building,
            Phase::Deploying => self.deploying,
            Phase::Verifying => self.verifying,
            Phase::Idle | Phase::Completed | Phase::Failed => default_short_timeout(),
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent_cycles")]
    pub max_concurrent_cycles: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Validate/fix rounds inside one Coding attempt.
    #[serde(default = "default_fix_attempts")]
    pub fix_attempts: u32,
    #[serde(default)]
    pub auto_commit: bool,
    #[serde(default = "default_true")]
    pub render_diagrams: bool,
    #[serde(default)]
    pub phase_timeouts: PhaseTimeouts,
}

fn default_max_concurrent_cycles() -> usize {
    2
}

fn default_max_iterations() -> u32 {
    3
}

fn default_fix_attempts() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_cycles: default_max_concurrent_cycles(),
            max_iterations: default_max_iterations(),
            fix_attempts: default_fix_attempts(),
            auto_commit: false,
            render_diagrams: true,
            phase_timeouts: PhaseTimeouts::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// DeployConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default = "default_allowed_namespaces")]
    pub allowed_namespaces: Vec<String>,
    #[serde(default = "default_allowed_actions")]
    pub allowed_actions: Vec<ActionKind>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
    #[serde(default = "default_rollout_timeout_secs")]
    pub rollout_timeout_secs: u64,
    #[serde(default = "default_rollout_poll_ms")]
    pub rollout_poll_ms: u64,
    #[serde(default = "default_replace_grace_ms")]
    pub replace_grace_ms: u64,
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold: i32,
    /// Address used to build NodePort URLs. Discovered from the cluster's
    /// nodes when unset and running in-cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_address: Option<String>,
    #[serde(default = "default_true")]
    pub scrape_metrics: bool,
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: i64,
    #[serde(default = "default_log_timeout_secs")]
    pub log_timeout_secs: u64,
}

fn default_allowed_namespaces() -> Vec<String> {
    vec![default_namespace()]
}

fn default_allowed_actions() -> Vec<ActionKind> {
    ActionKind::all().to_vec()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_rollout_timeout_secs() -> u64 {
    180
}

fn default_rollout_poll_ms() -> u64 {
    2000
}

fn default_replace_grace_ms() -> u64 {
    2000
}

fn default_restart_threshold() -> i32 {
    3
}

fn default_log_tail_lines() -> i64 {
    100
}

fn default_log_timeout_secs() -> u64 {
    15
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            allowed_namespaces: default_allowed_namespaces(),
            allowed_actions: default_allowed_actions(),
            dry_run: false,
            default_namespace: default_namespace(),
            rollout_timeout_secs: default_rollout_timeout_secs(),
            rollout_poll_ms: default_rollout_poll_ms(),
            replace_grace_ms: default_replace_grace_ms(),
            restart_threshold: default_restart_threshold(),
            node_address: None,
            scrape_metrics: true,
            log_tail_lines: default_log_tail_lines(),
            log_timeout_secs: default_log_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// VerificationConfig
// ---------------------------------------------------------------------------

/// Functional verification knobs, including the status tie-break lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "crate::deployment::default_health_path")]
    pub health_path: String,
    #[serde(default = "default_api_proxy_path")]
    pub api_proxy_path: String,
    #[serde(default = "default_auth_path_segments")]
    pub auth_path_segments: Vec<String>,
    #[serde(default = "default_auth_accept_statuses")]
    pub auth_accept_statuses: Vec<u16>,
    #[serde(default = "default_access_control_statuses")]
    pub access_control_statuses: Vec<u16>,
    #[serde(default = "default_auth_vocabulary")]
    pub auth_vocabulary: Vec<String>,
    #[serde(default = "default_duplicate_statuses")]
    pub duplicate_statuses: Vec<u16>,
    #[serde(default = "default_duplicate_vocabulary")]
    pub duplicate_vocabulary: Vec<String>,
    /// Field names treated as numeric when no declared type is available.
    #[serde(default = "default_numeric_vocabulary")]
    pub numeric_vocabulary: Vec<String>,
}

fn default_pass_threshold() -> f64 {
    0.90
}

fn default_readiness_attempts() -> u32 {
    8
}

fn default_backoff_initial_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_api_proxy_path() -> String {
    "/api/health".to_string()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_auth_path_segments() -> Vec<String> {
    strings(&[
        "auth", "login", "logout", "register", "signup", "signin", "token", "session", "oauth",
        "me",
    ])
}

fn default_auth_accept_statuses() -> Vec<u16> {
    vec![400, 401, 403, 404, 409]
}

fn default_access_control_statuses() -> Vec<u16> {
    vec![401, 403]
}

fn default_auth_vocabulary() -> Vec<String> {
    strings(&[
        "unauthorized",
        "unauthenticated",
        "forbidden",
        "authentication",
        "not authenticated",
        "token",
        "credentials",
        "permission",
        "login required",
    ])
}

fn default_duplicate_statuses() -> Vec<u16> {
    vec![400, 409, 422]
}

fn default_duplicate_vocabulary() -> Vec<String> {
    strings(&[
        "already exists",
        "duplicate",
        "unique",
        "conflict",
        "already taken",
        "already registered",
    ])
}

fn default_numeric_vocabulary() -> Vec<String> {
    strings(&[
        "price", "amount", "cost", "total", "quantity", "qty", "count", "age", "rating", "score",
        "stock", "balance", "weight", "year",
    ])
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            pass_threshold: default_pass_threshold(),
            readiness_attempts: default_readiness_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            health_path: crate::deployment::default_health_path(),
            api_proxy_path: default_api_proxy_path(),
            auth_path_segments: default_auth_path_segments(),
            auth_accept_statuses: default_auth_accept_statuses(),
            access_control_statuses: default_access_control_statuses(),
            auth_vocabulary: default_auth_vocabulary(),
            duplicate_statuses: default_duplicate_statuses(),
            duplicate_vocabulary: default_duplicate_vocabulary(),
            numeric_vocabulary: default_numeric_vocabulary(),
        }
    }
}

impl VerificationConfig {
    /// `price`, `unit_price` and `unitPrice` all count as numeric when
    /// `price` is in the vocabulary.
    pub fn is_numeric_field(&self, field: &str) -> bool {
        let lower = field.to_ascii_lowercase();
        self.numeric_vocabulary.iter().any(|w| {
            lower == *w || lower.ends_with(&format!("_{w}")) || field.ends_with(&capitalize(w))
        })
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// CollaboratorsConfig
// ---------------------------------------------------------------------------

/// Command lines for the external tool collaborators. Each command is
/// invoked as `<argv...> <operation>` and speaks JSON over stdin/stdout.
/// `default` serves every role without a dedicated entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollaboratorRole {
    Ai,
    Validator,
    Tests,
    Builder,
    Manifest,
    Diagram,
}

impl CollaboratorRole {
    pub fn all() -> &'static [CollaboratorRole] {
        &[
            CollaboratorRole::Ai,
            CollaboratorRole::Validator,
            CollaboratorRole::Tests,
            CollaboratorRole::Builder,
            CollaboratorRole::Manifest,
            CollaboratorRole::Diagram,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CollaboratorRole::Ai => "ai",
            CollaboratorRole::Validator => "validator",
            CollaboratorRole::Tests => "tests",
            CollaboratorRole::Builder => "builder",
            CollaboratorRole::Manifest => "manifest",
            CollaboratorRole::Diagram => "diagram",
        }
    }
}

impl CollaboratorsConfig {
    pub fn argv_for(&self, role: CollaboratorRole) -> Option<&[String]> {
        let specific = match role {
            CollaboratorRole::Ai => &self.ai,
            CollaboratorRole::Validator => &self.validator,
            CollaboratorRole::Tests => &self.tests,
            CollaboratorRole::Builder => &self.builder,
            CollaboratorRole::Manifest => &self.manifest,
            CollaboratorRole::Diagram => &self.diagram,
        };
        specific
            .as_deref()
            .or(self.default.as_deref())
            .filter(|argv| !argv.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Per-phase overrides layered over the built-in retry policies.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub retry: BTreeMap<Phase, PhaseRetryPolicy>,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
}

impl Config {
    /// Load `.shipwright/config.yaml`; a missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        if self.orchestrator.max_concurrent_cycles == 0 {
            push(
                WarnLevel::Error,
                "orchestrator.max_concurrent_cycles is 0; no cycle can ever start".into(),
            );
        }
        if self.orchestrator.max_iterations == 0 {
            push(
                WarnLevel::Error,
                "orchestrator.max_iterations is 0; every verification failure is final".into(),
            );
        }

        for (phase, policy) in &self.retry {
            if policy.escalate_to > *phase || policy.escalate_to.is_terminal() {
                push(
                    WarnLevel::Warning,
                    format!(
                        "retry.{phase} escalates to '{}', which is not behind it; ignored",
                        policy.escalate_to
                    ),
                );
            }
            if policy.max_retries > 10 {
                push(
                    WarnLevel::Warning,
                    format!(
                        "retry.{phase} has max_retries={} (>10 is unusual)",
                        policy.max_retries
                    ),
                );
            }
        }

        if self.deploy.allowed_namespaces.is_empty() {
            push(
                WarnLevel::Error,
                "deploy.allowed_namespaces is empty; every deployment will be denied".into(),
            );
        }
        if !self
            .deploy
            .allowed_namespaces
            .contains(&self.deploy.default_namespace)
        {
            push(
                WarnLevel::Warning,
                format!(
                    "deploy.default_namespace '{}' is not in allowed_namespaces",
                    self.deploy.default_namespace
                ),
            );
        }
        for ns in &self.deploy.allowed_namespaces {
            if paths::validate_name(ns).is_err() {
                push(
                    WarnLevel::Warning,
                    format!("deploy.allowed_namespaces contains invalid name '{ns}'"),
                );
            }
        }
        if !self
            .deploy
            .allowed_actions
            .contains(&ActionKind::CreateDeployment)
        {
            push(
                WarnLevel::Warning,
                "deploy.allowed_actions excludes create_deployment; cycles cannot deploy".into(),
            );
        }
        if self.deploy.restart_threshold <= 0 {
            push(
                WarnLevel::Warning,
                "deploy.restart_threshold should be positive".into(),
            );
        }

        let t = self.verification.pass_threshold;
        if !(t > 0.0 && t <= 1.0) {
            push(
                WarnLevel::Error,
                format!("verification.pass_threshold {t} must be in (0, 1]"),
            );
        }
        if self.verification.readiness_attempts == 0 {
            push(
                WarnLevel::Warning,
                "verification.readiness_attempts is 0; readiness is never awaited".into(),
            );
        }
        if !self.verification.health_path.starts_with('/') {
            push(
                WarnLevel::Warning,
                format!(
                    "verification.health_path '{}' should start with '/'",
                    self.verification.health_path
                ),
            );
        }

        for role in CollaboratorRole::all() {
            if self.collaborators.argv_for(*role).is_none() {
                let level = if *role == CollaboratorRole::Diagram {
                    WarnLevel::Warning
                } else {
                    WarnLevel::Error
                };
                push(
                    level,
                    format!("no command configured for collaborator '{}'", role.as_str()),
                );
            }
        }

        warnings
    }

    pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
        warnings.iter().any(|w| w.level == WarnLevel::Error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn with_tool(mut cfg: Config) -> Config {
        cfg.collaborators.default = Some(vec!["shipwright-tools".into()]);
        cfg
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.orchestrator.max_concurrent_cycles, 2);
        assert_eq!(cfg.orchestrator.max_iterations, 3);
        assert_eq!(cfg.deploy.allowed_namespaces, vec!["default".to_string()]);
        assert_eq!(cfg.deploy.rollout_poll_ms, 2000);
        assert_eq!(cfg.deploy.log_tail_lines, 100);
        assert!((cfg.verification.pass_threshold - 0.90).abs() < f64::EPSILON);
        assert_eq!(cfg.verification.readiness_attempts, 8);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "deploy:\n  allowed_namespaces: [apps, sandbox]\n  dry_run: true\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.deploy.dry_run);
        assert_eq!(cfg.deploy.allowed_namespaces.len(), 2);
        assert_eq!(cfg.deploy.replace_grace_ms, 2000);
        assert_eq!(cfg.verification.duplicate_statuses, vec![400, 409, 422]);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut cfg = with_tool(Config::default());
        cfg.retry.insert(
            Phase::Building,
            PhaseRetryPolicy {
                max_retries: 1,
                escalate_to: Phase::Building,
            },
        );
        cfg.save(dir.path()).unwrap();
        let back = Config::load(dir.path()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn default_with_tool_is_clean() {
        let warnings = with_tool(Config::default()).validate();
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn missing_collaborators_are_errors() {
        let warnings = Config::default().validate();
        assert!(Config::has_errors(&warnings));
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("'diagram'") && w.level == WarnLevel::Warning));
    }

    #[test]
    fn bad_threshold_and_forward_retry_flagged() {
        let mut cfg = with_tool(Config::default());
        cfg.verification.pass_threshold = 1.5;
        cfg.retry.insert(
            Phase::Coding,
            PhaseRetryPolicy {
                max_retries: 2,
                escalate_to: Phase::Deploying,
            },
        );
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.message.contains("pass_threshold")));
        assert!(warnings.iter().any(|w| w.message.contains("retry.coding")));
    }

    #[test]
    fn numeric_vocabulary_matches_suffixes() {
        let v = VerificationConfig::default();
        assert!(v.is_numeric_field("price"));
        assert!(v.is_numeric_field("unit_price"));
        assert!(v.is_numeric_field("unitPrice"));
        assert!(!v.is_numeric_field("name"));
        assert!(!v.is_numeric_field("description"));
    }

    #[test]
    fn role_falls_back_to_default_command() {
        let mut c = CollaboratorsConfig::default();
        assert!(c.argv_for(CollaboratorRole::Ai).is_none());
        c.default = Some(vec!["tools".into()]);
        c.builder = Some(vec!["docker-tool".into(), "--push".into()]);
        assert_eq!(c.argv_for(CollaboratorRole::Ai).unwrap(), ["tools".to_string()]);
        assert_eq!(c.argv_for(CollaboratorRole::Builder).unwrap().len(), 2);
    }
}

//! Failure-context extraction.
//!
//! Turns the raw signals of a failed phase (failed verification checks,
//! compiler output, test output, a crashing container's log tail) into a
//! short list of directives that the next code-generation attempt receives
//! as constraints.

use crate::config::VerificationConfig;
use crate::cycle::Cycle;
use crate::types::Phase;
use crate::verification::VerificationCheck;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

pub const MAX_ITEMS: usize = 20;
const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Verification,
    Validation,
    Test,
    Build,
    Deployment,
    Runtime,
    Unknown,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCategory::Verification => "verification",
            FailureCategory::Validation => "validation",
            FailureCategory::Test => "test",
            FailureCategory::Build => "build",
            FailureCategory::Deployment => "deployment",
            FailureCategory::Runtime => "runtime",
            FailureCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureContext {
    pub category: FailureCategory,
    pub items: Vec<String>,
    pub primary_error: Option<String>,
}

impl FailureContext {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Directives for the code generator, most important first.
    pub fn constraints(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.items.len() + 1);
        if let Some(primary) = &self.primary_error {
            let line = format!("[PRIMARY] {primary}");
            if !self.items.contains(&line) {
                out.push(line);
            }
        }
        out.extend(self.items.iter().cloned());
        out.truncate(MAX_ITEMS);
        out
    }

    fn push(&mut self, item: String) {
        if self.items.len() < MAX_ITEMS && !self.items.contains(&item) {
            self.items.push(item);
        }
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

static COMPILER_RE: OnceLock<Regex> = OnceLock::new();
static CRASH_RE: OnceLock<Regex> = OnceLock::new();

fn compiler_re() -> &'static Regex {
    COMPILER_RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<file>[^\s()]+)\((?P<line>\d+),(?P<col>\d+)\):\s*error\s+(?P<code>[A-Za-z]+\d+):\s*(?P<msg>.+)$")
            .expect("compiler pattern compiles")
    })
}

fn crash_re() -> &'static Regex {
    CRASH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)(uncaught|unhandled|panicked|fatal|segmentation fault|traceback|exception|cannot find module|eaddrinuse|econnrefused|syntaxerror|typeerror|referenceerror|error:)",
        )
        .expect("crash pattern compiles")
    })
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Build the failure context for the phase that most recently failed.
pub fn extract(cycle: &Cycle, verification: &VerificationConfig) -> FailureContext {
    let failed_phase = cycle.error.as_ref().map(|e| e.phase).or_else(|| {
        cycle
            .verification
            .as_ref()
            .filter(|v| !v.success)
            .map(|_| Phase::Verifying)
    });

    let category = match failed_phase {
        Some(Phase::Verifying) => FailureCategory::Verification,
        Some(Phase::Coding) => FailureCategory::Validation,
        Some(Phase::Testing) => FailureCategory::Test,
        Some(Phase::Building) => FailureCategory::Build,
        Some(Phase::Deploying) => FailureCategory::Deployment,
        _ => FailureCategory::Unknown,
    };
    let mut ctx = FailureContext {
        category,
        items: Vec::new(),
        primary_error: None,
    };

    match category {
        FailureCategory::Verification => {
            if let Some(v) = &cycle.verification {
                for check in v.failed_checks() {
                    ctx.push(verification_item(check));
                }
                for check in v.failed_checks() {
                    for fix in type_fixes(check, verification) {
                        ctx.push(fix);
                    }
                }
            }
        }
        FailureCategory::Validation => {
            compiler_items(&cycle.validation_errors.join("\n"), &mut ctx);
        }
        FailureCategory::Test => {
            if let Some(t) = &cycle.tests {
                compiler_items(&t.output, &mut ctx);
            }
        }
        FailureCategory::Build => {
            if let Some(b) = &cycle.build {
                compiler_items(&b.log, &mut ctx);
            }
        }
        _ => {}
    }

    if let Some(tail) = cycle.deployment.as_ref().and_then(|d| d.log_tail.as_deref()) {
        if matches!(
            category,
            FailureCategory::Verification | FailureCategory::Deployment
        ) {
            let crashes = crash_lines(tail);
            if let Some(first) = crashes.first() {
                ctx.primary_error = Some(first.clone());
                if category == FailureCategory::Deployment {
                    ctx.category = FailureCategory::Runtime;
                }
            }
            for line in crashes {
                ctx.push(format!("[RUNTIME] {line}"));
            }
        }
    }

    if let Some(err) = &cycle.error {
        if ctx.items.is_empty() {
            ctx.push(format!("[ERROR] {}", err.message));
        }
    }
    if ctx.primary_error.is_none() {
        ctx.primary_error = ctx.items.first().cloned();
    }
    ctx
}

fn verification_item(check: &VerificationCheck) -> String {
    let d = &check.details;
    let evidence = match (d.status, &d.body_excerpt, &d.note) {
        (Some(status), Some(body), _) if !body.is_empty() => {
            format!("status {status}: {}", truncate(body))
        }
        (Some(status), _, _) => format!("status {status}"),
        (None, _, Some(note)) => truncate(note),
        (None, Some(body), None) => truncate(body),
        (None, None, None) => "no response".to_string(),
    };
    format!("[VERIFICATION] {}: FAILED — {evidence}", check.name)
}

/// `[TYPE FIX]` directives for numeric-sounding fields whose type the
/// service rejected or echoed back wrongly.
fn type_fixes(check: &VerificationCheck, cfg: &VerificationConfig) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(body) = &check.details.body {
        let mut issues = Vec::new();
        collect_type_issues(body, &mut issues);
        for (field, expected, received) in issues {
            if !cfg.is_numeric_field(&field) {
                continue;
            }
            let expected_numeric = matches!(expected.as_deref(), Some("number" | "integer"));
            let received_str = received.as_deref().unwrap_or("a non-numeric value");
            if expected_numeric || received.as_deref() == Some("string") {
                out.push(format!(
                    "[TYPE FIX] '{field}' must be a JSON number, not a string (service received {received_str}); \
                     accept numeric input and return it as a number"
                ));
            }
        }
        // A response that echoes a numeric field back as a string.
        for (field, value) in string_valued_fields(body) {
            if cfg.is_numeric_field(&field) && value.trim().parse::<f64>().is_ok() {
                out.push(format!(
                    "[TYPE FIX] '{field}' is returned as the string \"{value}\"; store and return it as a JSON number"
                ));
            }
        }
    }
    out.dedup();
    out
}

/// Walk a JSON error body for zod-style `{path, expected, received}` and
/// `{field, type}` entries.
fn collect_type_issues(value: &Value, out: &mut Vec<(String, Option<String>, Option<String>)>) {
    match value {
        Value::Object(map) => {
            let field = match (map.get("path"), map.get("field")) {
                (Some(Value::Array(parts)), _) => parts.last().map(|p| match p {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
                (Some(Value::String(s)), _) => Some(s.clone()),
                (_, Some(Value::String(s))) => Some(s.clone()),
                _ => None,
            };
            let expected = map
                .get("expected")
                .or_else(|| map.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let received = map
                .get("received")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let (Some(field), true) = (field, expected.is_some() || received.is_some()) {
                out.push((field, expected, received));
            }
            for v in map.values() {
                collect_type_issues(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_type_issues(v, out);
            }
        }
        _ => {}
    }
}

fn string_valued_fields(value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let objects: Vec<&serde_json::Map<String, Value>> = match value {
        Value::Object(m) => vec![m],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    };
    for obj in objects {
        for (k, v) in obj {
            if let Value::String(s) = v {
                out.push((k.clone(), s.clone()));
            }
        }
    }
    out
}

fn compiler_items(output: &str, ctx: &mut FailureContext) {
    let mut matched = false;
    for line in output.lines() {
        if let Some(caps) = compiler_re().captures(line) {
            matched = true;
            ctx.push(format!(
                "[COMPILE] {}:{}:{} {}: {}",
                &caps["file"],
                &caps["line"],
                &caps["col"],
                &caps["code"],
                caps["msg"].trim()
            ));
        }
    }
    if matched {
        return;
    }
    for line in output.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && trimmed.to_ascii_lowercase().contains("error") {
            ctx.push(format!("[ERROR] {}", truncate(trimmed)));
        }
    }
}

fn crash_lines(log: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in log.lines() {
        let trimmed = line.trim();
        if crash_re().is_match(trimmed) && !out.iter().any(|l| l == trimmed) {
            out.push(truncate(trimmed));
        }
    }
    out
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let mut s: String = text.chars().take(EXCERPT_CHARS).collect();
    s.push('…');
    s
}

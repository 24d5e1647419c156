//! Building the ordered check plan.

use super::VerifyTarget;
use regex::Regex;
use shipwright_core::config::VerificationConfig;
use shipwright_core::deployment::EndpointSpec;
use shipwright_core::verification::CheckType;
use std::collections::BTreeSet;
use std::sync::OnceLock;

pub const HEALTH_CONFIDENCE: f64 = 0.95;
pub const STATIC_CONFIDENCE: f64 = 0.9;
pub const PROXY_CONFIDENCE: f64 = 0.85;
pub const DIRECTORY_CONFIDENCE: f64 = 0.95;
pub const INFERRED_CONFIDENCE: f64 = 0.6;

const MAX_INFERRED_RESOURCES: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCheck {
    pub check_type: CheckType,
    pub name: String,
    pub method: String,
    /// Concrete path, parameters already filled in.
    pub path: String,
    pub expected_status: Option<u16>,
    pub weight: f64,
    pub confidence: f64,
}

impl PlannedCheck {
    fn get(check_type: CheckType, name: &str, path: &str, weight: f64, confidence: f64) -> Self {
        Self {
            check_type,
            name: name.to_string(),
            method: "GET".into(),
            path: path.to_string(),
            expected_status: None,
            weight,
            confidence,
        }
    }

    pub fn accepts_body(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH")
    }
}

fn param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?::[A-Za-z_]\w*|\{[^/}]+\}|\[[^/\]]+\]|<[^/>]+>)$").expect("param regex compiles")
    })
}

fn explicit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(GET|POST|PUT|PATCH|DELETE)\s+(/[A-Za-z0-9_\-/:{}\[\].]*)")
            .expect("endpoint regex compiles")
    })
}

fn resource_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:manag(?:e|es|ing)|track(?:s|ing)?|list(?:s|ing)?|stor(?:e|es|ing)|creat(?:e|es|ing)|add(?:s|ing)?|crud\s+(?:for|of|on))\s+(?:(?:a|an|the|their|user|users'?|new)\s+)?([a-z][a-z-]{2,})",
        )
        .expect("resource regex compiles")
    })
}

/// Replace `:id`, `{id}`, `[id]` and `<id>` segments with `1`.
pub fn concrete_path(path: &str) -> String {
    path.split('/')
        .map(|seg| if param_re().is_match(seg) { "1" } else { seg })
        .collect::<Vec<_>>()
        .join("/")
}

fn pluralize(word: &str) -> String {
    let word = word.to_ascii_lowercase();
    if word.ends_with('s') {
        word
    } else if let Some(stem) = word.strip_suffix('y') {
        if stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            format!("{word}s")
        } else {
            format!("{stem}ies")
        }
    } else {
        format!("{word}s")
    }
}

const NOT_RESOURCES: &[&str] = &[
    "api", "apis", "app", "application", "service", "server", "backend", "frontend", "simple",
    "basic", "small", "data", "rest", "restful", "endpoint", "endpoints", "and", "with",
];

/// Best-effort endpoint list from free-form requirement text.
///
/// Explicit `METHOD /path` mentions win; otherwise each resource noun after
/// a verb like "manage" or "track" yields `GET` and `POST` on `/api/<plural>`.
pub fn infer_from_requirement(text: &str) -> Vec<EndpointSpec> {
    let mut seen = BTreeSet::new();
    let explicit: Vec<EndpointSpec> = explicit_re()
        .captures_iter(text)
        .filter_map(|c| {
            let method = c[1].to_string();
            let path = c[2].trim_end_matches('.').to_string();
            seen.insert((method.clone(), path.clone()))
                .then(|| EndpointSpec::new(&method, path))
        })
        .collect();
    if !explicit.is_empty() {
        return explicit;
    }

    let mut resources = Vec::new();
    for c in resource_re().captures_iter(text) {
        let noun = c[1].to_ascii_lowercase();
        if NOT_RESOURCES.contains(&noun.as_str()) {
            continue;
        }
        let plural = pluralize(&noun);
        if !resources.contains(&plural) {
            resources.push(plural);
        }
        if resources.len() == MAX_INFERRED_RESOURCES {
            break;
        }
    }
    resources
        .iter()
        .flat_map(|r| {
            let path = format!("/api/{r}");
            [EndpointSpec::new("GET", path.clone()), EndpointSpec::new("POST", path)]
        })
        .collect()
}

/// Ordered by weight, heaviest first; pod readiness is prepended by the
/// verifier.
pub fn plan(target: &VerifyTarget, config: &VerificationConfig) -> Vec<PlannedCheck> {
    let health_path = target.health_path.as_str();
    let mut checks = vec![PlannedCheck::get(
        CheckType::Health,
        "health endpoint",
        health_path,
        2.0,
        HEALTH_CONFIDENCE,
    )];

    if target.kind.serves_browser() {
        checks.push(PlannedCheck::get(
            CheckType::StaticAsset,
            "static assets",
            "/",
            1.5,
            STATIC_CONFIDENCE,
        ));
        checks.push(PlannedCheck::get(
            CheckType::ApiProxy,
            "api proxy",
            &config.api_proxy_path,
            1.5,
            PROXY_CONFIDENCE,
        ));
    }

    if target.kind.serves_api() {
        let (endpoints, confidence) = match &target.endpoints {
            Some(declared) if !declared.is_empty() => (declared.clone(), DIRECTORY_CONFIDENCE),
            _ => (
                infer_from_requirement(&target.requirement),
                INFERRED_CONFIDENCE,
            ),
        };
        for ep in endpoints {
            let method = ep.method.to_ascii_uppercase();
            let path = concrete_path(&ep.path);
            if method == "GET" && path == health_path {
                continue;
            }
            checks.push(PlannedCheck {
                check_type: CheckType::Endpoint,
                name: format!("{method} {}", ep.path),
                method,
                path,
                expected_status: ep.expected_status,
                weight: 1.0,
                confidence,
            });
        }
    }

    checks.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_core::types::ServiceKind;

    #[test]
    fn fills_path_parameters() {
        assert_eq!(concrete_path("/api/items/:id"), "/api/items/1");
        assert_eq!(concrete_path("/api/users/{userId}/posts/[slug]"), "/api/users/1/posts/1");
        assert_eq!(concrete_path("/api/items"), "/api/items");
    }

    #[test]
    fn explicit_endpoints_win() {
        let eps = infer_from_requirement(
            "A todo API. GET /api/todos lists todos, POST /api/todos creates one, DELETE /api/todos/:id.",
        );
        let names: Vec<String> = eps.iter().map(|e| format!("{} {}", e.method, e.path)).collect();
        assert_eq!(
            names,
            vec!["GET /api/todos", "POST /api/todos", "DELETE /api/todos/:id"]
        );
    }

    #[test]
    fn resources_from_prose() {
        let eps = infer_from_requirement("Build a service to manage inventory and track deliveries");
        let paths: BTreeSet<&str> = eps.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains("/api/inventories"));
        assert!(paths.contains("/api/deliveries"));
        assert_eq!(eps.len(), 4);
    }

    #[test]
    fn nothing_inferred_from_vague_text() {
        assert!(infer_from_requirement("make it fast").is_empty());
    }

    fn target(kind: ServiceKind, endpoints: Option<Vec<EndpointSpec>>) -> VerifyTarget {
        VerifyTarget {
            endpoints,
            requirement: "manage books".into(),
            ..VerifyTarget::new("http://svc", kind)
        }
    }

    #[test]
    fn directory_endpoints_are_authoritative() {
        let eps = vec![
            EndpointSpec::new("GET", "/health"),
            EndpointSpec::new("GET", "/api/books/:id"),
        ];
        let checks = plan(&target(ServiceKind::Api, Some(eps)), &VerificationConfig::default());
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].check_type, CheckType::Health);
        assert_eq!(checks[1].path, "/api/books/1");
        assert_eq!(checks[1].confidence, DIRECTORY_CONFIDENCE);
    }

    #[test]
    fn inferred_endpoints_are_less_trusted() {
        let checks = plan(&target(ServiceKind::Api, None), &VerificationConfig::default());
        let endpoint = checks.iter().find(|c| c.check_type == CheckType::Endpoint).unwrap();
        assert_eq!(endpoint.path, "/api/books");
        assert_eq!(endpoint.confidence, INFERRED_CONFIDENCE);
    }

    #[test]
    fn browser_services_get_static_and_proxy_checks() {
        let web = plan(&target(ServiceKind::Web, None), &VerificationConfig::default());
        let types: Vec<CheckType> = web.iter().map(|c| c.check_type).collect();
        assert_eq!(
            types,
            vec![CheckType::Health, CheckType::StaticAsset, CheckType::ApiProxy]
        );

        let full = plan(&target(ServiceKind::Fullstack, None), &VerificationConfig::default());
        assert!(full.iter().any(|c| c.check_type == CheckType::Endpoint));
        assert_eq!(full.last().unwrap().check_type, CheckType::Endpoint);
    }
}

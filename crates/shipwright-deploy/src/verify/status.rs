//! Pass/fail interpretation of an endpoint's status code.
//!
//! Rules apply in a fixed order; the first that matches decides:
//!
//! 1. auth-flavoured path answering with an auth-accept status
//! 2. access-control status whose body speaks auth vocabulary
//! 3. POST answering a duplicate status whose body speaks duplicate vocabulary
//! 4. the expected status, or any 2xx

use shipwright_core::config::VerificationConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub note: Option<String>,
}

impl Verdict {
    fn pass(note: &str) -> Self {
        Self {
            passed: true,
            note: Some(note.to_string()),
        }
    }
}

pub fn is_auth_path(path: &str, config: &VerificationConfig) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.split(['/', '-', '_'])
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
        .any(|token| {
            let singular = token.strip_suffix('s').unwrap_or(token.as_str());
            config
                .auth_path_segments
                .iter()
                .any(|a| *a == token || a == singular)
        })
}

fn mentions(body: &str, vocabulary: &[String]) -> bool {
    let lower = body.to_ascii_lowercase();
    vocabulary.iter().any(|w| lower.contains(&w.to_ascii_lowercase()))
}

pub fn interpret(
    method: &str,
    path: &str,
    status: u16,
    body: &str,
    expected: Option<u16>,
    config: &VerificationConfig,
) -> Verdict {
    if is_auth_path(path, config) && config.auth_accept_statuses.contains(&status) {
        return Verdict::pass("auth endpoint rejected an anonymous probe as expected");
    }
    if config.access_control_statuses.contains(&status) && mentions(body, &config.auth_vocabulary) {
        return Verdict::pass("endpoint is protected by access control");
    }
    if method.eq_ignore_ascii_case("POST")
        && config.duplicate_statuses.contains(&status)
        && mentions(body, &config.duplicate_vocabulary)
    {
        return Verdict::pass("resource already exists from an earlier probe");
    }
    let passed = Some(status) == expected || (200..300).contains(&status);
    Verdict { passed, note: None }
}

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Analyzing,
    Designing,
    Coding,
    Testing,
    Building,
    Deploying,
    Verifying,
    Completed,
    Failed,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Idle,
            Phase::Analyzing,
            Phase::Designing,
            Phase::Coding,
            Phase::Testing,
            Phase::Building,
            Phase::Deploying,
            Phase::Verifying,
            Phase::Completed,
            Phase::Failed,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// The forward successor on the happy path. `Verifying` leads to
    /// `Completed`; terminal phases have none.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Idle => Some(Phase::Analyzing),
            Phase::Analyzing => Some(Phase::Designing),
            Phase::Designing => Some(Phase::Coding),
            Phase::Coding => Some(Phase::Testing),
            Phase::Testing => Some(Phase::Building),
            Phase::Building => Some(Phase::Deploying),
            Phase::Deploying => Some(Phase::Verifying),
            Phase::Verifying => Some(Phase::Completed),
            Phase::Completed | Phase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Analyzing => "analyzing",
            Phase::Designing => "designing",
            Phase::Coding => "coding",
            Phase::Testing => "testing",
            Phase::Building => "building",
            Phase::Deploying => "deploying",
            Phase::Verifying => "verifying",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = crate::error::ShipwrightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| crate::error::ShipwrightError::InvalidPhase(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ServiceKind
// ---------------------------------------------------------------------------

/// What the generated service exposes. Drives which functional checks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    #[default]
    Api,
    Web,
    Fullstack,
}

impl ServiceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Api => "api",
            ServiceKind::Web => "web",
            ServiceKind::Fullstack => "fullstack",
        }
    }

    pub fn serves_browser(self) -> bool {
        matches!(self, ServiceKind::Web | ServiceKind::Fullstack)
    }

    pub fn serves_api(self) -> bool {
        matches!(self, ServiceKind::Api | ServiceKind::Fullstack)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceKind {
    type Err = crate::error::ShipwrightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(ServiceKind::Api),
            "web" => Ok(ServiceKind::Web),
            "fullstack" | "full-stack" => Ok(ServiceKind::Fullstack),
            _ => Err(crate::error::ShipwrightError::Configuration(format!(
                "unknown service kind '{s}': must be api, web, or fullstack"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// Turn free text into a DNS-1123 label usable as a Kubernetes object name.
///
/// Lowercase alphanumerics and single hyphens, no leading/trailing hyphen,
/// at most 63 characters. Returns an empty string when nothing survives.
pub fn dns_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.truncate(63);
    out.trim_matches('-').to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn phase_ordering() {
        assert!(Phase::Idle < Phase::Analyzing);
        assert!(Phase::Coding < Phase::Testing);
        assert!(Phase::Verifying < Phase::Completed);
    }

    #[test]
    fn forward_path_visits_every_active_phase() {
        let mut seen = vec![Phase::Idle];
        let mut cur = Phase::Idle;
        while let Some(n) = cur.next() {
            seen.push(n);
            cur = n;
        }
        assert_eq!(cur, Phase::Completed);
        assert!(seen.contains(&Phase::Testing));
        assert!(seen.contains(&Phase::Building));
        assert!(!seen.contains(&Phase::Failed));
    }

    #[test]
    fn phase_roundtrip() {
        for phase in Phase::all() {
            assert_eq!(Phase::from_str(phase.as_str()).unwrap(), *phase);
        }
        assert!(Phase::from_str("shipping").is_err());
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Completed.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Verifying.is_terminal());
        assert_eq!(Phase::Failed.next(), None);
    }

    #[test]
    fn service_kind_flags() {
        assert!(ServiceKind::Fullstack.serves_api());
        assert!(ServiceKind::Fullstack.serves_browser());
        assert!(!ServiceKind::Api.serves_browser());
        assert_eq!(ServiceKind::from_str("web").unwrap(), ServiceKind::Web);
    }

    #[test]
    fn dns_label_normalizes() {
        assert_eq!(dns_label("Todo List API!"), "todo-list-api");
        assert_eq!(dns_label("--Hello__World--"), "hello-world");
        assert_eq!(dns_label("???"), "");
        assert!(dns_label(&"a".repeat(100)).len() <= 63);
    }
}

use crate::types::Phase;
use thiserror::Error;

/// Coarse classification used by the control loop when deciding whether a
/// failed phase may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Disallowed namespace or action, bad settings. Fails closed.
    Configuration,
    /// Timeouts and connection failures.
    TransientInfra,
    /// Generated code failed static checks or its tests.
    Validation,
    /// The deployed instance misbehaves.
    Verification,
    /// Concurrency or iteration cap reached.
    Exhaustion,
    /// A bug in the caller: illegal transition, missing prerequisite.
    Programmer,
    /// An external collaborator reported a failure.
    Collaborator,
    /// Local persistence failed.
    Storage,
}

#[derive(Debug, Error)]
pub enum ShipwrightError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transient infrastructure error: {0}")]
    TransientInfra(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("tests failed: {0}")]
    TestsFailed(String),

    #[error("deployment unhealthy: {0}")]
    DeploymentUnhealthy(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("exhausted: {0}")]
    Exhausted(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: Phase,
        to: Phase,
        reason: String,
    },

    #[error("invalid phase: {0}")]
    InvalidPhase(String),

    #[error("phase '{phase}' requires {what}, which is missing")]
    MissingPrerequisite { phase: Phase, what: String },

    #[error("cycle not found: {0}")]
    CycleNotFound(String),

    #[error("collaborator '{name}' failed: {message}")]
    Collaborator { name: String, message: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ShipwrightError {
    pub fn collaborator(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::TransientInfra(_) | Self::Timeout { .. } => ErrorKind::TransientInfra,
            Self::Validation(_) | Self::TestsFailed(_) => ErrorKind::Validation,
            Self::DeploymentUnhealthy(_) | Self::VerificationFailed(_) => {
                ErrorKind::Verification
            }
            Self::Exhausted(_) => ErrorKind::Exhaustion,
            Self::InvalidTransition { .. }
            | Self::InvalidPhase(_)
            | Self::MissingPrerequisite { .. }
            | Self::CycleNotFound(_) => ErrorKind::Programmer,
            Self::Collaborator { .. } => ErrorKind::Collaborator,
            Self::Io(_) | Self::Yaml(_) | Self::Json(_) => ErrorKind::Storage,
        }
    }

    /// Errors that must never be retried, whatever the phase policy says.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::Exhaustion | ErrorKind::Programmer
        )
    }
}

pub type Result<T> = std::result::Result<T, ShipwrightError>;

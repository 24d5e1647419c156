use shipwright_core::deployment::ActionKind;
use shipwright_core::ShipwrightError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("namespace '{0}' is not in the allowlist")]
    NamespaceNotAllowed(String),

    #[error("action '{0}' is not allowed")]
    ActionNotAllowed(ActionKind),

    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: &'static str,
        name: String,
        namespace: String,
    },

    #[error("no previous revision of '{0}' to roll back to")]
    NoPreviousRevision(String),

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    pub fn not_found(kind: &'static str, name: &str, namespace: &str) -> Self {
        Self::NotFound {
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Guardrail denials, and RBAC refusals from the API server.
    pub fn is_forbidden(&self) -> bool {
        match self {
            Self::NamespaceNotAllowed(_) | Self::ActionNotAllowed(_) => true,
            Self::Kube(kube::Error::Api(resp)) => resp.code == 403,
            _ => false,
        }
    }
}

impl From<DeployError> for ShipwrightError {
    fn from(e: DeployError) -> Self {
        if e.is_forbidden() {
            return ShipwrightError::Configuration(e.to_string());
        }
        match e {
            DeployError::NoPreviousRevision(_) => ShipwrightError::Configuration(e.to_string()),
            DeployError::Manifest(msg) => ShipwrightError::Validation(msg),
            DeployError::Timeout { operation, seconds } => {
                ShipwrightError::Timeout { operation, seconds }
            }
            DeployError::Json(e) => ShipwrightError::Json(e),
            DeployError::NotFound { .. } | DeployError::Kube(_) | DeployError::Http(_) => {
                ShipwrightError::TransientInfra(e.to_string())
            }
            DeployError::NamespaceNotAllowed(_) | DeployError::ActionNotAllowed(_) => {
                ShipwrightError::Configuration(e.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;

//! Error types for stratum-kube

use kube::runtime::finalizer;
use stratum_core::{CoreError, ErrorClass};
use thiserror::Error;

/// Result type for stratum-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while orchestrating components
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Catalog, values or version error
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The package tool reported a failure
    #[error("package tool failed for release '{release}': {message}")]
    PackageTool { release: String, message: String },

    /// A resource owned by someone else blocks the install
    #[error("release '{release}' conflicts with an existing resource: {message}")]
    Conflict { release: String, message: String },

    /// Component hook failed
    #[error("{phase} hook failed for component '{component}': {message}")]
    Hook {
        component: String,
        phase: String,
        message: String,
    },

    /// Timeout
    #[error("operation timed out after {0}")]
    Timeout(String),

    /// A second pass was started for the same resource
    #[error("another orchestration is in progress for '{namespace}/{name}'")]
    OrchestrationInProgress { name: String, namespace: String },

    /// More than one operator pod is running
    #[error("found {count} running operator pods, expected exactly one\nHint: Scale the operator deployment to a single replica")]
    SingletonViolation { count: usize },

    /// Desired-state store error
    #[error("store error: {0}")]
    Store(String),

    /// A non-optional override source is missing
    #[error("{kind} '{namespace}/{name}' has no key '{key}'")]
    OverrideSourceNotFound {
        kind: String,
        namespace: String,
        name: String,
        key: String,
    },

    /// Uninstall still has components left
    #[error("uninstall incomplete: {remaining} component(s) still installed")]
    UninstallIncomplete { remaining: usize },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Finalizer bookkeeping failed
    #[error("finalizer error: {0}")]
    Finalizer(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<finalizer::Error<KubeError>> for KubeError {
    fn from(e: finalizer::Error<KubeError>) -> Self {
        match e {
            finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => e,
            finalizer::Error::AddFinalizer(e) | finalizer::Error::RemoveFinalizer(e) => {
                KubeError::Api(e)
            }
            other => KubeError::Finalizer(other.to_string()),
        }
    }
}

impl KubeError {
    /// Classify this error for retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            KubeError::Core(e) => e.class(),
            KubeError::Conflict { .. } => ErrorClass::Terminal,
            KubeError::OverrideSourceNotFound { .. }
            | KubeError::Serialization(_)
            | KubeError::InvalidConfig(_) => ErrorClass::Configuration,
            _ => ErrorClass::Transient,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}

//! Core error types

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Component not found: {name}")]
    ComponentNotFound { name: String },

    #[error("Invalid component '{name}': {message}")]
    InvalidComponent { name: String, message: String },

    #[error("Duplicate component '{name}' in catalog")]
    DuplicateComponent { name: String },

    #[error("Component '{component}' depends on unknown component '{dependency}'")]
    UnknownDependency {
        component: String,
        dependency: String,
    },

    #[error("Circular dependency detected: {cycle}")]
    DependencyCycle { cycle: String },

    #[error("Invalid override #{index} for component '{component}': {message}")]
    InvalidOverride {
        component: String,
        index: usize,
        message: String,
    },

    #[error("Invalid install argument '{name}': {message}")]
    InvalidInstallArg { name: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Version {requested} is older than installed version {installed}")]
    VersionRollback { requested: String, installed: String },

    #[error("Values merge error: {message}")]
    ValuesMerge { message: String },

    #[error("Invalid values path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Illegal transition for component '{component}': {from} -> {to}")]
    IllegalTransition {
        component: String,
        from: String,
        to: String,
    },
}

/// How a failure is handled by the reconcile loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad catalog or malformed input. Never retried.
    Configuration,
    /// Retried on the next pass.
    Transient,
    /// Unrecoverable until the desired state changes.
    Terminal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Configuration => write!(f, "configuration"),
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::Terminal => write!(f, "terminal"),
        }
    }
}

impl CoreError {
    /// Classify this error for retry decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::Io(_) => ErrorClass::Transient,
            CoreError::InvalidVersion(_) | CoreError::VersionRollback { .. } => {
                ErrorClass::Terminal
            }
            _ => ErrorClass::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let err = CoreError::DependencyCycle {
            cycle: "a -> b -> a".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(!err.class().is_retryable());

        let err = CoreError::VersionRollback {
            requested: "1.0.0".to_string(),
            installed: "1.1.0".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Terminal);

        let err = CoreError::Io(std::io::Error::other("boom"));
        assert!(err.class().is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::UnknownDependency {
            component: "app".to_string(),
            dependency: "db".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Component 'app' depends on unknown component 'db'"
        );
    }
}

//! CLI error types with exit code handling
//!
//! Library errors are folded into [`CliError`] so `main` can pick an exit
//! code while miette renders the message.

use miette::Diagnostic;
use thiserror::Error;

use stratum_core::{CoreError, ErrorClass};
use stratum_kube::KubeError;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Catalog, manifest or effective configuration rejected
    #[error("Configuration error: {message}")]
    #[diagnostic(code(stratum::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Component not found in the catalog
    #[error("Unknown component '{name}'")]
    #[diagnostic(
        code(stratum::cli::component),
        help("run `stratum plan` to list the catalog")
    )]
    UnknownComponent { name: String },

    /// API server, package tool or controller failure
    #[error("Cluster error: {message}")]
    #[diagnostic(code(stratum::cli::cluster))]
    Cluster { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(stratum::cli::io))]
    Io { message: String },

    /// Wrapped error for passthrough (stores the formatted message)
    #[error("{message}")]
    #[diagnostic(code(stratum::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::UnknownComponent { .. } => exit_codes::COMPONENT_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a configuration error with help text
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => e.into(),
            CoreError::ComponentNotFound { name } => CliError::UnknownComponent { name },
            other => CliError::config(other.to_string()),
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::Core(e) => e.into(),
            KubeError::Io(e) => e.into(),
            other if other.class() == ErrorClass::Configuration => {
                CliError::config(other.to_string())
            }
            other => CliError::Cluster {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(err: serde_yaml::Error) -> Self {
        CliError::config(err.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Other {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

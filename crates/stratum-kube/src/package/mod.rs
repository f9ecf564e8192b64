//! Package tool: the chart installer the executor drives
//!
//! The executor only cares whether a call succeeded and whether a release is
//! installed. Two implementations ship with the crate:
//! - **HelmCli**: Shells out to the `helm` binary
//! - **MockPackageTool**: In-memory releases with scripted failures, for tests

mod helm;
mod mock;

pub use helm::HelmCli;
pub use mock::{MockPackageTool, OperationCounts};

use async_trait::async_trait;
use stratum_core::Values;

use crate::error::Result;

/// Everything needed to install or upgrade one release
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub release: String,
    pub namespace: String,
    /// Chart reference understood by the tool
    pub chart: String,
    pub chart_version: Option<String>,
    pub values: Values,
}

/// Result of a successful apply
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    pub installed: bool,
    /// Tool output, kept for debug logging
    pub logs: String,
}

/// Chart installer interface
///
/// Implementations must be idempotent: applying the same request twice leaves
/// the release as after the first call, and uninstalling a missing release
/// succeeds.
#[async_trait]
pub trait PackageTool: Send + Sync {
    /// Install or upgrade a release
    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyOutcome>;

    /// Whether the release exists
    async fn status(&self, release: &str, namespace: &str) -> Result<bool>;

    /// Remove a release
    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()>;
}

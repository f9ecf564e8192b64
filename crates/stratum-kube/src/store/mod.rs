//! Desired-state store
//!
//! The driver reads `Platform` objects and writes their status back through
//! [`PlatformStore`]. Two implementations ship with the crate:
//! - **KubePlatformStore**: The Kubernetes API, status via the status subresource
//! - **MockPlatformStore**: In-memory objects, for tests and dry runs

mod cluster;
mod mock;

pub use cluster::KubePlatformStore;
pub use mock::{MockPlatformStore, StoreCounts};

use async_trait::async_trait;
use stratum_core::OverallStatus;

use crate::crd::Platform;
use crate::error::Result;

/// CRUD over `Platform` objects keyed by namespace and name
#[async_trait]
pub trait PlatformStore: Send + Sync {
    /// Fetch one object, `None` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Platform>>;

    /// Every object in a namespace
    async fn list(&self, namespace: &str) -> Result<Vec<Platform>>;

    async fn create(&self, platform: &Platform) -> Result<Platform>;

    /// Replace the spec and metadata of an existing object
    async fn update(&self, platform: &Platform) -> Result<Platform>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Write the status subresource
    async fn update_status(&self, namespace: &str, name: &str, status: &OverallStatus)
    -> Result<()>;
}

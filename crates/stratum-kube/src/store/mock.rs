//! Mock platform store for testing
//!
//! Objects live in memory. Status writes are recorded in order so tests can
//! check that a pass persisted exactly what it returned.

use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stratum_core::OverallStatus;

use super::PlatformStore;
use crate::crd::Platform;
use crate::error::{KubeError, Result};

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub status_updates: usize,
}

#[derive(Default)]
struct State {
    /// namespace/name -> object
    objects: BTreeMap<String, Platform>,
    counts: StoreCounts,
    /// Every status written, oldest first
    status_log: Vec<OverallStatus>,
}

/// In-memory platform store for testing
#[derive(Clone, Default)]
pub struct MockPlatformStore {
    state: Arc<Mutex<State>>,
}

impl MockPlatformStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create with pre-populated objects
    pub fn with_platforms(platforms: Vec<Platform>) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            for platform in platforms {
                state.objects.insert(platform.key(), platform);
            }
        }
        store
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> StoreCounts {
        self.lock().counts.clone()
    }

    pub fn reset_counts(&self) {
        self.lock().counts = StoreCounts::default();
    }

    /// Statuses written so far, oldest first
    pub fn status_log(&self) -> Vec<OverallStatus> {
        self.lock().status_log.clone()
    }

    /// Current status of an object
    pub fn status_of(&self, namespace: &str, name: &str) -> Option<OverallStatus> {
        self.lock()
            .objects
            .get(&key(namespace, name))
            .and_then(|p| p.status.clone())
    }
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn not_found(namespace: &str, name: &str) -> KubeError {
    KubeError::Store(format!("platform '{}/{}' not found", namespace, name))
}

#[async_trait]
impl PlatformStore for MockPlatformStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Platform>> {
        let mut state = self.lock();
        state.counts.gets += 1;
        Ok(state.objects.get(&key(namespace, name)).cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Platform>> {
        let mut state = self.lock();
        state.counts.lists += 1;
        Ok(state
            .objects
            .values()
            .filter(|p| p.namespace_or_default() == namespace)
            .cloned()
            .collect())
    }

    async fn create(&self, platform: &Platform) -> Result<Platform> {
        let mut state = self.lock();
        state.counts.creates += 1;
        let key = platform.key();
        if state.objects.contains_key(&key) {
            return Err(KubeError::Store(format!("platform '{}' already exists", key)));
        }
        let mut created = platform.clone();
        created.metadata.generation = Some(1);
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, platform: &Platform) -> Result<Platform> {
        let mut state = self.lock();
        state.counts.updates += 1;
        let namespace = platform.namespace_or_default();
        let name = platform.name_any();
        let Some(existing) = state.objects.get_mut(&key(&namespace, &name)) else {
            return Err(not_found(&namespace, &name));
        };

        let generation = existing.metadata.generation.unwrap_or_default();
        let status = existing.status.clone();
        let spec_changed = existing.spec != platform.spec;
        *existing = platform.clone();
        existing.status = status;
        existing.metadata.generation = Some(if spec_changed {
            generation + 1
        } else {
            generation
        });
        Ok(existing.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.counts.deletes += 1;
        state.objects.remove(&key(namespace, name));
        Ok(())
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &OverallStatus,
    ) -> Result<()> {
        let mut state = self.lock();
        state.counts.status_updates += 1;
        let Some(existing) = state.objects.get_mut(&key(namespace, name)) else {
            return Err(not_found(namespace, name));
        };
        existing.status = Some(status.clone());
        state.status_log.push(status.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::PlatformSpec;

    fn platform(name: &str) -> Platform {
        let mut platform = Platform::new(name, PlatformSpec::default());
        platform.metadata.namespace = Some("platform".to_string());
        platform
    }

    #[tokio::test]
    async fn test_crud_and_generation() {
        let store = MockPlatformStore::new();
        let created = store.create(&platform("main")).await.unwrap();
        assert_eq!(created.metadata.generation, Some(1));
        assert!(store.create(&platform("main")).await.is_err());

        // Same spec keeps the generation
        let same = store.update(&created).await.unwrap();
        assert_eq!(same.metadata.generation, Some(1));

        let mut changed = created.clone();
        changed.spec.config.version = Some("1.2.0".to_string());
        let bumped = store.update(&changed).await.unwrap();
        assert_eq!(bumped.metadata.generation, Some(2));

        assert_eq!(store.list("platform").await.unwrap().len(), 1);
        assert!(store.list("other").await.unwrap().is_empty());

        store.delete("platform", "main").await.unwrap();
        assert!(store.get("platform", "main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_is_kept_across_updates() {
        let store = MockPlatformStore::with_platforms(vec![platform("main")]);
        let status = OverallStatus {
            observed_generation: 1,
            ..Default::default()
        };
        store.update_status("platform", "main", &status).await.unwrap();

        let current = store.get("platform", "main").await.unwrap().unwrap();
        store.update(&current).await.unwrap();

        assert_eq!(store.status_of("platform", "main"), Some(status));
        assert_eq!(store.status_log().len(), 1);
        assert_eq!(store.operation_counts().status_updates, 1);
        assert!(store.update_status("platform", "absent", &OverallStatus::default()).await.is_err());
    }
}

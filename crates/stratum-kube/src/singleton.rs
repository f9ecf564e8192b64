//! Singleton enforcement
//!
//! Only one orchestration may run per `Platform` at a time. Inside the process
//! this is a [`SingletonGuard`]; across the cluster the operator checks that
//! it is the only running replica before installing anything.

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{KubeError, Result};

/// Tracks which resources currently have a pass running
#[derive(Clone, Default)]
pub struct SingletonGuard {
    active: Arc<Mutex<HashSet<String>>>,
}

impl SingletonGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `namespace/name` until the returned permit is dropped
    pub fn acquire(&self, namespace: &str, name: &str) -> Result<SingletonPermit> {
        let key = format!("{}/{}", namespace, name);
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.clone()) {
            return Err(KubeError::OrchestrationInProgress {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }
        Ok(SingletonPermit {
            active: Arc::clone(&self.active),
            key,
        })
    }

    pub fn is_active(&self, namespace: &str, name: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&format!("{}/{}", namespace, name))
    }
}

/// Releases its claim on drop
#[must_use = "the claim is released as soon as the permit is dropped"]
pub struct SingletonPermit {
    active: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for SingletonPermit {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Fail unless at most one operator pod is running
pub async fn verify_operator_singleton(
    client: kube::Client,
    namespace: &str,
    selector: &str,
) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let list = pods.list(&ListParams::default().labels(selector)).await?;
    let count = count_running(&list.items);
    tracing::debug!(namespace, selector, count, "Checked operator replicas");

    if count > 1 {
        return Err(KubeError::SingletonViolation { count });
    }
    Ok(())
}

/// Pods in the `Running` phase that are not being deleted
pub fn count_running(pods: &[Pod]) -> usize {
    pods.iter()
        .filter(|pod| pod.metadata.deletion_timestamp.is_none())
        .filter(|pod| {
            pod.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|phase| phase == "Running")
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn pod(phase: &str, deleting: bool) -> Pod {
        let mut pod = Pod::default();
        pod.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        });
        if deleting {
            pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
        pod
    }

    #[test]
    fn test_second_acquire_fails_until_dropped() {
        let guard = SingletonGuard::new();
        let permit = guard.acquire("platform", "main").unwrap();
        assert!(guard.is_active("platform", "main"));

        let err = guard.acquire("platform", "main").err().unwrap();
        assert!(matches!(err, KubeError::OrchestrationInProgress { .. }));

        // Other resources are independent
        let _other = guard.acquire("platform", "edge").unwrap();

        drop(permit);
        assert!(!guard.is_active("platform", "main"));
        assert!(guard.acquire("platform", "main").is_ok());
    }

    #[test]
    fn test_count_running() {
        let pods = vec![
            pod("Running", false),
            pod("Running", true),
            pod("Pending", false),
            pod("Succeeded", false),
        ];
        assert_eq!(count_running(&pods), 1);
        assert_eq!(count_running(&[pod("Running", false), pod("Running", false)]), 2);
    }
}

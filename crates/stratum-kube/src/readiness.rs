//! Readiness probing
//!
//! A component is ready when every workload listed in its readiness spec
//! reports at least `minAvailable` available replicas. Probes only read
//! workload status, so they are safe to run on every pass.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::api::Api;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use stratum_core::{Component, EffectiveConfig, WorkloadKind, WorkloadRef};

use crate::error::{KubeError, Result};

/// Reads workload availability
#[async_trait]
pub trait WorkloadReader: Send + Sync {
    /// Available replicas, or `None` when the workload does not exist
    async fn available_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>>;
}

/// Reads workloads through the Kubernetes API
#[derive(Clone)]
pub struct KubeWorkloads {
    client: kube::Client,
}

impl KubeWorkloads {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadReader for KubeWorkloads {
    async fn available_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>> {
        let client = self.client.clone();
        let result = match kind {
            WorkloadKind::Deployment => Api::<Deployment>::namespaced(client, namespace)
                .get_opt(name)
                .await
                .map(|d| {
                    d.map(|d| d.status.and_then(|s| s.available_replicas).unwrap_or(0))
                }),
            WorkloadKind::StatefulSet => Api::<StatefulSet>::namespaced(client, namespace)
                .get_opt(name)
                .await
                .map(|s| {
                    s.map(|s| s.status.and_then(|s| s.available_replicas).unwrap_or(0))
                }),
            WorkloadKind::DaemonSet => Api::<DaemonSet>::namespaced(client, namespace)
                .get_opt(name)
                .await
                .map(|d| d.map(|d| d.status.and_then(|s| s.number_available).unwrap_or(0))),
        };
        result.map_err(KubeError::Api)
    }
}

/// Result of probing one component
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    /// Workloads below their threshold, with what was observed
    pub waiting: Vec<String>,
}

impl Readiness {
    pub fn message(&self) -> String {
        if self.ready {
            "All workloads available".to_string()
        } else {
            format!("Waiting for {}", self.waiting.join(", "))
        }
    }
}

/// Checks component readiness against workload availability
#[derive(Clone)]
pub struct ReadinessProber {
    reader: Arc<dyn WorkloadReader>,
}

impl ReadinessProber {
    pub fn new(reader: Arc<dyn WorkloadReader>) -> Self {
        Self { reader }
    }

    /// Whether every workload of `component` is available
    pub async fn is_ready(&self, component: &Component, config: &EffectiveConfig) -> Result<bool> {
        let namespace = config.namespace_for(component);
        Ok(self.probe(component, namespace).await?.ready)
    }

    /// Probe with the namespace already resolved
    pub async fn probe(&self, component: &Component, namespace: &str) -> Result<Readiness> {
        let spec = &component.readiness;
        let mut waiting = Vec::new();

        for workload in &spec.workloads {
            let ns = workload.namespace_or(namespace);
            match self
                .reader
                .available_replicas(workload.kind, ns, &workload.name)
                .await?
            {
                Some(available) if available >= spec.min_available => {}
                Some(available) => waiting.push(format!(
                    "{} ({}/{} available)",
                    display(workload, ns),
                    available,
                    spec.min_available
                )),
                None => waiting.push(format!("{} (not found)", display(workload, ns))),
            }
        }

        Ok(Readiness {
            ready: waiting.is_empty(),
            waiting,
        })
    }
}

fn display(workload: &WorkloadRef, namespace: &str) -> String {
    format!("{}/{}/{}", workload.kind, namespace, workload.name)
}

/// In-memory workload reader for testing
#[derive(Clone, Default)]
pub struct MockWorkloadReader {
    /// "Kind/namespace/name" -> available replicas
    replicas: Arc<Mutex<HashMap<String, i32>>>,
    reads: Arc<Mutex<usize>>,
}

impl MockWorkloadReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the available replicas of a workload
    pub fn set_available(&self, kind: WorkloadKind, namespace: &str, name: &str, available: i32) {
        self.replicas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(format!("{}/{}/{}", kind, namespace, name), available);
    }

    pub fn remove(&self, kind: WorkloadKind, namespace: &str, name: &str) {
        self.replicas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&format!("{}/{}/{}", kind, namespace, name));
    }

    pub fn read_count(&self) -> usize {
        *self.reads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WorkloadReader for MockWorkloadReader {
    async fn available_replicas(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>> {
        *self.reads.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(self
            .replicas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&format!("{}/{}/{}", kind, namespace, name))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component() -> Component {
        Component::new("db", "data", "charts/db")
            .with_workload(WorkloadRef::statefulset("db"))
            .with_workload(WorkloadRef::deployment("db-proxy").in_namespace("proxy"))
    }

    #[tokio::test]
    async fn test_ready_when_all_workloads_available() {
        let reader = MockWorkloadReader::new();
        reader.set_available(WorkloadKind::StatefulSet, "data", "db", 1);
        reader.set_available(WorkloadKind::Deployment, "proxy", "db-proxy", 2);

        let prober = ReadinessProber::new(Arc::new(reader.clone()));
        assert!(prober
            .is_ready(&component(), &EffectiveConfig::default())
            .await
            .unwrap());
        assert_eq!(reader.read_count(), 2);
    }

    #[tokio::test]
    async fn test_waiting_reports_each_workload() {
        let reader = MockWorkloadReader::new();
        reader.set_available(WorkloadKind::StatefulSet, "data", "db", 0);

        let prober = ReadinessProber::new(Arc::new(reader));
        let readiness = prober.probe(&component(), "data").await.unwrap();

        assert!(!readiness.ready);
        assert_eq!(
            readiness.waiting,
            vec![
                "StatefulSet/data/db (0/1 available)",
                "Deployment/proxy/db-proxy (not found)",
            ]
        );
        assert!(readiness.message().starts_with("Waiting for StatefulSet/data/db"));
    }

    #[tokio::test]
    async fn test_threshold_and_namespace_override() {
        let mut component = Component::new("web", "apps", "charts/web")
            .with_workload(WorkloadRef::deployment("web"));
        component.readiness.min_available = 2;

        let reader = MockWorkloadReader::new();
        reader.set_available(WorkloadKind::Deployment, "moved", "web", 1);
        let prober = ReadinessProber::new(Arc::new(reader.clone()));

        let mut config = EffectiveConfig::default();
        config.components.entry("web".to_string()).or_default().namespace =
            Some("moved".to_string());

        assert!(!prober.is_ready(&component, &config).await.unwrap());
        reader.set_available(WorkloadKind::Deployment, "moved", "web", 2);
        assert!(prober.is_ready(&component, &config).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_workloads_is_ready() {
        let prober = ReadinessProber::new(Arc::new(MockWorkloadReader::new()));
        let component = Component::new("crds", "system", "charts/crds");
        assert!(prober.probe(&component, "system").await.unwrap().ready);
    }
}

//! Kubernetes-backed platform store

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use stratum_core::OverallStatus;

use super::PlatformStore;
use crate::crd::Platform;
use crate::error::{KubeError, Result};

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "stratum-operator";

/// Stores `Platform` objects in the cluster
#[derive(Clone)]
pub struct KubePlatformStore {
    client: kube::Client,
}

impl KubePlatformStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Platform> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PlatformStore for KubePlatformStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Platform>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Platform>> {
        Ok(self
            .api(namespace)
            .list(&ListParams::default())
            .await?
            .items)
    }

    async fn create(&self, platform: &Platform) -> Result<Platform> {
        let namespace = platform.namespace_or_default();
        Ok(self
            .api(&namespace)
            .create(&PostParams::default(), platform)
            .await?)
    }

    async fn update(&self, platform: &Platform) -> Result<Platform> {
        let namespace = platform.namespace_or_default();
        Ok(self
            .api(&namespace)
            .replace(&platform.name_any(), &PostParams::default(), platform)
            .await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(KubeError::Api(e)),
        }
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &OverallStatus,
    ) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

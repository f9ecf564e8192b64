//! Override sources
//!
//! ConfigMap and Secret references in a component's override list are read
//! here and handed to the merge engine as already-parsed layers.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::Api;
use std::collections::{BTreeMap, HashMap};

use stratum_core::overrides::{inline_override_values, parse_override_document};
use stratum_core::{Component, EffectiveConfig, OverrideSource, SourceKind, Values};

use crate::error::{KubeError, Result};

/// Reads raw override documents
#[async_trait]
pub trait OverrideSourceReader: Send + Sync {
    /// Content of `key`, or `None` when the object or the key is missing
    async fn read(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>>;
}

/// Reads ConfigMaps and Secrets through the Kubernetes API
#[derive(Clone)]
pub struct KubeOverrideSource {
    client: kube::Client,
}

impl KubeOverrideSource {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OverrideSourceReader for KubeOverrideSource {
    async fn read(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>> {
        match kind {
            SourceKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                Ok(api
                    .get_opt(name)
                    .await?
                    .and_then(|cm| cm.data)
                    .and_then(|mut data| data.remove(key)))
            }
            SourceKind::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                let Some(bytes) = api
                    .get_opt(name)
                    .await?
                    .and_then(|secret| secret.data)
                    .and_then(|mut data| data.remove(key))
                else {
                    return Ok(None);
                };
                String::from_utf8(bytes.0).map(Some).map_err(|_| {
                    KubeError::Serialization(format!(
                        "Secret '{}/{}' key '{}' is not valid UTF-8",
                        namespace, name, key
                    ))
                })
            }
        }
    }
}

/// Fetch and parse every override of a component, in list order
///
/// `namespace` is where the owning resource lives. Missing optional references
/// are skipped; missing required ones are configuration errors.
pub async fn resolve_overrides(
    reader: &dyn OverrideSourceReader,
    component: &Component,
    config: &EffectiveConfig,
    namespace: &str,
) -> Result<Vec<Values>> {
    let Some(spec) = config.component(&component.name) else {
        return Ok(Vec::new());
    };

    let mut layers = Vec::with_capacity(spec.overrides.len());
    for (index, entry) in spec.overrides.iter().enumerate() {
        match entry.source(&component.name, index)? {
            OverrideSource::Inline(value) => {
                layers.push(inline_override_values(&component.name, index, value)?);
            }
            OverrideSource::Reference(kind, selector) => {
                match reader
                    .read(kind, namespace, &selector.name, &selector.key)
                    .await?
                {
                    Some(content) => layers.push(parse_override_document(
                        &component.name,
                        index,
                        &content,
                    )?),
                    None if selector.optional => {
                        tracing::debug!(
                            component = %component.name,
                            source = %kind,
                            name = %selector.name,
                            "Skipping missing optional override"
                        );
                    }
                    None => {
                        return Err(KubeError::OverrideSourceNotFound {
                            kind: kind.to_string(),
                            namespace: namespace.to_string(),
                            name: selector.name.clone(),
                            key: selector.key.clone(),
                        });
                    }
                }
            }
        }
    }

    Ok(layers)
}

/// Fixed override documents for testing and offline tooling
#[derive(Debug, Clone, Default)]
pub struct StaticOverrideSource {
    /// "Kind/namespace/name" -> key -> content
    objects: HashMap<String, BTreeMap<String, String>>,
}

impl StaticOverrideSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(
        mut self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
        key: &str,
        content: &str,
    ) -> Self {
        self.objects
            .entry(format!("{}/{}/{}", kind, namespace, name))
            .or_default()
            .insert(key.to_string(), content.to_string());
        self
    }
}

#[async_trait]
impl OverrideSourceReader for StaticOverrideSource {
    async fn read(
        &self,
        kind: SourceKind,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .objects
            .get(&format!("{}/{}/{}", kind, namespace, name))
            .and_then(|data| data.get(key))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stratum_core::{ComponentSpec, ErrorClass, KeySelector, Override};

    fn config(overrides: Vec<Override>) -> EffectiveConfig {
        let mut config = EffectiveConfig::default();
        config.components.insert(
            "app".to_string(),
            ComponentSpec {
                overrides,
                ..Default::default()
            },
        );
        config
    }

    fn optional(name: &str) -> Override {
        Override {
            secret_ref: Some(KeySelector {
                name: name.to_string(),
                key: "values.yaml".to_string(),
                optional: true,
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolves_in_list_order() {
        let reader = StaticOverrideSource::new()
            .with_entry(SourceKind::ConfigMap, "platform", "app-values", "values.yaml", "replicas: 3\n")
            .with_entry(SourceKind::Secret, "platform", "app-creds", "values.yaml", "password: hunter2\n");

        let component = Component::new("app", "apps", "charts/app");
        let config = config(vec![
            Override::inline(json!({"replicas": 1})),
            Override::config_map("app-values", "values.yaml"),
            Override::secret("app-creds", "values.yaml"),
        ]);

        let layers = resolve_overrides(&reader, &component, &config, "platform")
            .await
            .unwrap();

        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0].get("replicas").unwrap(), 1);
        assert_eq!(layers[1].get("replicas").unwrap(), 3);
        assert_eq!(layers[2].get("password").unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn test_optional_reference_is_skipped() {
        let component = Component::new("app", "apps", "charts/app");
        let config = config(vec![optional("absent")]);

        let layers = resolve_overrides(&StaticOverrideSource::new(), &component, &config, "platform")
            .await
            .unwrap();
        assert!(layers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_reference_is_configuration_error() {
        let component = Component::new("app", "apps", "charts/app");
        let config = config(vec![Override::config_map("absent", "values.yaml")]);

        let err = resolve_overrides(&StaticOverrideSource::new(), &component, &config, "platform")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::OverrideSourceNotFound { .. }));
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[tokio::test]
    async fn test_malformed_document_is_rejected() {
        let reader = StaticOverrideSource::new().with_entry(
            SourceKind::ConfigMap,
            "platform",
            "bad",
            "values.yaml",
            "- not\n- a mapping\n",
        );
        let component = Component::new("app", "apps", "charts/app");
        let config = config(vec![Override::config_map("bad", "values.yaml")]);

        let err = resolve_overrides(&reader, &component, &config, "platform")
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }
}

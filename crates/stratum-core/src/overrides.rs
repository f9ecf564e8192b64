//! Override entries and the layered values merge
//!
//! A component's applied values are built from these layers, lowest precedence
//! first:
//!
//! 1. the component's built-in defaults
//! 2. image coordinates generated from the build manifest
//! 3. installation-profile layers, in the order supplied
//! 4. legacy install arguments, expanded into nested paths
//! 5. the explicit `overrides` list, in list order
//!
//! Mappings merge recursively and everything else is replaced by the higher
//! layer. ConfigMap and Secret references are read elsewhere; the merge works
//! on their already-fetched documents and stays a pure function.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::build_manifest::BuildManifest;
use crate::component::Component;
use crate::config::EffectiveConfig;
use crate::error::{CoreError, Result};
use crate::install_args::{expand_install_args, expand_to_values};
use crate::values::Values;

/// One configuration fragment; exactly one source must be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Override {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<KeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<KeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<JsonValue>,
}

/// A key inside a ConfigMap or Secret in the resource's namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySelector {
    pub name: String,
    pub key: String,

    /// Skip the entry instead of failing when the object or key is missing
    #[serde(default)]
    pub optional: bool,
}

/// Where an override's content comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    ConfigMap,
    Secret,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::ConfigMap => write!(f, "ConfigMap"),
            SourceKind::Secret => write!(f, "Secret"),
        }
    }
}

/// Validated view of an override entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverrideSource<'a> {
    Inline(&'a JsonValue),
    Reference(SourceKind, &'a KeySelector),
}

impl Override {
    pub fn inline(values: JsonValue) -> Self {
        Self {
            values: Some(values),
            ..Default::default()
        }
    }

    pub fn config_map(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            config_map_ref: Some(KeySelector {
                name: name.into(),
                key: key.into(),
                optional: false,
            }),
            ..Default::default()
        }
    }

    pub fn secret(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            secret_ref: Some(KeySelector {
                name: name.into(),
                key: key.into(),
                optional: false,
            }),
            ..Default::default()
        }
    }

    /// Check the one-source rule and return the source
    pub fn source(&self, component: &str, index: usize) -> Result<OverrideSource<'_>> {
        let set = [
            self.config_map_ref.is_some(),
            self.secret_ref.is_some(),
            self.values.is_some(),
        ]
        .iter()
        .filter(|s| **s)
        .count();

        let invalid = |message: String| CoreError::InvalidOverride {
            component: component.to_string(),
            index,
            message,
        };

        match set {
            0 => Err(invalid(
                "one of configMapRef, secretRef or values must be set".to_string(),
            )),
            1 => {
                if let Some(selector) = &self.config_map_ref {
                    Ok(OverrideSource::Reference(SourceKind::ConfigMap, selector))
                } else if let Some(selector) = &self.secret_ref {
                    Ok(OverrideSource::Reference(SourceKind::Secret, selector))
                } else if let Some(values) = &self.values {
                    Ok(OverrideSource::Inline(values))
                } else {
                    Err(invalid("no source set".to_string()))
                }
            }
            n => Err(invalid(format!(
                "only one of configMapRef, secretRef or values may be set, found {}",
                n
            ))),
        }
    }
}

/// Validate every override of a component
pub fn validate_overrides(component: &str, overrides: &[Override]) -> Result<()> {
    for (index, entry) in overrides.iter().enumerate() {
        entry.source(component, index)?;
    }
    Ok(())
}

/// Turn fetched override content into a values layer
///
/// The document must be a mapping; an empty document is an empty layer.
pub fn parse_override_document(component: &str, index: usize, content: &str) -> Result<Values> {
    let values = Values::from_yaml(content).map_err(|e| CoreError::InvalidOverride {
        component: component.to_string(),
        index,
        message: format!("malformed document: {}", e),
    })?;
    check_mapping(component, index, values)
}

/// Inline override content as a values layer
pub fn inline_override_values(component: &str, index: usize, value: &JsonValue) -> Result<Values> {
    match value {
        JsonValue::Null => Ok(Values::new()),
        other => check_mapping(component, index, Values(other.clone())),
    }
}

fn check_mapping(component: &str, index: usize, values: Values) -> Result<Values> {
    if values.inner().is_object() {
        Ok(values)
    } else {
        Err(CoreError::InvalidOverride {
            component: component.to_string(),
            index,
            message: "document must be a mapping".to_string(),
        })
    }
}

/// Kind of a merge layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LayerKind {
    Defaults,
    Generated,
    Profile,
    InstallArgs,
    Override,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Defaults => write!(f, "defaults"),
            LayerKind::Generated => write!(f, "generated"),
            LayerKind::Profile => write!(f, "profile"),
            LayerKind::InstallArgs => write!(f, "install-args"),
            LayerKind::Override => write!(f, "override"),
        }
    }
}

/// One values layer, lowest precedence first in a layer list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layer {
    pub kind: LayerKind,
    pub values: Values,
}

/// Builds a component's values from its layers
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine<'a> {
    manifest: Option<&'a BuildManifest>,
}

impl<'a> MergeEngine<'a> {
    pub fn new(manifest: Option<&'a BuildManifest>) -> Self {
        Self { manifest }
    }

    /// Every layer for `component`, lowest precedence first
    ///
    /// `resolved` holds the already-fetched override documents in list order;
    /// skipped optional references are simply absent.
    pub fn layers(
        &self,
        component: &Component,
        config: &EffectiveConfig,
        resolved: &[Values],
    ) -> Result<Vec<Layer>> {
        let spec = config.component(&component.name);
        let mut layers = vec![Layer {
            kind: LayerKind::Defaults,
            values: component.values.clone(),
        }];

        if let Some(manifest) = self.manifest
            && !component.ignore_image_overrides
            && !component.image_subcomponents.is_empty()
        {
            let pairs = manifest.overrides_for(&component.image_subcomponents, &config.registry)?;
            layers.push(Layer {
                kind: LayerKind::Generated,
                values: expand_to_values(&pairs)?,
            });
        }

        if let Some(spec) = spec {
            for profile in &spec.profile_values {
                layers.push(Layer {
                    kind: LayerKind::Profile,
                    values: profile.clone(),
                });
            }

            if !spec.install_args.is_empty() {
                let pairs = expand_install_args(&spec.install_args)?;
                layers.push(Layer {
                    kind: LayerKind::InstallArgs,
                    values: expand_to_values(&pairs)?,
                });
            }

            validate_overrides(&component.name, &spec.overrides)?;
        }

        for values in resolved {
            layers.push(Layer {
                kind: LayerKind::Override,
                values: values.clone(),
            });
        }

        Ok(layers)
    }

    /// The merged values document for `component`
    pub fn merge(
        &self,
        component: &Component,
        config: &EffectiveConfig,
        resolved: &[Values],
    ) -> Result<Values> {
        let layers = self.layers(component, config, resolved)?;
        tracing::debug!(component = %component.name, layers = layers.len(), "Merging values");
        Ok(Values::merge_all(layers.into_iter().map(|l| l.values).collect()))
    }

    /// Merge using only inline overrides; references are an error here
    pub fn merge_inline(&self, component: &Component, config: &EffectiveConfig) -> Result<Values> {
        let mut resolved = Vec::new();
        if let Some(spec) = config.component(&component.name) {
            for (index, entry) in spec.overrides.iter().enumerate() {
                match entry.source(&component.name, index)? {
                    OverrideSource::Inline(value) => {
                        resolved.push(inline_override_values(&component.name, index, value)?)
                    }
                    OverrideSource::Reference(kind, selector) => {
                        return Err(CoreError::InvalidOverride {
                            component: component.name.clone(),
                            index,
                            message: format!(
                                "{} '{}' cannot be read without a cluster",
                                kind, selector.name
                            ),
                        });
                    }
                }
            }
        }
        self.merge(component, config, &resolved)
    }
}

//! Build manifest: the image coordinates shipped with a platform release
//!
//! Charts do not agree on where image coordinates live in their values, so each
//! image entry names the helm keys it should be written to. The manifest turns
//! those entries into [`KeyValue`] pairs that form the generated override layer.
//! Image coordinates are always strings, so a tag such as `1.10` is never read
//! as a number.

use indexmap::IndexMap;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::install_args::KeyValue;

/// Key used when an image declares no helm keys at all
const DEFAULT_IMAGE_KEY: &str = "image";

/// Parsed build manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    /// Platform version this manifest was built for
    pub version: Version,

    /// Default registry for every image
    pub registry: String,

    #[serde(default)]
    pub subcomponents: Vec<Subcomponent>,
}

/// A group of images published together, usually one chart
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subcomponent {
    pub name: String,

    #[serde(default)]
    pub repository: String,

    /// Overrides the manifest registry for this subcomponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    #[serde(default)]
    pub images: Vec<ImageEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEntry {
    pub image: String,
    pub tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_registry_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_repo_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_image_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_tag_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_full_image_key: Option<String>,
}

/// Registry relocation requested by the installation (private mirrors)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryOverride {
    /// Replaces every resolved registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// Prepended to every resolved repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_prefix: Option<String>,
}

impl BuildManifest {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn subcomponent(&self, name: &str) -> Option<&Subcomponent> {
        self.subcomponents.iter().find(|s| s.name == name)
    }

    /// Helm key/value pairs for every image of a subcomponent
    pub fn image_overrides(
        &self,
        subcomponent: &str,
        relocation: &RegistryOverride,
    ) -> Result<Vec<KeyValue>> {
        let sc = self
            .subcomponent(subcomponent)
            .ok_or_else(|| CoreError::MissingField {
                field: format!("subcomponents[{}]", subcomponent),
            })?;

        let mut pairs = Vec::new();
        for image in &sc.images {
            pairs.extend(self.image_pairs(sc, image, relocation));
        }
        Ok(pairs)
    }

    /// Fully qualified `registry/repository/image:tag` names of a subcomponent
    pub fn image_names(
        &self,
        subcomponent: &str,
        relocation: &RegistryOverride,
    ) -> Result<Vec<String>> {
        let sc = self
            .subcomponent(subcomponent)
            .ok_or_else(|| CoreError::MissingField {
                field: format!("subcomponents[{}]", subcomponent),
            })?;

        Ok(sc
            .images
            .iter()
            .map(|image| {
                let registry = self.resolve_registry(sc, image, relocation);
                let repo = resolve_repository(sc, image, relocation);
                if repo.is_empty() {
                    format!("{}/{}:{}", registry, image.image, image.tag)
                } else {
                    format!("{}/{}/{}:{}", registry, repo, image.image, image.tag)
                }
            })
            .collect())
    }

    /// All pairs for a set of subcomponents, later keys replacing earlier ones
    pub fn overrides_for(
        &self,
        subcomponents: &[String],
        relocation: &RegistryOverride,
    ) -> Result<Vec<KeyValue>> {
        let mut merged: IndexMap<String, KeyValue> = IndexMap::new();
        for name in subcomponents {
            for pair in self.image_overrides(name, relocation)? {
                merged.insert(pair.key.clone(), pair);
            }
        }
        Ok(merged.into_values().collect())
    }

    fn resolve_registry(
        &self,
        sc: &Subcomponent,
        image: &ImageEntry,
        relocation: &RegistryOverride,
    ) -> String {
        if let Some(registry) = &relocation.registry {
            return registry.clone();
        }
        image
            .registry
            .as_ref()
            .or(sc.registry.as_ref())
            .unwrap_or(&self.registry)
            .clone()
    }

    fn image_pairs(
        &self,
        sc: &Subcomponent,
        image: &ImageEntry,
        relocation: &RegistryOverride,
    ) -> Vec<KeyValue> {
        let registry = self.resolve_registry(sc, image, relocation);
        let repo = resolve_repository(sc, image, relocation);

        let mut pairs = Vec::new();
        // Whatever is not written to its own key is folded into the full image path
        let mut partial = String::new();

        match &image.helm_registry_key {
            Some(key) => pairs.push(KeyValue::string(key, &registry)),
            None => {
                partial.push_str(&registry);
                partial.push('/');
            }
        }

        match &image.helm_repo_key {
            Some(key) => pairs.push(KeyValue::string(key, &repo)),
            None if !repo.is_empty() => {
                partial.push_str(&repo);
                partial.push('/');
            }
            None => {}
        }

        match &image.helm_image_key {
            Some(key) => pairs.push(KeyValue::string(key, &image.image)),
            None => partial.push_str(&image.image),
        }

        match &image.helm_tag_key {
            Some(key) => pairs.push(KeyValue::string(key, &image.tag)),
            None => {
                partial.push(':');
                partial.push_str(&image.tag);
            }
        }

        if let Some(key) = &image.helm_full_image_key {
            pairs.push(KeyValue::string(key, &partial));
        }

        if pairs.is_empty() {
            pairs.push(KeyValue::string(DEFAULT_IMAGE_KEY, partial));
        }

        pairs
    }
}

fn resolve_repository(sc: &Subcomponent, image: &ImageEntry, relocation: &RegistryOverride) -> String {
    let repo = image.repository.as_ref().unwrap_or(&sc.repository);
    match &relocation.repository_prefix {
        Some(prefix) if repo.is_empty() => prefix.clone(),
        Some(prefix) => format!("{}/{}", prefix, repo),
        None => repo.clone(),
    }
}

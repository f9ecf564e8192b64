//! CLI commands

pub mod plan;
pub mod run;
pub mod values;

use std::path::Path;
use std::sync::Arc;

use stratum_core::{BuildManifest, ComponentRegistry, CoreError, EffectiveConfig};
use stratum_kube::Platform;

use crate::SourceArgs;
use crate::error::{CliError, Result};

/// Catalog and manifest loaded from the command line
pub struct Sources {
    pub registry: ComponentRegistry,
    pub manifest: Option<BuildManifest>,
}

impl Sources {
    pub fn load(args: &SourceArgs) -> Result<Self> {
        let registry = ComponentRegistry::from_file(&args.catalog).map_err(|e| match e {
            CoreError::Io(e) => CliError::Io {
                message: format!("{} ({})", e, args.catalog.display()),
            },
            other => CliError::config_with_help(
                format!("{} ({})", other, args.catalog.display()),
                "the catalog is a YAML document with a top-level `components` list",
            ),
        })?;
        let manifest = args
            .manifest
            .as_ref()
            .map(|path| {
                BuildManifest::from_file(path)
                    .map_err(|e| CliError::config(format!("{} ({})", e, path.display())))
            })
            .transpose()?;

        tracing::debug!(components = registry.len(), manifest = manifest.is_some(), "Loaded sources");
        Ok(Self { registry, manifest })
    }

    pub fn into_shared(self) -> (Arc<ComponentRegistry>, Option<Arc<BuildManifest>>) {
        (Arc::new(self.registry), self.manifest.map(Arc::new))
    }
}

/// Read an effective configuration
///
/// Accepts either a full `Platform` object, whose generation is kept, or the
/// bare spec, which is treated as generation 1. No file means defaults.
pub fn load_config(path: Option<&Path>) -> Result<EffectiveConfig> {
    let Some(path) = path else {
        return Ok(EffectiveConfig::default().with_generation(1));
    };

    let content = std::fs::read_to_string(path)?;
    let document: serde_yaml::Value = serde_yaml::from_str(&content)?;
    if document.get("spec").is_some() {
        let platform: Platform = serde_yaml::from_value(document)?;
        let mut config = platform.effective_config();
        if config.generation == 0 {
            config.generation = 1;
        }
        return Ok(config);
    }

    Ok(serde_yaml::from_value::<EffectiveConfig>(document)?.with_generation(1))
}

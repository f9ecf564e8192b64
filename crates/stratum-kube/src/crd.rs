//! The `Platform` custom resource
//!
//! One `Platform` object owns the whole installation. Its spec is the
//! effective configuration; its status is the aggregated component status.
//! The schema is produced by the conversion layer upstream, so none is
//! generated here.

use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

use stratum_core::{EffectiveConfig, OverallStatus};

/// Finalizer that holds deletion until every component is uninstalled
pub const PLATFORM_FINALIZER: &str = "platform.stratum.dev/uninstall";

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[kube(
    group = "platform.stratum.dev",
    version = "v1alpha1",
    kind = "Platform",
    namespaced,
    status = "OverallStatus",
    schema = "disabled",
    shortname = "plat",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.available"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#
)]
pub struct PlatformSpec {
    #[serde(flatten)]
    pub config: EffectiveConfig,
}

impl Platform {
    /// Effective configuration stamped with the object's generation
    pub fn effective_config(&self) -> EffectiveConfig {
        let mut config = self.spec.config.clone();
        config.generation = self.metadata.generation.unwrap_or_default();
        config
    }

    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// `namespace/name`, used for logging and the singleton guard
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace_or_default(), self.name_any())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn current_status(&self) -> OverallStatus {
        self.status.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_config_takes_metadata_generation() {
        let yaml = r#"
apiVersion: platform.stratum.dev/v1alpha1
kind: Platform
metadata:
  name: main
  namespace: platform
  generation: 7
spec:
  version: 1.4.0
  components:
    ingress:
      enabled: false
"#;
        let platform: Platform = serde_yaml::from_str(yaml).unwrap();
        let config = platform.effective_config();

        assert_eq!(config.generation, 7);
        assert_eq!(config.version.as_deref(), Some("1.4.0"));
        assert_eq!(config.component("ingress").unwrap().enabled, Some(false));
        assert_eq!(platform.key(), "platform/main");
        assert!(!platform.is_deleting());
        assert_eq!(platform.current_status(), OverallStatus::default());
    }
}

//! Effective configuration
//!
//! The normalized desired-state snapshot for one reconcile pass. It is produced
//! upstream (version conversion and profile merging already applied) and is
//! read-only here.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::build_manifest::RegistryOverride;
use crate::component::Component;
use crate::error::Result;
use crate::install_args::InstallArg;
use crate::overrides::Override;
use crate::values::Values;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    /// Monotonic generation of the owning resource
    #[serde(skip)]
    pub generation: i64,

    /// Compute transitions without applying anything
    #[serde(default)]
    pub dry_run: bool,

    /// Target platform version; `None` keeps whatever is installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Private registry relocation for generated image overrides
    #[serde(default)]
    pub registry: RegistryOverride,

    /// Per-component configuration keyed by component name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
}

/// Desired configuration of one component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Relocates the chart unless the component ignores namespace overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Precomputed installation-profile layers, lowest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile_values: Vec<Values>,

    /// Legacy flat argument list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_args: Vec<InstallArg>,

    /// Explicit overrides, later entries win
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Override>,
}

impl EffectiveConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = generation;
        self
    }

    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.get(name)
    }

    /// Enablement predicate: explicit setting, else the component default
    pub fn is_enabled(&self, component: &Component) -> bool {
        self.component(&component.name)
            .and_then(|spec| spec.enabled)
            .unwrap_or(component.enabled_by_default)
    }

    /// Namespace the component's chart is installed into
    pub fn namespace_for<'a>(&'a self, component: &'a Component) -> &'a str {
        if component.ignore_namespace_override {
            return &component.namespace;
        }
        self.component(&component.name)
            .and_then(|spec| spec.namespace.as_deref())
            .unwrap_or(&component.namespace)
    }

    /// Parsed target version
    pub fn target_version(&self) -> Result<Option<Version>> {
        match &self.version {
            Some(v) => Ok(Some(Version::parse(v.trim_start_matches('v'))?)),
            None => Ok(None),
        }
    }

    /// Toggle a component, mostly for tests and tooling
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        self.components.entry(name.to_string()).or_default().enabled = Some(enabled);
    }
}

/// Process-wide reconcile settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSettings {
    /// Bound on a single apply or uninstall call (default: 5m)
    #[serde(default = "default_apply_timeout", with = "humantime_serde")]
    pub apply_timeout: Duration,

    /// Bound on a single readiness probe (default: 30s)
    #[serde(default = "default_readiness_timeout", with = "humantime_serde")]
    pub readiness_timeout: Duration,

    /// Requeue delay while components are still converging (default: 10s)
    #[serde(default = "default_requeue_interval", with = "humantime_serde")]
    pub requeue_interval: Duration,

    /// Periodic resync once everything is ready (default: 5m)
    #[serde(default = "default_resync_interval", with = "humantime_serde")]
    pub resync_interval: Duration,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            apply_timeout: default_apply_timeout(),
            readiness_timeout: default_readiness_timeout(),
            requeue_interval: default_requeue_interval(),
            resync_interval: default_resync_interval(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ReconcileSettings {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }
}

fn default_apply_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_requeue_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_resync_interval() -> Duration {
    Duration::from_secs(300)
}

/// How many consecutive transient failures a component may have
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// 0 means retry forever
    #[serde(default)]
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Whether `failures` consecutive failures exhaust the policy
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enablement_defaults() {
        let on = Component::new("on", "ns", "charts/on");
        let off = Component::new("off", "ns", "charts/off").disabled_by_default();

        let mut config = EffectiveConfig::default();
        assert!(config.is_enabled(&on));
        assert!(!config.is_enabled(&off));

        config.set_enabled("on", false);
        config.set_enabled("off", true);
        assert!(!config.is_enabled(&on));
        assert!(config.is_enabled(&off));
    }

    #[test]
    fn test_namespace_override() {
        let mut fixed = Component::new("fixed", "system", "charts/fixed");
        fixed.ignore_namespace_override = true;
        let movable = Component::new("movable", "system", "charts/movable");

        let config = EffectiveConfig::from_yaml(
            r#"
components:
  fixed:
    namespace: elsewhere
  movable:
    namespace: elsewhere
"#,
        )
        .unwrap();

        assert_eq!(config.namespace_for(&fixed), "system");
        assert_eq!(config.namespace_for(&movable), "elsewhere");
    }

    #[test]
    fn test_target_version() {
        let mut config = EffectiveConfig::default();
        assert!(config.target_version().unwrap().is_none());

        config.version = Some("v1.5.2".to_string());
        assert_eq!(config.target_version().unwrap(), Some(Version::new(1, 5, 2)));

        config.version = Some("latest".to_string());
        assert!(config.target_version().is_err());
    }

    #[test]
    fn test_parse_full_document() {
        let config = EffectiveConfig::from_yaml(
            r#"
dryRun: true
version: 1.2.0
registry:
  registry: mirror.local
components:
  ingress:
    enabled: true
    profileValues:
      - controller:
          replicaCount: 2
    installArgs:
      - name: controller.service.type
        value: NodePort
    overrides:
      - values:
          controller:
            replicaCount: 3
      - configMapRef:
          name: ingress-overrides
          key: values.yaml
"#,
        )
        .unwrap();

        assert!(config.dry_run);
        assert_eq!(config.generation, 0);
        assert_eq!(config.registry.registry.as_deref(), Some("mirror.local"));
        let ingress = config.component("ingress").unwrap();
        assert_eq!(ingress.profile_values.len(), 1);
        assert_eq!(ingress.install_args.len(), 1);
        assert_eq!(ingress.overrides.len(), 2);
    }

    #[test]
    fn test_reconcile_settings_durations() {
        let settings = ReconcileSettings::from_yaml(
            r#"
applyTimeout: 2m
readinessTimeout: 15s
retry:
  maxAttempts: 3
"#,
        )
        .unwrap();

        assert_eq!(settings.apply_timeout, Duration::from_secs(120));
        assert_eq!(settings.readiness_timeout, Duration::from_secs(15));
        assert_eq!(settings.requeue_interval, Duration::from_secs(10));
        assert_eq!(settings.retry.max_attempts, 3);
    }

    #[test]
    fn test_retry_policy() {
        assert!(!RetryPolicy::default().exhausted(1000));
        let policy = RetryPolicy::new(3);
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}

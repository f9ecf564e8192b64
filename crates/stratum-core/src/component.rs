//! Component definitions
//!
//! A component is one independently installable unit of the platform: a chart,
//! the namespace it lands in, the components it depends on, and the metadata
//! used to build its values and judge its readiness.

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::values::Values;

/// DNS-1123 label, which is what helm accepts for release names
static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

/// An installable unit of the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Unique key in the registry
    pub name: String,

    /// Namespace the chart is installed into
    pub namespace: String,

    /// Helm release name, defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Chart location handed to the package tool (path, URL or repo/chart)
    pub chart: String,

    /// Chart version, when the location needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_version: Option<String>,

    /// Names of components that must be ready first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Whether the component is enabled when the configuration says nothing
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,

    /// Built-in default values (lowest precedence)
    #[serde(default)]
    pub values: Values,

    /// Build manifest subcomponents whose images this chart consumes
    #[serde(default)]
    pub image_subcomponents: Vec<String>,

    #[serde(default)]
    pub ignore_image_overrides: bool,

    /// Keep `namespace` even when the configuration relocates components
    #[serde(default)]
    pub ignore_namespace_override: bool,

    /// A platform version change alone does not upgrade this component
    #[serde(default)]
    pub skip_upgrade: bool,

    /// Oldest platform version that may install this component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_platform_version: Option<Version>,

    #[serde(default)]
    pub readiness: ReadinessSpec,
}

fn default_true() -> bool {
    true
}

impl Component {
    /// Minimal component, mostly useful in tests and hand-built catalogs
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        chart: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            release_name: None,
            chart: chart.into(),
            chart_version: None,
            dependencies: Vec::new(),
            enabled_by_default: true,
            values: Values::new(),
            image_subcomponents: Vec::new(),
            ignore_image_overrides: false,
            ignore_namespace_override: false,
            skip_upgrade: false,
            min_platform_version: None,
            readiness: ReadinessSpec::default(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    pub fn with_workload(mut self, workload: WorkloadRef) -> Self {
        self.readiness.workloads.push(workload);
        self
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    pub fn release_name(&self) -> &str {
        self.release_name.as_deref().unwrap_or(&self.name)
    }

    /// Check the name and release name are usable as helm release names
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("name", self.name.as_str()), ("releaseName", self.release_name())] {
            if value.len() > 53 || !NAME_RE.is_match(value) {
                return Err(CoreError::InvalidComponent {
                    name: self.name.clone(),
                    message: format!(
                        "{} '{}' must be a lowercase DNS label of at most 53 characters",
                        field, value
                    ),
                });
            }
        }
        if self.namespace.is_empty() {
            return Err(CoreError::InvalidComponent {
                name: self.name.clone(),
                message: "namespace is empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Workloads that must be available before a component counts as ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessSpec {
    #[serde(default)]
    pub workloads: Vec<WorkloadRef>,

    /// Minimum available replicas per workload
    #[serde(default = "default_min_available")]
    pub min_available: i32,
}

fn default_min_available() -> i32 {
    1
}

impl Default for ReadinessSpec {
    fn default() -> Self {
        Self {
            workloads: Vec::new(),
            min_available: default_min_available(),
        }
    }
}

/// Reference to a workload owned by a component
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,

    /// Defaults to the component namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl WorkloadRef {
    pub fn deployment(name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::Deployment,
            name: name.into(),
            namespace: None,
        }
    }

    pub fn statefulset(name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::StatefulSet,
            name: name.into(),
            namespace: None,
        }
    }

    pub fn daemonset(name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::DaemonSet,
            name: name.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "Deployment"),
            WorkloadKind::StatefulSet => write!(f, "StatefulSet"),
            WorkloadKind::DaemonSet => write!(f, "DaemonSet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_defaults() {
        let component: Component = serde_yaml::from_str(
            r#"
name: cert-manager
namespace: cert-manager
chart: charts/cert-manager
readiness:
  workloads:
    - kind: Deployment
      name: cert-manager
    - kind: Deployment
      name: cert-manager-webhook
"#,
        )
        .unwrap();

        assert!(component.enabled_by_default);
        assert!(component.dependencies.is_empty());
        assert_eq!(component.release_name(), "cert-manager");
        assert_eq!(component.readiness.min_available, 1);
        assert_eq!(component.readiness.workloads.len(), 2);
        assert!(component.values.is_empty());
    }

    #[test]
    fn test_validate_names() {
        assert!(Component::new("ingress", "ingress-nginx", "charts/ingress").validate().is_ok());
        assert!(Component::new("Ingress", "ingress-nginx", "charts/ingress").validate().is_err());
        assert!(Component::new("ingress-", "ingress-nginx", "charts/ingress").validate().is_err());
        assert!(Component::new("ingress", "", "charts/ingress").validate().is_err());

        let mut long = Component::new("ingress", "ns", "charts/ingress");
        long.release_name = Some("a".repeat(54));
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_workload_display() {
        assert_eq!(WorkloadRef::deployment("api").to_string(), "Deployment/api");
        assert_eq!(
            WorkloadRef::statefulset("db").in_namespace("data").to_string(),
            "StatefulSet/data/db"
        );
    }
}

//! Execution plans
//!
//! A plan is a read-only preview of what a reconcile pass would do to each
//! component, grouped into waves: every component of a wave only depends on
//! components of earlier waves.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::config::EffectiveConfig;
use crate::registry::ComponentRegistry;
use crate::resolver::DependencyGraph;
use crate::status::{ComponentState, ComponentStatus, OverallStatus};

/// What a pass would do to one component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlannedAction {
    Install,
    Upgrade,
    Retry,
    Keep,
    Disable,
    Uninstall,
    /// Failed at the current generation; waits for a spec change
    Blocked,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Retry => "retry",
            Self::Keep => "keep",
            Self::Disable => "disable",
            Self::Uninstall => "uninstall",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Inputs for deciding one component's action
#[derive(Debug, Clone, Copy)]
pub struct Observed<'a> {
    pub enabled: bool,
    pub deleting: bool,
    pub skip_upgrade: bool,
    pub generation: i64,
    pub status: Option<&'a ComponentStatus>,
    /// Digest of the values the pass would apply
    pub digest: Option<&'a str>,
    pub target_version: Option<&'a str>,
}

/// Decide the action for one component
pub fn decide(observed: Observed<'_>) -> PlannedAction {
    let status = observed.status;
    let installed = status.is_some_and(|s| s.installed);

    if observed.deleting {
        return if installed || status.is_some_and(|s| s.state == ComponentState::Error) {
            PlannedAction::Uninstall
        } else {
            PlannedAction::Keep
        };
    }

    if !observed.enabled {
        return match status.map(|s| s.state) {
            None | Some(ComponentState::Disabled) => PlannedAction::Keep,
            Some(_) => PlannedAction::Disable,
        };
    }

    let Some(status) = status else {
        return PlannedAction::Install;
    };

    match status.state {
        ComponentState::Failed if observed.generation <= status.reconciling_generation => {
            PlannedAction::Blocked
        }
        ComponentState::Error | ComponentState::Failed => PlannedAction::Retry,
        ComponentState::Disabled
        | ComponentState::Uninstalled
        | ComponentState::PreInstalling
        | ComponentState::Installing => PlannedAction::Install,
        ComponentState::Upgrading => PlannedAction::Upgrade,
        ComponentState::Uninstalling => PlannedAction::Keep,
        ComponentState::Ready => {
            let digest_changed = observed
                .digest
                .is_some_and(|d| status.values_digest.as_deref() != Some(d));
            // skipUpgrade only ignores version bumps, never changed values
            let version_changed = !observed.skip_upgrade
                && observed
                    .target_version
                    .is_some_and(|v| status.version.as_deref() != Some(v));
            if digest_changed || version_changed {
                PlannedAction::Upgrade
            } else {
                PlannedAction::Keep
            }
        }
    }
}

/// One component in a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub component: String,
    pub namespace: String,
    pub wave: usize,
    pub action: PlannedAction,
}

/// Ordered preview of a reconcile pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Steps in execution order
    pub steps: Vec<PlanStep>,
    pub deleting: bool,
}

impl ExecutionPlan {
    /// Build a plan against the currently recorded status
    ///
    /// `digests` maps component names to the digest of the values the pass
    /// would apply; components without one are compared on version only.
    pub fn build(
        registry: &ComponentRegistry,
        graph: &DependencyGraph,
        config: &EffectiveConfig,
        current: &OverallStatus,
        digests: &BTreeMap<String, String>,
        deleting: bool,
    ) -> Self {
        let waves = wave_numbers(graph);
        let order: Vec<&str> = if deleting {
            graph.reverse_order().collect()
        } else {
            graph.order().iter().map(String::as_str).collect()
        };

        let steps = order
            .into_iter()
            .filter_map(|name| registry.get(name))
            .map(|component| {
                let action = decide(Observed {
                    enabled: config.is_enabled(component),
                    deleting,
                    skip_upgrade: component.skip_upgrade,
                    generation: config.generation,
                    status: current.component(&component.name),
                    digest: digests.get(&component.name).map(String::as_str),
                    target_version: config.version.as_deref(),
                });
                PlanStep {
                    component: component.name.clone(),
                    namespace: config.namespace_for(component).to_string(),
                    wave: waves.get(component.name.as_str()).copied().unwrap_or(0),
                    action,
                }
            })
            .collect();

        Self { steps, deleting }
    }

    pub fn step(&self, component: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.component == component)
    }

    /// Number of steps that change something
    pub fn change_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| !matches!(s.action, PlannedAction::Keep | PlannedAction::Blocked))
            .count()
    }

    pub fn wave_count(&self) -> usize {
        self.steps.iter().map(|s| s.wave + 1).max().unwrap_or(0)
    }

    /// Format as a human-readable string
    pub fn display(&self) -> String {
        let mut lines = vec![format!(
            "Execution Plan: {} components in {} waves, {} changes",
            self.steps.len(),
            self.wave_count(),
            self.change_count()
        )];

        let mut waves: BTreeMap<usize, Vec<&PlanStep>> = BTreeMap::new();
        for step in &self.steps {
            waves.entry(step.wave).or_default().push(step);
        }

        let ordered: Vec<_> = if self.deleting {
            waves.iter().rev().collect()
        } else {
            waves.iter().collect()
        };

        for (number, steps) in ordered {
            lines.push(format!("  Wave {}:", number));
            for step in steps {
                lines.push(format!(
                    "    - {} ({}): {}",
                    step.component, step.namespace, step.action
                ));
            }
        }

        lines.join("\n")
    }
}

/// Longest dependency chain below each component
fn wave_numbers(graph: &DependencyGraph) -> HashMap<&str, usize> {
    let mut waves: HashMap<&str, usize> = HashMap::new();
    // `order` is topological, so every dependency is numbered first
    for name in graph.order() {
        let wave = graph
            .dependencies_of(name)
            .iter()
            .filter_map(|dep| waves.get(dep.as_str()))
            .map(|w| w + 1)
            .max()
            .unwrap_or(0);
        waves.insert(name.as_str(), wave);
    }
    waves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    fn registry() -> ComponentRegistry {
        ComponentRegistry::new(vec![
            Component::new("crds", "system", "charts/crds"),
            Component::new("db", "data", "charts/db").with_dependencies(["crds"]),
            Component::new("cache", "data", "charts/cache").with_dependencies(["crds"]),
            Component::new("app", "apps", "charts/app").with_dependencies(["db", "cache"]),
            Component::new("extras", "apps", "charts/extras").disabled_by_default(),
        ])
        .unwrap()
    }

    fn installed(name: &str, digest: &str) -> ComponentStatus {
        ComponentStatus {
            name: name.to_string(),
            state: ComponentState::Ready,
            installed: true,
            values_digest: Some(digest.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_fresh_install_plan() {
        let registry = registry();
        let graph = DependencyGraph::build(&registry).unwrap();
        let plan = ExecutionPlan::build(
            &registry,
            &graph,
            &EffectiveConfig::default(),
            &OverallStatus::default(),
            &BTreeMap::new(),
            false,
        );

        assert_eq!(plan.step("crds").unwrap().wave, 0);
        assert_eq!(plan.step("db").unwrap().wave, 1);
        assert_eq!(plan.step("app").unwrap().wave, 2);
        assert_eq!(plan.step("app").unwrap().action, PlannedAction::Install);
        assert_eq!(plan.step("extras").unwrap().action, PlannedAction::Keep);
        assert_eq!(plan.change_count(), 4);
        assert_eq!(plan.wave_count(), 3);
    }

    #[test]
    fn test_digest_change_means_upgrade() {
        let registry = registry();
        let graph = DependencyGraph::build(&registry).unwrap();

        let mut current = OverallStatus::default();
        for name in ["crds", "db", "cache", "app"] {
            current
                .components
                .insert(name.to_string(), installed(name, "same"));
        }
        let mut digests: BTreeMap<String, String> = ["crds", "db", "cache", "app"]
            .iter()
            .map(|n| (n.to_string(), "same".to_string()))
            .collect();
        digests.insert("db".to_string(), "changed".to_string());

        let plan = ExecutionPlan::build(
            &registry,
            &graph,
            &EffectiveConfig::default(),
            &current,
            &digests,
            false,
        );

        assert_eq!(plan.step("db").unwrap().action, PlannedAction::Upgrade);
        assert_eq!(plan.step("app").unwrap().action, PlannedAction::Keep);
        assert_eq!(plan.change_count(), 1);
    }

    #[test]
    fn test_uninstall_plan_runs_in_reverse() {
        let registry = registry();
        let graph = DependencyGraph::build(&registry).unwrap();

        let mut current = OverallStatus::default();
        current
            .components
            .insert("crds".to_string(), installed("crds", "d"));
        current.components.insert("app".to_string(), installed("app", "d"));

        let plan = ExecutionPlan::build(
            &registry,
            &graph,
            &EffectiveConfig::default(),
            &current,
            &BTreeMap::new(),
            true,
        );

        let app = plan.steps.iter().position(|s| s.component == "app").unwrap();
        let crds = plan.steps.iter().position(|s| s.component == "crds").unwrap();
        assert!(app < crds);
        assert_eq!(plan.step("db").unwrap().action, PlannedAction::Keep);
        assert_eq!(plan.step("app").unwrap().action, PlannedAction::Uninstall);
    }

    #[test]
    fn test_decide_failed_waits_for_generation() {
        let failed = ComponentStatus {
            name: "db".to_string(),
            state: ComponentState::Failed,
            reconciling_generation: 3,
            ..Default::default()
        };
        let observed = Observed {
            enabled: true,
            deleting: false,
            skip_upgrade: false,
            generation: 3,
            status: Some(&failed),
            digest: None,
            target_version: None,
        };

        assert_eq!(decide(observed), PlannedAction::Blocked);
        assert_eq!(
            decide(Observed {
                generation: 4,
                ..observed
            }),
            PlannedAction::Retry
        );
    }

    #[test]
    fn test_decide_disable_and_skip_upgrade() {
        let mut ready = installed("db", "same");
        ready.version = Some("1.0.0".to_string());
        let observed = Observed {
            enabled: false,
            deleting: false,
            skip_upgrade: false,
            generation: 1,
            status: Some(&ready),
            digest: Some("same"),
            target_version: Some("1.1.0"),
        };
        assert_eq!(decide(observed), PlannedAction::Disable);

        let enabled = Observed {
            enabled: true,
            ..observed
        };
        assert_eq!(decide(enabled), PlannedAction::Upgrade);

        let skipped = Observed {
            skip_upgrade: true,
            ..enabled
        };
        assert_eq!(decide(skipped), PlannedAction::Keep);

        let changed_values = Observed {
            digest: Some("changed"),
            ..skipped
        };
        assert_eq!(decide(changed_values), PlannedAction::Upgrade);
    }

    #[test]
    fn test_display() {
        let registry = registry();
        let graph = DependencyGraph::build(&registry).unwrap();
        let plan = ExecutionPlan::build(
            &registry,
            &graph,
            &EffectiveConfig::default(),
            &OverallStatus::default(),
            &BTreeMap::new(),
            false,
        );

        insta::assert_snapshot!(plan.display(), @r"
Execution Plan: 5 components in 3 waves, 4 changes
  Wave 0:
    - crds (system): install
    - extras (apps): keep
  Wave 1:
    - db (data): install
    - cache (data): install
  Wave 2:
    - app (apps): install
");
    }
}

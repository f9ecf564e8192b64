//! Reconcile driver
//!
//! One pass walks the dependency order, decides what each component needs,
//! hands enabled components to the [`LifecycleExecutor`] and aggregates the
//! result. Passes are idempotent: with unchanged inputs a second pass makes no
//! package-tool calls and produces the same status.

use chrono::Utc;
use kube::ResourceExt;
use semver::Version;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use stratum_core::{
    BuildManifest, Component, ComponentRegistry, ComponentState, ComponentStatus, CoreError,
    DependencyGraph, EffectiveConfig, MergeEngine, OverallStatus, PassContext, PassKind,
    PlatformState, ReconcileSettings, StatusAggregator,
};

use crate::crd::Platform;
use crate::error::{KubeError, Result};
use crate::executor::{LifecycleExecutor, Prepared, Step, bounded};
use crate::hooks::HookTable;
use crate::override_source::{OverrideSourceReader, resolve_overrides};
use crate::package::PackageTool;
use crate::readiness::{ReadinessProber, WorkloadReader};
use crate::singleton::SingletonGuard;
use crate::store::PlatformStore;

/// Everything a driver needs, built once per process
#[derive(Clone)]
pub struct OrchestratorConfig {
    pub registry: Arc<ComponentRegistry>,
    /// Source of generated image overrides and the default target version
    pub manifest: Option<Arc<BuildManifest>>,
    pub package_tool: Arc<dyn PackageTool>,
    pub workloads: Arc<dyn WorkloadReader>,
    pub overrides: Arc<dyn OverrideSourceReader>,
    pub store: Arc<dyn PlatformStore>,
    pub hooks: HookTable,
    pub settings: ReconcileSettings,
}

/// What the caller should do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Run another pass after the delay
    Requeue(Duration),
    /// Nothing left to do until the resource changes
    Done,
}

/// Result of one pass, before anything is persisted
#[derive(Debug)]
pub struct PassOutcome {
    pub status: OverallStatus,
    pub action: ReconcileAction,
    /// Components still installed or of unknown state; only counted on deletion
    pub remaining: usize,
    /// Failure that stopped the pass before any component was touched
    pub error: Option<KubeError>,
}

/// The reconcile driver
pub struct Orchestrator {
    config: OrchestratorConfig,
    prober: ReadinessProber,
    guard: SingletonGuard,
    aggregator: StatusAggregator,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        let prober = ReadinessProber::new(Arc::clone(&config.workloads));
        Self {
            config,
            prober,
            guard: SingletonGuard::new(),
            aggregator: StatusAggregator,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn guard(&self) -> &SingletonGuard {
        &self.guard
    }

    /// Run one pass for a live resource and persist its status
    #[instrument(skip(self, platform), fields(name = %platform.name_any(), namespace = %platform.namespace_or_default()))]
    pub async fn reconcile(&self, platform: &Platform) -> Result<ReconcileAction> {
        let outcome = self.run_pass(platform).await?;
        self.persist(platform, &outcome.status).await?;
        match outcome.error {
            Some(err) => Err(err),
            None => Ok(outcome.action),
        }
    }

    /// Uninstall everything for a resource being deleted
    ///
    /// Returns an error while any component is still installed, so the
    /// finalizer stays in place until uninstall completes.
    #[instrument(skip(self, platform), fields(name = %platform.name_any(), namespace = %platform.namespace_or_default()))]
    pub async fn cleanup(&self, platform: &Platform) -> Result<ReconcileAction> {
        let outcome = self.pass(platform, true).await?;
        self.persist(platform, &outcome.status).await?;
        if let Some(err) = outcome.error {
            return Err(err);
        }
        if outcome.remaining > 0 {
            return Err(KubeError::UninstallIncomplete {
                remaining: outcome.remaining,
            });
        }
        info!("All components uninstalled");
        Ok(ReconcileAction::Done)
    }

    /// Compute one pass without writing status
    pub async fn run_pass(&self, platform: &Platform) -> Result<PassOutcome> {
        self.pass(platform, platform.is_deleting()).await
    }

    async fn persist(&self, platform: &Platform, status: &OverallStatus) -> Result<()> {
        if platform.spec.config.dry_run {
            debug!("Dry run, status not persisted");
            return Ok(());
        }
        if platform.status.as_ref() == Some(status) {
            debug!("Status unchanged");
            return Ok(());
        }
        self.config
            .store
            .update_status(&platform.namespace_or_default(), &platform.name_any(), status)
            .await
    }

    async fn pass(&self, platform: &Platform, deleting: bool) -> Result<PassOutcome> {
        let namespace = platform.namespace_or_default();
        let _permit = self.guard.acquire(&namespace, &platform.name_any())?;

        let config = platform.effective_config();
        let previous = platform.current_status();
        let target = self.effective_version(&config);
        let kind = pass_kind(deleting, target.as_deref(), previous.version.as_deref());

        let graph = match DependencyGraph::build(&self.config.registry) {
            Ok(graph) => graph,
            Err(err) => {
                error!(error = %err, "Invalid component catalog");
                let status = self.aggregator.fail_pass(
                    &previous,
                    kind,
                    config.generation,
                    &err.to_string(),
                    Utc::now(),
                );
                return Ok(PassOutcome {
                    status,
                    action: ReconcileAction::Done,
                    remaining: 0,
                    error: Some(err.into()),
                });
            }
        };

        let gate = check_version(target.as_deref(), previous.version.as_deref())
            .ok()
            .flatten();
        let enabled = self.enabled_set(&config, gate.as_ref());

        let paused = !deleting && self.is_paused(&config, &previous);
        let kind = if paused { PassKind::Paused } else { kind };

        let executor = LifecycleExecutor::new(
            self.config.package_tool.as_ref(),
            &self.prober,
            &self.config.hooks,
            &self.config.settings,
        )
        .dry_run(config.dry_run);

        let mut components = previous.components.clone();
        let mut unknown = 0;
        if deleting {
            unknown = self
                .uninstall_all(&executor, &graph, &config, &mut components)
                .await?;
        } else if paused {
            info!("Newer version available, waiting for a target version");
        } else {
            let ctx = ForwardPass {
                config: &config,
                namespace: &namespace,
                target: target.as_deref(),
                installed_version: previous.version.as_deref(),
                gate: gate.as_ref(),
                enabled: &enabled,
            };
            self.install_all(&executor, &graph, &ctx, &mut components)
                .await?;
        }

        let remaining = if deleting {
            unknown + components.values().filter(|c| c.installed).count()
        } else {
            0
        };

        let status = self.aggregator.aggregate(
            &previous,
            components,
            &PassContext {
                kind,
                generation: config.generation,
                target_version: target.as_deref(),
                enabled: &enabled,
            },
            Utc::now(),
        );

        if status == previous {
            debug!("Pass changed nothing");
        }

        let action = self.next_action(&config, &status, deleting, remaining);
        Ok(PassOutcome {
            status,
            action,
            remaining,
            error: None,
        })
    }

    async fn install_all(
        &self,
        executor: &LifecycleExecutor<'_>,
        graph: &DependencyGraph,
        ctx: &ForwardPass<'_>,
        components: &mut BTreeMap<String, ComponentStatus>,
    ) -> Result<()> {
        for name in graph.order() {
            let component = self.config.registry.lookup(name)?;
            if is_gated(component, ctx.gate) {
                debug!(component = %name, "Below minimum platform version, skipping");
                continue;
            }

            let namespace = ctx.config.namespace_for(component);
            let Some(current) = self
                .current_status(component, namespace, components)
                .await
            else {
                continue;
            };

            let next = if !ctx.enabled.contains(name) {
                executor.disable(component, &current)
            } else if let Some(dependency) =
                waiting_on(graph, name, ctx.enabled, components)
            {
                debug!(component = %name, dependency, "Waiting on dependency");
                Ok(current.clone())
            } else {
                let prepared = match check_version(ctx.target, ctx.installed_version) {
                    Err(err) => Err(KubeError::Core(err)),
                    Ok(_) => self.prepare(component, ctx.config, ctx.namespace).await,
                };
                let step = Step {
                    component,
                    config: ctx.config,
                    namespace,
                    version: ctx.target,
                    prepared,
                };
                executor.reconcile(&step, &current).await
            };

            let recorded = match next {
                Ok(status) => status,
                Err(err) => {
                    error!(component = %name, error = %err, "Component step aborted");
                    current
                }
            };
            components.insert(name.clone(), recorded);
        }
        Ok(())
    }

    /// Uninstall in reverse order; returns how many components could not be checked
    async fn uninstall_all(
        &self,
        executor: &LifecycleExecutor<'_>,
        graph: &DependencyGraph,
        config: &EffectiveConfig,
        components: &mut BTreeMap<String, ComponentStatus>,
    ) -> Result<usize> {
        // Components whose release could not be checked; treated as still installed
        let mut unknown = BTreeSet::new();
        for name in graph.reverse_order() {
            let component = self.config.registry.lookup(name)?;
            let namespace = config.namespace_for(component);
            let Some(current) = self
                .current_status(component, namespace, components)
                .await
            else {
                unknown.insert(name);
                continue;
            };

            let blocking = graph.dependents_of(name).iter().find(|dependent| {
                unknown.contains(dependent.as_str())
                    || components
                        .get(dependent.as_str())
                        .is_some_and(|status| status.installed)
            });
            if let Some(dependent) = blocking {
                debug!(component = name, dependent = %dependent, "Waiting for dependent to be removed");
                components.insert(name.to_string(), current);
                continue;
            }

            let recorded = match executor.uninstall(component, config, &current).await {
                Ok(status) => status,
                Err(err) => {
                    error!(component = name, error = %err, "Uninstall step aborted");
                    current
                }
            };
            components.insert(name.to_string(), recorded);
        }
        Ok(unknown.len())
    }

    /// Recorded status, or a first record based on whether the release exists
    async fn current_status(
        &self,
        component: &Component,
        namespace: &str,
        components: &BTreeMap<String, ComponentStatus>,
    ) -> Option<ComponentStatus> {
        if let Some(status) = components.get(&component.name) {
            return Some(status.clone());
        }

        match bounded(
            self.config.settings.apply_timeout,
            "release status",
            self.config
                .package_tool
                .status(component.release_name(), namespace),
        )
        .await
        {
            Ok(true) => {
                info!(component = %component.name, "Adopting existing release");
                Some(ComponentStatus::adopted(component.name.clone(), Utc::now()))
            }
            Ok(false) => Some(ComponentStatus::new(component.name.clone())),
            Err(err) => {
                warn!(component = %component.name, error = %err, "Could not read release status");
                None
            }
        }
    }

    /// Merge a component's values layers
    async fn prepare(
        &self,
        component: &Component,
        config: &EffectiveConfig,
        namespace: &str,
    ) -> Result<Prepared> {
        let resolved =
            resolve_overrides(self.config.overrides.as_ref(), component, config, namespace)
                .await?;
        let engine = MergeEngine::new(self.config.manifest.as_deref());
        Ok(Prepared::new(engine.merge(component, config, &resolved)?))
    }

    /// Components enabled for this pass, after version gating
    pub fn enabled_set(
        &self,
        config: &EffectiveConfig,
        gate: Option<&Version>,
    ) -> BTreeSet<String> {
        self.config
            .registry
            .list()
            .filter(|c| !is_gated(c, gate))
            .filter(|c| self.config.hooks.get(&c.name).is_enabled(c, config))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Explicit target version, else the build manifest's
    pub fn effective_version(&self, config: &EffectiveConfig) -> Option<String> {
        config.version.clone().or_else(|| {
            self.config
                .manifest
                .as_ref()
                .map(|manifest| manifest.version.to_string())
        })
    }

    /// Installed, no version named, and the build manifest is newer
    fn is_paused(&self, config: &EffectiveConfig, previous: &OverallStatus) -> bool {
        if config.version.is_some() {
            return false;
        }
        let installed = previous.version.as_deref().and_then(parse_version);
        match (installed, self.config.manifest.as_ref()) {
            (Some(installed), Some(manifest)) => manifest.version > installed,
            _ => false,
        }
    }

    fn next_action(
        &self,
        config: &EffectiveConfig,
        status: &OverallStatus,
        deleting: bool,
        remaining: usize,
    ) -> ReconcileAction {
        let settings = &self.config.settings;
        if config.dry_run || (deleting && remaining == 0) {
            return ReconcileAction::Done;
        }
        match status.state {
            Some(PlatformState::Ready | PlatformState::Paused | PlatformState::Failed) => {
                ReconcileAction::Requeue(settings.resync_interval)
            }
            _ => ReconcileAction::Requeue(settings.requeue_interval),
        }
    }
}

/// Inputs shared by every component of a forward pass
struct ForwardPass<'a> {
    config: &'a EffectiveConfig,
    /// Namespace of the owning resource
    namespace: &'a str,
    target: Option<&'a str>,
    installed_version: Option<&'a str>,
    gate: Option<&'a Version>,
    enabled: &'a BTreeSet<String>,
}

fn pass_kind(deleting: bool, target: Option<&str>, installed: Option<&str>) -> PassKind {
    if deleting {
        return PassKind::Uninstall;
    }
    match (target.and_then(parse_version), installed.and_then(parse_version)) {
        (Some(target), Some(installed)) if target != installed => PassKind::Upgrade,
        _ => PassKind::Install,
    }
}

fn parse_version(version: &str) -> Option<Version> {
    Version::parse(version.trim_start_matches('v')).ok()
}

/// Parse the target and reject rollbacks below the installed version
pub fn check_version(
    target: Option<&str>,
    installed: Option<&str>,
) -> std::result::Result<Option<Version>, CoreError> {
    let Some(target) = target else {
        return Ok(None);
    };
    let requested = Version::parse(target.trim_start_matches('v'))?;
    if let Some(current) = installed.and_then(parse_version)
        && requested < current
    {
        return Err(CoreError::VersionRollback {
            requested: requested.to_string(),
            installed: current.to_string(),
        });
    }
    Ok(Some(requested))
}

fn is_gated(component: &Component, gate: Option<&Version>) -> bool {
    match (&component.min_platform_version, gate) {
        (Some(minimum), Some(target)) => target < minimum,
        _ => false,
    }
}

/// First enabled dependency that is not `Ready`
fn waiting_on<'g>(
    graph: &'g DependencyGraph,
    name: &str,
    enabled: &BTreeSet<String>,
    components: &BTreeMap<String, ComponentStatus>,
) -> Option<&'g str> {
    graph
        .dependencies_of(name)
        .iter()
        .filter(|dependency| enabled.contains(dependency.as_str()))
        .find(|dependency| {
            components.get(dependency.as_str()).map(|s| s.state) != Some(ComponentState::Ready)
        })
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::PlatformSpec;
    use crate::override_source::StaticOverrideSource;
    use crate::package::MockPackageTool;
    use crate::readiness::MockWorkloadReader;
    use crate::store::MockPlatformStore;
    use stratum_core::{ConditionType, ErrorClass};

    fn orchestrator(tool: &MockPackageTool, manifest: Option<&str>) -> Orchestrator {
        let registry = ComponentRegistry::new(vec![
            Component::new("base", "system", "charts/base"),
            Component::new("edge", "edge", "charts/edge").with_dependencies(["base"]),
        ])
        .unwrap();
        let manifest = manifest.map(|version| {
            Arc::new(
                BuildManifest::from_yaml(&format!("version: {}\nregistry: quay.io/stratum\n", version))
                    .unwrap(),
            )
        });
        Orchestrator::new(OrchestratorConfig {
            registry: Arc::new(registry),
            manifest,
            package_tool: Arc::new(tool.clone()),
            workloads: Arc::new(MockWorkloadReader::new()),
            overrides: Arc::new(StaticOverrideSource::new()),
            store: Arc::new(MockPlatformStore::new()),
            hooks: HookTable::new(),
            settings: ReconcileSettings::default(),
        })
    }

    fn platform(generation: i64, version: Option<&str>, status: Option<OverallStatus>) -> Platform {
        let mut platform = Platform::new("main", PlatformSpec::default());
        platform.metadata.namespace = Some("platform".to_string());
        platform.metadata.generation = Some(generation);
        platform.spec.config.version = version.map(str::to_string);
        platform.status = status;
        platform
    }

    #[test]
    fn test_check_version() {
        assert_eq!(check_version(None, Some("1.0.0")).unwrap(), None);
        assert_eq!(
            check_version(Some("v1.2.0"), Some("1.1.0")).unwrap(),
            Some(Version::new(1, 2, 0))
        );

        let err = check_version(Some("1.0.0"), Some("1.1.0")).unwrap_err();
        assert!(matches!(err, CoreError::VersionRollback { .. }));
        assert_eq!(err.class(), ErrorClass::Terminal);

        let err = check_version(Some("latest"), None).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Terminal);
    }

    #[test]
    fn test_pass_kind() {
        assert_eq!(pass_kind(true, Some("2.0.0"), Some("1.0.0")), PassKind::Uninstall);
        assert_eq!(pass_kind(false, Some("2.0.0"), Some("1.0.0")), PassKind::Upgrade);
        assert_eq!(pass_kind(false, Some("1.0.0"), Some("1.0.0")), PassKind::Install);
        assert_eq!(pass_kind(false, Some("1.0.0"), None), PassKind::Install);
    }

    #[tokio::test]
    async fn test_install_then_upgrade_records_version() {
        let tool = MockPackageTool::new();
        let orchestrator = orchestrator(&tool, Some("1.0.0"));

        let first = orchestrator
            .run_pass(&platform(1, None, None))
            .await
            .unwrap();
        assert_eq!(first.status.state, Some(PlatformState::Ready));
        assert_eq!(first.status.version.as_deref(), Some("1.0.0"));
        assert_eq!(first.status.available.as_deref(), Some("2/2"));

        let second = orchestrator
            .run_pass(&platform(2, Some("1.1.0"), Some(first.status)))
            .await
            .unwrap();
        assert_eq!(second.status.state, Some(PlatformState::Ready));
        assert_eq!(second.status.version.as_deref(), Some("1.1.0"));
        assert_eq!(
            second.status.conditions.last().unwrap().kind,
            ConditionType::UpgradeComplete
        );
        assert_eq!(tool.operation_counts().applies, 4);
    }

    #[tokio::test]
    async fn test_newer_manifest_pauses_without_target() {
        let tool = MockPackageTool::new();
        let installed = orchestrator(&tool, Some("1.0.0"))
            .run_pass(&platform(1, None, None))
            .await
            .unwrap()
            .status;
        tool.reset_counts();

        let outcome = orchestrator(&tool, Some("1.1.0"))
            .run_pass(&platform(1, None, Some(installed)))
            .await
            .unwrap();

        assert_eq!(outcome.status.state, Some(PlatformState::Paused));
        assert_eq!(
            outcome.status.conditions.last().unwrap().kind,
            ConditionType::UpgradePaused
        );
        assert_eq!(outcome.status.version.as_deref(), Some("1.0.0"));
        assert!(tool.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_fails_every_enabled_component() {
        let tool = MockPackageTool::new();
        let orchestrator = orchestrator(&tool, None);
        let installed = orchestrator
            .run_pass(&platform(1, Some("2.0.0"), None))
            .await
            .unwrap()
            .status;
        tool.reset_counts();

        let outcome = orchestrator
            .run_pass(&platform(2, Some("1.0.0"), Some(installed)))
            .await
            .unwrap();

        // Dependents of a failed component wait instead of failing
        assert_eq!(outcome.status.state_of("base"), Some(ComponentState::Failed));
        assert_eq!(outcome.status.state_of("edge"), Some(ComponentState::Ready));
        assert_eq!(outcome.status.state, Some(PlatformState::Failed));
        assert_eq!(tool.operation_counts().applies, 0);
    }

    #[tokio::test]
    async fn test_gated_component_is_skipped() {
        let tool = MockPackageTool::new();
        let mut gated = Component::new("preview", "system", "charts/preview");
        gated.min_platform_version = Some(Version::new(2, 0, 0));
        let mut config = orchestrator(&tool, None).config.clone();
        config.registry = Arc::new(ComponentRegistry::new(vec![gated]).unwrap());
        let orchestrator = Orchestrator::new(config);

        let outcome = orchestrator
            .run_pass(&platform(1, Some("1.5.0"), None))
            .await
            .unwrap();
        assert!(outcome.status.component("preview").is_none());
        assert_eq!(outcome.status.state, Some(PlatformState::Ready));
        assert!(tool.calls().is_empty());

        let outcome = orchestrator
            .run_pass(&platform(2, Some("2.0.0"), Some(outcome.status)))
            .await
            .unwrap();
        assert_eq!(outcome.status.state_of("preview"), Some(ComponentState::Ready));
    }
}

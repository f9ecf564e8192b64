//! Lifecycle executor
//!
//! Drives one component through its state machine for one pass. Every state
//! change goes through the [`StatusAggregator`], so the executor only ever
//! returns a new record and never edits one in place.
//!
//! A step is re-entrant: if a pass is abandoned after an apply, the next pass
//! sees `reconcilingGeneration` and the stored digest and only re-probes.

use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use stratum_core::plan::{Observed, decide};
use stratum_core::{
    Component, ComponentState, ComponentStatus, ConditionType, EffectiveConfig, PlannedAction,
    ReconcileSettings, StatusAggregator, Transition, Values,
};

use crate::error::{KubeError, Result};
use crate::hooks::{HookContext, HookTable};
use crate::package::{ApplyRequest, PackageTool};
use crate::readiness::{Readiness, ReadinessProber};

/// Merged values ready to hand to the package tool
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub values: Values,
    pub digest: String,
}

impl Prepared {
    pub fn new(values: Values) -> Self {
        let digest = values.digest();
        Self { values, digest }
    }
}

/// Everything the executor needs for one enabled component
#[derive(Debug)]
pub struct Step<'a> {
    pub component: &'a Component,
    pub config: &'a EffectiveConfig,
    /// Resolved install namespace
    pub namespace: &'a str,
    /// Platform version this pass converges to
    pub version: Option<&'a str>,
    /// Merged values, or why they could not be produced
    pub prepared: Result<Prepared>,
}

impl Step<'_> {
    fn hook_context(&self) -> HookContext<'_> {
        HookContext {
            component: self.component,
            config: self.config,
            namespace: self.namespace,
            values: self.prepared.as_ref().ok().map(|p| &p.values),
        }
    }

    fn generation(&self) -> i64 {
        self.config.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Install,
    Upgrade,
}

/// Runs install, upgrade, disable and uninstall steps
pub struct LifecycleExecutor<'a> {
    tool: &'a dyn PackageTool,
    prober: &'a ReadinessProber,
    hooks: &'a HookTable,
    settings: &'a ReconcileSettings,
    aggregator: StatusAggregator,
    dry_run: bool,
}

impl<'a> LifecycleExecutor<'a> {
    pub fn new(
        tool: &'a dyn PackageTool,
        prober: &'a ReadinessProber,
        hooks: &'a HookTable,
        settings: &'a ReconcileSettings,
    ) -> Self {
        Self {
            tool,
            prober,
            hooks,
            settings,
            aggregator: StatusAggregator,
            dry_run: false,
        }
    }

    /// Compute transitions without calling hooks, the package tool or probes
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Converge an enabled component towards `Ready`
    ///
    /// Failures are recorded in the returned status. `Err` is only returned
    /// when a transition would break the state machine.
    pub async fn reconcile(
        &self,
        step: &Step<'_>,
        status: &ComponentStatus,
    ) -> Result<ComponentStatus> {
        use ComponentState::*;

        let name = step.component.name.as_str();
        match status.state {
            Failed if step.generation() <= status.reconciling_generation => {
                debug!(component = name, "Failed at this generation, waiting for a spec change");
                Ok(status.clone())
            }
            Uninstalling => {
                debug!(component = name, "Uninstall in progress, not installing");
                Ok(status.clone())
            }
            Disabled | Uninstalled | PreInstalling | Installing => {
                self.install(step, status).await
            }
            Error | Failed if status.installed => self.upgrade(step, status).await,
            Error | Failed => self.install(step, status).await,
            Upgrading => self.upgrade(step, status).await,
            Ready => {
                let action = match &step.prepared {
                    Err(_) => PlannedAction::Upgrade,
                    Ok(prepared) => decide(Observed {
                        enabled: true,
                        deleting: false,
                        skip_upgrade: step.component.skip_upgrade,
                        generation: step.generation(),
                        status: Some(status),
                        digest: Some(&prepared.digest),
                        target_version: step.version,
                    }),
                };
                if action == PlannedAction::Upgrade {
                    self.upgrade(step, status).await
                } else {
                    self.keep(step, status).await
                }
            }
        }
    }

    /// Stop managing a component without removing its release
    pub fn disable(
        &self,
        component: &Component,
        status: &ComponentStatus,
    ) -> Result<ComponentStatus> {
        match status.state {
            ComponentState::Disabled | ComponentState::Uninstalling => Ok(status.clone()),
            _ => {
                let message = if status.installed {
                    "Component disabled; release left in place"
                } else {
                    "Component disabled"
                };
                self.transition(
                    &component.name,
                    status,
                    ComponentState::Disabled,
                    ConditionType::Disabled,
                    message,
                )
            }
        }
    }

    /// Remove a component's release
    ///
    /// Uninstall failures land in `Error` and are retried; they never become
    /// `Failed`, so deletion of the owning resource always makes progress.
    pub async fn uninstall(
        &self,
        component: &Component,
        config: &EffectiveConfig,
        status: &ComponentStatus,
    ) -> Result<ComponentStatus> {
        let name = component.name.as_str();
        if !status.installed && status.state != ComponentState::Error {
            debug!(component = name, "Nothing to uninstall");
            return Ok(status.clone());
        }

        let namespace = config.namespace_for(component);
        let mut current = status.clone();
        if current.state != ComponentState::Uninstalling {
            current = self.transition(
                name,
                &current,
                ComponentState::Uninstalling,
                ConditionType::UninstallStarted,
                format!("Uninstalling release '{}'", component.release_name()),
            )?;
        }

        if !self.dry_run {
            let ctx = HookContext {
                component,
                config,
                namespace,
                values: None,
            };
            let removed = match self.hooks.get(name).pre_uninstall(&ctx).await {
                Ok(()) => {
                    bounded(
                        self.settings.apply_timeout,
                        "uninstall",
                        self.tool.uninstall(component.release_name(), namespace),
                    )
                    .await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = removed {
                warn!(component = name, error = %err, "Uninstall failed, will retry");
                return self.transition(
                    name,
                    &current,
                    ComponentState::Error,
                    ConditionType::UninstallFailed,
                    err.to_string(),
                );
            }
        }

        self.transition(
            name,
            &current,
            ComponentState::Uninstalled,
            ConditionType::UninstallComplete,
            "Uninstall complete",
        )
    }

    async fn install(&self, step: &Step<'_>, status: &ComponentStatus) -> Result<ComponentStatus> {
        let name = step.component.name.as_str();
        let mut current = status.clone();

        if !matches!(
            current.state,
            ComponentState::PreInstalling | ComponentState::Installing
        ) {
            current = self.aggregator.begin(&current, step.generation());
            current = self.transition(
                name,
                &current,
                ComponentState::PreInstalling,
                ConditionType::PreInstall,
                "Preparing install",
            )?;
        }

        let prepared = match &step.prepared {
            Ok(prepared) => prepared,
            Err(err) => return self.fail(step, current, err, Operation::Install),
        };

        if current.state == ComponentState::PreInstalling {
            if !self.dry_run
                && let Err(err) = self.hooks.get(name).pre_install(&step.hook_context()).await
            {
                return self.fail(step, current, &err, Operation::Install);
            }
            current = self.transition(
                name,
                &current,
                ComponentState::Installing,
                ConditionType::InstallStarted,
                format!("Installing release '{}'", step.component.release_name()),
            )?;
        }

        self.apply_and_probe(step, current, prepared, Operation::Install)
            .await
    }

    async fn upgrade(&self, step: &Step<'_>, status: &ComponentStatus) -> Result<ComponentStatus> {
        let mut current = status.clone();

        if current.state != ComponentState::Upgrading {
            let message = match step.version {
                Some(version) if status.version.as_deref() != Some(version) => {
                    format!("Upgrading to {}", version)
                }
                _ => "Applying changed values".to_string(),
            };
            current = self.aggregator.begin(&current, step.generation());
            current = self.transition(
                &step.component.name,
                &current,
                ComponentState::Upgrading,
                ConditionType::UpgradeStarted,
                message,
            )?;
        }

        match &step.prepared {
            Ok(prepared) => {
                self.apply_and_probe(step, current, prepared, Operation::Upgrade)
                    .await
            }
            Err(err) => self.fail(step, current, err, Operation::Upgrade),
        }
    }

    async fn apply_and_probe(
        &self,
        step: &Step<'_>,
        mut current: ComponentStatus,
        prepared: &Prepared,
        operation: Operation,
    ) -> Result<ComponentStatus> {
        let name = step.component.name.as_str();
        let applied = current.reconciling_generation == step.generation()
            && current.values_digest.as_deref() == Some(prepared.digest.as_str());

        if applied {
            debug!(component = name, "Already applied at this generation, probing only");
        } else {
            if !self.dry_run
                && let Err(err) = self.apply(step, prepared, operation).await
            {
                return self.fail(step, current, &err, operation);
            }
            current =
                self.aggregator
                    .applied(&current, step.generation(), &prepared.digest, step.version);
        }

        let readiness = if self.dry_run {
            Readiness {
                ready: true,
                ..Default::default()
            }
        } else {
            let hooks = self.hooks.get(name);
            let ctx = step.hook_context();
            match bounded(
                self.settings.readiness_timeout,
                "readiness probe",
                hooks.is_ready(&ctx, self.prober),
            )
            .await
            {
                Ok(readiness) => readiness,
                Err(err) => return self.fail(step, current, &err, operation),
            }
        };

        if !readiness.ready {
            debug!(component = name, state = %current.state, "{}", readiness.message());
            return Ok(self.aggregator.waiting(&current, readiness.waiting));
        }

        let (condition, message) = match operation {
            Operation::Install => (ConditionType::InstallComplete, "Install complete"),
            Operation::Upgrade => (ConditionType::UpgradeComplete, "Upgrade complete"),
        };
        self.transition(name, &current, ComponentState::Ready, condition, message)
    }

    async fn apply(&self, step: &Step<'_>, prepared: &Prepared, operation: Operation) -> Result<()> {
        let hooks = self.hooks.get(&step.component.name);
        let ctx = step.hook_context();

        if operation == Operation::Upgrade {
            hooks.pre_upgrade(&ctx).await?;
        }

        let request = ApplyRequest {
            release: step.component.release_name().to_string(),
            namespace: step.namespace.to_string(),
            chart: step.component.chart.clone(),
            chart_version: step.component.chart_version.clone(),
            values: prepared.values.clone(),
        };
        let outcome = bounded(self.settings.apply_timeout, "apply", self.tool.apply(&request)).await?;
        debug!(component = %step.component.name, logs = %outcome.logs, "Apply finished");

        if !outcome.installed {
            return Err(KubeError::PackageTool {
                release: request.release,
                message: "release not installed after apply".to_string(),
            });
        }

        if operation == Operation::Install {
            hooks.post_install(&ctx).await?;
        }
        Ok(())
    }

    /// Nothing to apply: refresh availability and advance the generation
    async fn keep(&self, step: &Step<'_>, status: &ComponentStatus) -> Result<ComponentStatus> {
        let name = step.component.name.as_str();
        let available = if self.dry_run {
            status.available
        } else {
            let ctx = step.hook_context();
            match bounded(
                self.settings.readiness_timeout,
                "readiness probe",
                self.hooks.get(name).is_ready(&ctx, self.prober),
            )
            .await
            {
                Ok(readiness) => readiness.ready,
                Err(err) => {
                    warn!(component = name, error = %err, "Readiness probe failed");
                    status.available
                }
            }
        };

        debug!(component = name, "Up to date");
        Ok(self
            .aggregator
            .observed(status, step.generation(), available))
    }

    fn fail(
        &self,
        step: &Step<'_>,
        current: ComponentStatus,
        err: &KubeError,
        operation: Operation,
    ) -> Result<ComponentStatus> {
        let name = step.component.name.as_str();
        let condition = match operation {
            Operation::Install => ConditionType::InstallFailed,
            Operation::Upgrade => ConditionType::UpgradeFailed,
        };
        let errored = self.transition(
            name,
            &current,
            ComponentState::Error,
            condition,
            err.to_string(),
        )?;

        let class = err.class();
        let reason = if !class.is_retryable() {
            format!("{} error: {}", class, err)
        } else if self.settings.retry.exhausted(errored.failure_count) {
            format!("Gave up after {} consecutive failures", errored.failure_count)
        } else {
            warn!(
                component = name,
                failures = errored.failure_count,
                error = %err,
                "Step failed, will retry"
            );
            return Ok(errored);
        };

        error!(component = name, error = %err, "Component failed");
        // A resumed step may not have started at this generation; stamp it so
        // `Failed` holds until the generation moves on.
        let errored = ComponentStatus {
            reconciling_generation: errored.reconciling_generation.max(step.generation()),
            ..errored
        };
        self.transition(
            name,
            &errored,
            ComponentState::Failed,
            ConditionType::Failed,
            reason,
        )
    }

    fn transition(
        &self,
        component: &str,
        status: &ComponentStatus,
        to: ComponentState,
        condition: ConditionType,
        message: impl Into<String>,
    ) -> Result<ComponentStatus> {
        let transition = Transition::new(status.state, to, condition, message);
        info!(component, from = %status.state, to = %to, "{}", transition.message);
        Ok(self.aggregator.record(status, &transition, Utc::now())?)
    }
}

/// Run `fut`, turning expiry into a transient timeout error
pub(crate) async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(KubeError::Timeout(format!(
            "{} ({})",
            humantime::format_duration(limit),
            what
        ))),
    }
}

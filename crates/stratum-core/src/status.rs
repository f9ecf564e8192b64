//! Component and platform status with the transition rules between states
//!
//! Status records are only ever changed through [`StatusAggregator`]. Every
//! state change appends exactly one [`Condition`]; history is never trimmed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{CoreError, Result};

/// Lifecycle state of a single component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    #[default]
    Disabled,
    PreInstalling,
    Installing,
    Ready,
    Upgrading,
    Uninstalling,
    Uninstalled,
    Error,
    Failed,
}

impl ComponentState {
    /// Whether an operation is in flight
    pub fn is_transitioning(self) -> bool {
        matches!(
            self,
            Self::PreInstalling | Self::Installing | Self::Upgrading | Self::Uninstalling
        )
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    /// Allowed state changes
    pub fn can_transition_to(self, to: ComponentState) -> bool {
        use ComponentState::*;
        match (self, to) {
            (from, to) if from == to => false,
            // Disabling never removes anything, so it is allowed from every live state
            (Uninstalling, Disabled) => false,
            (_, Disabled) => true,
            (_, Uninstalling) => !matches!(self, Uninstalled),
            (Disabled | Uninstalled | Error | Failed, PreInstalling) => true,
            (PreInstalling, Installing) => true,
            (Installing | Upgrading, Ready) => true,
            (Ready | Error | Failed, Upgrading) => true,
            (PreInstalling | Installing | Upgrading | Uninstalling, Error) => true,
            (Error, Failed) => true,
            (Uninstalling, Uninstalled) => true,
            _ => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::PreInstalling => "PreInstalling",
            Self::Installing => "Installing",
            Self::Ready => "Ready",
            Self::Upgrading => "Upgrading",
            Self::Uninstalling => "Uninstalling",
            Self::Uninstalled => "Uninstalled",
            Self::Error => "Error",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of a recorded transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    PreInstall,
    InstallStarted,
    InstallComplete,
    InstallFailed,
    UpgradeStarted,
    UpgradeComplete,
    UpgradeFailed,
    UpgradePaused,
    UninstallStarted,
    UninstallComplete,
    UninstallFailed,
    Disabled,
    Failed,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PreInstall => "PreInstall",
            Self::InstallStarted => "InstallStarted",
            Self::InstallComplete => "InstallComplete",
            Self::InstallFailed => "InstallFailed",
            Self::UpgradeStarted => "UpgradeStarted",
            Self::UpgradeComplete => "UpgradeComplete",
            Self::UpgradeFailed => "UpgradeFailed",
            Self::UpgradePaused => "UpgradePaused",
            Self::UninstallStarted => "UninstallStarted",
            Self::UninstallComplete => "UninstallComplete",
            Self::UninstallFailed => "UninstallFailed",
            Self::Disabled => "Disabled",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// One entry of a condition history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// A single observed state change, as produced by the lifecycle executor
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: ComponentState,
    pub to: ComponentState,
    pub condition: ConditionType,
    pub message: String,
}

impl Transition {
    pub fn new(
        from: ComponentState,
        to: ComponentState,
        condition: ConditionType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            from,
            to,
            condition,
            message: message.into(),
        }
    }
}

/// Convergence record of one component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub name: String,

    #[serde(default)]
    pub state: ComponentState,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Platform version last applied successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub last_reconciled_generation: i64,

    /// Generation being applied; 0 when idle
    #[serde(default)]
    pub reconciling_generation: i64,

    #[serde(default)]
    pub available: bool,

    /// Whether the chart is known to be present in the cluster
    #[serde(default)]
    pub installed: bool,

    /// Consecutive transient failures
    #[serde(default)]
    pub failure_count: u32,

    /// Digest of the last applied values; cleared while an operation has not
    /// applied anything yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_digest: Option<String>,

    /// Workloads still below their availability threshold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waiting_for: Vec<String>,
}

impl ComponentStatus {
    /// First record for a component nobody has installed yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// First record for a component whose release already exists
    pub fn adopted(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            state: ComponentState::Ready,
            installed: true,
            available: true,
            conditions: vec![Condition {
                kind: ConditionType::InstallComplete,
                message: "Found an existing release".to_string(),
                last_transition_time: now,
            }],
            ..Default::default()
        }
    }

    pub fn last_condition(&self) -> Option<&Condition> {
        self.conditions.last()
    }
}

/// Overall state of the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformState {
    Ready,
    #[default]
    Reconciling,
    Upgrading,
    Paused,
    Uninstalling,
    Failed,
}

impl fmt::Display for PlatformState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "Ready",
            Self::Reconciling => "Reconciling",
            Self::Upgrading => "Upgrading",
            Self::Paused => "Paused",
            Self::Uninstalling => "Uninstalling",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Aggregate status written back to the owning resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PlatformState>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub components: BTreeMap<String, ComponentStatus>,

    /// Platform version fully applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub observed_generation: i64,

    /// `ready/enabled`, e.g. `4/5`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<String>,
}

impl OverallStatus {
    pub fn component(&self, name: &str) -> Option<&ComponentStatus> {
        self.components.get(name)
    }

    pub fn state_of(&self, name: &str) -> Option<ComponentState> {
        self.components.get(name).map(|c| c.state)
    }
}

/// What kind of pass produced a set of statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Install,
    Upgrade,
    Uninstall,
    Paused,
}

/// Inputs to [`StatusAggregator::aggregate`] besides the component records
#[derive(Debug, Clone)]
pub struct PassContext<'a> {
    pub kind: PassKind,
    pub generation: i64,
    pub target_version: Option<&'a str>,
    /// Components enabled in this pass
    pub enabled: &'a BTreeSet<String>,
}

/// Sole writer of status records
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusAggregator;

impl StatusAggregator {
    /// Apply one transition to a component record
    pub fn record(
        &self,
        status: &ComponentStatus,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<ComponentStatus> {
        if status.state != transition.from || !transition.from.can_transition_to(transition.to) {
            return Err(CoreError::IllegalTransition {
                component: status.name.clone(),
                from: status.state.to_string(),
                to: transition.to.to_string(),
            });
        }

        let mut next = status.clone();
        next.state = transition.to;
        next.waiting_for.clear();
        next.conditions.push(Condition {
            kind: transition.condition,
            message: transition.message.clone(),
            last_transition_time: now,
        });

        match transition.to {
            ComponentState::Ready => {
                next.failure_count = 0;
                next.available = true;
                next.installed = true;
                if next.reconciling_generation != 0 {
                    next.last_reconciled_generation = next.reconciling_generation;
                    next.reconciling_generation = 0;
                }
            }
            ComponentState::Error => {
                next.failure_count = next.failure_count.saturating_add(1);
                next.available = false;
            }
            ComponentState::Uninstalled => {
                next.installed = false;
                next.available = false;
                next.values_digest = None;
                next.version = None;
                next.last_reconciled_generation = 0;
                next.reconciling_generation = 0;
            }
            ComponentState::Uninstalling
            | ComponentState::PreInstalling
            | ComponentState::Installing => {
                next.available = false;
            }
            _ => {}
        }

        Ok(next)
    }

    /// Start an operation for `generation`
    ///
    /// The previous digest is dropped so the operation always applies at least
    /// once.
    pub fn begin(&self, status: &ComponentStatus, generation: i64) -> ComponentStatus {
        ComponentStatus {
            reconciling_generation: generation,
            values_digest: None,
            ..status.clone()
        }
    }

    /// Record a successful apply of `digest` at `generation`
    pub fn applied(
        &self,
        status: &ComponentStatus,
        generation: i64,
        digest: &str,
        version: Option<&str>,
    ) -> ComponentStatus {
        ComponentStatus {
            reconciling_generation: generation,
            values_digest: Some(digest.to_string()),
            version: version.map(str::to_string).or_else(|| status.version.clone()),
            installed: true,
            ..status.clone()
        }
    }

    /// Record the workloads an applied step is still waiting for
    pub fn waiting(&self, status: &ComponentStatus, waiting: Vec<String>) -> ComponentStatus {
        ComponentStatus {
            waiting_for: waiting,
            ..status.clone()
        }
    }

    /// Record a pass that found nothing to change
    pub fn observed(
        &self,
        status: &ComponentStatus,
        generation: i64,
        available: bool,
    ) -> ComponentStatus {
        ComponentStatus {
            last_reconciled_generation: generation.max(status.last_reconciled_generation),
            available,
            ..status.clone()
        }
    }

    /// Apply a sequence of transitions in order
    pub fn record_all(
        &self,
        status: &ComponentStatus,
        transitions: &[Transition],
        now: DateTime<Utc>,
    ) -> Result<ComponentStatus> {
        let mut current = status.clone();
        for transition in transitions {
            current = self.record(&current, transition, now)?;
        }
        Ok(current)
    }

    /// Derive the platform status from every component record
    pub fn aggregate(
        &self,
        previous: &OverallStatus,
        components: BTreeMap<String, ComponentStatus>,
        ctx: &PassContext<'_>,
        now: DateTime<Utc>,
    ) -> OverallStatus {
        let enabled: Vec<&ComponentStatus> = components
            .values()
            .filter(|c| ctx.enabled.contains(&c.name))
            .collect();
        let ready = enabled.iter().filter(|c| c.state.is_ready()).count();
        let any_transitioning = components.values().any(|c| c.state.is_transitioning());
        let failed: Vec<&str> = enabled
            .iter()
            .filter(|c| c.state == ComponentState::Failed)
            .map(|c| c.name.as_str())
            .collect();

        let state = match ctx.kind {
            PassKind::Uninstall => PlatformState::Uninstalling,
            PassKind::Paused => PlatformState::Paused,
            _ if ready == enabled.len() => PlatformState::Ready,
            _ if !failed.is_empty() && !any_transitioning => PlatformState::Failed,
            PassKind::Upgrade => PlatformState::Upgrading,
            PassKind::Install => PlatformState::Reconciling,
        };

        // An upgrade can finish within one pass without ever leaving Ready
        let upgraded = state == PlatformState::Ready
            && ctx.kind == PassKind::Upgrade
            && ctx.target_version.is_some()
            && previous.version.as_deref() != ctx.target_version;

        let mut conditions = previous.conditions.clone();
        if previous.state != Some(state) || upgraded {
            let (kind, message) = match state {
                PlatformState::Ready => {
                    if upgraded || previous.state == Some(PlatformState::Upgrading) {
                        (ConditionType::UpgradeComplete, "Upgrade complete".to_string())
                    } else {
                        (ConditionType::InstallComplete, "Install complete".to_string())
                    }
                }
                PlatformState::Reconciling => {
                    (ConditionType::InstallStarted, "Install in progress".to_string())
                }
                PlatformState::Upgrading => {
                    (ConditionType::UpgradeStarted, "Upgrade in progress".to_string())
                }
                PlatformState::Paused => (
                    ConditionType::UpgradePaused,
                    "A newer version is available; set the target version to upgrade".to_string(),
                ),
                PlatformState::Uninstalling => {
                    (ConditionType::UninstallStarted, "Uninstall in progress".to_string())
                }
                PlatformState::Failed => {
                    let kind = if ctx.kind == PassKind::Upgrade {
                        ConditionType::UpgradeFailed
                    } else {
                        ConditionType::InstallFailed
                    };
                    (kind, format!("Failed components: {}", failed.join(", ")))
                }
            };
            conditions.push(Condition {
                kind,
                message,
                last_transition_time: now,
            });
        }

        if ctx.kind == PassKind::Uninstall
            && components.values().all(|c| !c.installed)
            && conditions.last().map(|c| c.kind) != Some(ConditionType::UninstallComplete)
        {
            conditions.push(Condition {
                kind: ConditionType::UninstallComplete,
                message: "Uninstall complete".to_string(),
                last_transition_time: now,
            });
        }

        let version = if state == PlatformState::Ready {
            ctx.target_version
                .map(str::to_string)
                .or_else(|| previous.version.clone())
        } else if ctx.kind == PassKind::Uninstall {
            None
        } else {
            previous.version.clone()
        };

        OverallStatus {
            state: Some(state),
            conditions,
            available: Some(format!("{}/{}", ready, enabled.len())),
            components,
            version,
            observed_generation: ctx.generation,
        }
    }

    /// Mark a whole pass as failed before any component was touched
    ///
    /// Component records are kept as they are. The condition is only appended
    /// when it differs from the last one, so repeating the same failure is a
    /// no-op.
    pub fn fail_pass(
        &self,
        previous: &OverallStatus,
        kind: PassKind,
        generation: i64,
        message: &str,
        now: DateTime<Utc>,
    ) -> OverallStatus {
        let condition = match kind {
            PassKind::Upgrade => ConditionType::UpgradeFailed,
            PassKind::Uninstall => ConditionType::UninstallFailed,
            PassKind::Install | PassKind::Paused => ConditionType::InstallFailed,
        };

        let mut next = previous.clone();
        next.state = Some(PlatformState::Failed);
        next.observed_generation = generation;

        let repeated = next
            .conditions
            .last()
            .is_some_and(|c| c.kind == condition && c.message == message);
        if !repeated {
            next.conditions.push(Condition {
                kind: condition,
                message: message.to_string(),
                last_transition_time: now,
            });
        }
        next
    }
}

//! Stratum Core - Core types for the component lifecycle orchestrator
//!
//! This crate holds everything that does not talk to a cluster:
//! - `ComponentRegistry`: The catalog of installable components
//! - `DependencyGraph`: Validated install/uninstall ordering
//! - `MergeEngine`: Layered values for each component
//! - `StatusAggregator`: Component state transitions and the overall status
//! - `ExecutionPlan`: Read-only preview of a reconcile pass

pub mod build_manifest;
pub mod component;
pub mod config;
pub mod error;
pub mod install_args;
pub mod overrides;
pub mod plan;
pub mod registry;
pub mod resolver;
pub mod status;
pub mod values;

pub use build_manifest::{BuildManifest, ImageEntry, RegistryOverride, Subcomponent};
pub use component::{Component, ReadinessSpec, WorkloadKind, WorkloadRef};
pub use config::{ComponentSpec, EffectiveConfig, ReconcileSettings, RetryPolicy};
pub use error::{CoreError, ErrorClass};
pub use install_args::{InstallArg, KeyValue, expand_install_args, expand_to_values};
pub use overrides::{
    KeySelector, Layer, LayerKind, MergeEngine, Override, OverrideSource, SourceKind,
};
pub use plan::{ExecutionPlan, PlanStep, PlannedAction};
pub use registry::{Catalog, ComponentRegistry};
pub use resolver::{DependencyGraph, resolve_order};
pub use status::{
    ComponentState, ComponentStatus, Condition, ConditionType, OverallStatus, PassContext,
    PassKind, PlatformState, StatusAggregator, Transition,
};
pub use values::{Values, parse_set_values};

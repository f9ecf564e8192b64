//! Stratum Kube - Kubernetes integration for Stratum
//!
//! This crate provides:
//! - **Package Tool**: Install/upgrade/uninstall releases through `helm`
//! - **Readiness**: Workload availability probes
//! - **Override Sources**: ConfigMap and Secret values documents
//! - **Lifecycle Executor**: The per-component state machine
//! - **Reconcile Driver**: Ordered, idempotent passes over the whole platform
//! - **Controller**: The `Platform` watch loop with its finalizer

pub mod controller;
pub mod crd;
pub mod driver;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod override_source;
pub mod package;
pub mod readiness;
pub mod singleton;
pub mod store;

pub use controller::{ControllerOptions, ControllerState, run_controller};
pub use crd::{PLATFORM_FINALIZER, Platform, PlatformSpec};
pub use driver::{Orchestrator, OrchestratorConfig, PassOutcome, ReconcileAction};
pub use error::{KubeError, Result};
pub use executor::{LifecycleExecutor, Prepared, Step};
pub use hooks::{ComponentHooks, DefaultHooks, HookContext, HookTable};
pub use override_source::{
    KubeOverrideSource, OverrideSourceReader, StaticOverrideSource, resolve_overrides,
};
pub use package::{
    ApplyOutcome, ApplyRequest, HelmCli, MockPackageTool, OperationCounts, PackageTool,
};
pub use readiness::{KubeWorkloads, MockWorkloadReader, Readiness, ReadinessProber, WorkloadReader};
pub use singleton::{SingletonGuard, SingletonPermit, verify_operator_singleton};
pub use store::{KubePlatformStore, MockPlatformStore, PlatformStore, StoreCounts};

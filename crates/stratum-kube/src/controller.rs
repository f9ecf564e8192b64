//! Controller wiring
//!
//! Watches `Platform` objects and runs the driver on every change and on the
//! resync interval. Deletion is held back by a finalizer until the uninstall
//! pass reports nothing left.

use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Controller},
        finalizer::{Event as FinalizerEvent, finalizer},
        watcher::Config,
    },
    ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use stratum_core::ErrorClass;

use crate::crd::{PLATFORM_FINALIZER, Platform};
use crate::driver::{Orchestrator, ReconcileAction};
use crate::error::{KubeError, Result};
use crate::singleton::verify_operator_singleton;

/// Requeue delay after a configuration error
pub const CONFIGURATION_RETRY: Duration = Duration::from_secs(300);

/// Requeue delay after any other error
pub const TRANSIENT_RETRY: Duration = Duration::from_secs(15);

/// Shared state for the controller
pub struct ControllerState {
    pub client: kube::Client,
    pub orchestrator: Orchestrator,
}

/// Operator process settings that are not part of a pass
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Namespace the operator pods run in
    pub operator_namespace: String,
    /// Label selector matching operator pods
    pub operator_selector: String,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>, options: ControllerOptions) -> Result<()> {
    let client = state.client.clone();
    verify_operator_singleton(
        client.clone(),
        &options.operator_namespace,
        &options.operator_selector,
    )
    .await?;

    let platforms: Api<Platform> = match &options.namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };

    // Verify CRD exists
    if let Err(e) = platforms.list(&Default::default()).await {
        error!("Platform CRD not found. Please install the CRD first: {:?}", e);
        return Err(KubeError::InvalidConfig(
            "Platform CRD not installed".to_string(),
        ));
    }

    info!(namespace = ?options.namespace, "Starting Platform controller");

    Controller::new(platforms, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {:?}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Platform>, ctx: Arc<ControllerState>) -> Result<Action> {
    let api: Api<Platform> = Api::namespaced(ctx.client.clone(), &obj.namespace_or_default());

    finalizer(&api, PLATFORM_FINALIZER, obj, |event| async {
        let action = match event {
            FinalizerEvent::Apply(platform) => ctx.orchestrator.reconcile(&platform).await?,
            FinalizerEvent::Cleanup(platform) => ctx.orchestrator.cleanup(&platform).await?,
        };
        Ok::<_, KubeError>(to_action(action))
    })
    .await
    .map_err(KubeError::from)
}

fn to_action(action: ReconcileAction) -> Action {
    match action {
        ReconcileAction::Requeue(delay) => Action::requeue(delay),
        ReconcileAction::Done => Action::await_change(),
    }
}

/// Delay before retrying a failed reconcile
pub fn retry_delay(error: &KubeError) -> Duration {
    match error.class() {
        ErrorClass::Configuration => CONFIGURATION_RETRY,
        ErrorClass::Transient | ErrorClass::Terminal => TRANSIENT_RETRY,
    }
}

fn error_policy(platform: Arc<Platform>, error: &KubeError, _ctx: Arc<ControllerState>) -> Action {
    let delay = retry_delay(error);
    match error {
        KubeError::UninstallIncomplete { .. } | KubeError::OrchestrationInProgress { .. } => {
            info!(platform = %platform.key(), %error, "Requeueing")
        }
        _ => error!(platform = %platform.key(), %error, class = %error.class(), "Reconciliation error"),
    }
    Action::requeue(delay)
}

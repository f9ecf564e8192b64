//! Run command - start the operator

use std::sync::Arc;

use stratum_core::{ReconcileSettings, RetryPolicy};
use stratum_kube::{
    ControllerOptions, ControllerState, HelmCli, HookTable, KubeOverrideSource,
    KubePlatformStore, KubeWorkloads, Orchestrator, OrchestratorConfig, run_controller,
};
use tracing::info;

use super::Sources;
use crate::RunArgs;
use crate::error::{CliError, Result};

/// Reconcile settings from the command line
fn settings(args: &RunArgs) -> ReconcileSettings {
    ReconcileSettings {
        apply_timeout: args.apply_timeout,
        readiness_timeout: args.readiness_timeout,
        requeue_interval: args.requeue_interval,
        resync_interval: args.resync_interval,
        retry: RetryPolicy::new(args.max_failures),
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let (registry, manifest) = Sources::load(&args.sources)?.into_shared();

    info!(
        components = registry.len(),
        manifest_version = ?manifest.as_ref().map(|m| m.version.to_string()),
        "Starting stratum operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default()
        .await
        .map_err(|e| CliError::Cluster {
            message: format!("cannot build a Kubernetes client: {}", e),
        })?;
    info!("Connected to Kubernetes cluster");

    let mut helm = HelmCli::new(&args.helm);
    if let Some(context) = &args.kube_context {
        helm = helm.with_context(context);
    }

    let orchestrator = Orchestrator::new(OrchestratorConfig {
        registry,
        manifest,
        package_tool: Arc::new(helm),
        workloads: Arc::new(KubeWorkloads::new(client.clone())),
        overrides: Arc::new(KubeOverrideSource::new(client.clone())),
        store: Arc::new(KubePlatformStore::new(client.clone())),
        hooks: HookTable::new(),
        settings: settings(&args),
    });

    let state = Arc::new(ControllerState {
        client,
        orchestrator,
    });
    let options = ControllerOptions {
        namespace: args.namespace,
        operator_namespace: args.operator_namespace,
        operator_selector: args.operator_selector,
    };

    run_controller(state, options).await?;
    info!("Controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_settings_from_flags() {
        let harness = Harness::parse_from([
            "stratum",
            "--catalog",
            "catalog.yaml",
            "--apply-timeout",
            "2m",
            "--max-failures",
            "3",
        ]);
        let settings = settings(&harness.run);

        assert_eq!(settings.apply_timeout, Duration::from_secs(120));
        assert_eq!(settings.readiness_timeout, Duration::from_secs(30));
        assert_eq!(settings.resync_interval, Duration::from_secs(300));
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(harness.run.helm.to_str(), Some("helm"));
    }
}

//! Plan command - preview a reconcile pass without touching the cluster

use std::collections::BTreeMap;

use stratum_core::{DependencyGraph, ExecutionPlan, MergeEngine, OverallStatus};
use tracing::warn;

use super::{Sources, load_config};
use crate::error::Result;
use crate::{OutputFormat, PlanArgs, display};

pub fn run(args: &PlanArgs) -> Result<()> {
    let sources = Sources::load(&args.sources)?;
    let config = load_config(args.config.as_deref())?;
    let current = match &args.status {
        Some(path) => serde_yaml::from_str::<OverallStatus>(&std::fs::read_to_string(path)?)?,
        None => OverallStatus::default(),
    };

    let graph = DependencyGraph::build(&sources.registry)?;

    // Only inline overrides can be resolved offline; the rest compare on version
    let engine = MergeEngine::new(sources.manifest.as_ref());
    let mut digests = BTreeMap::new();
    for component in sources.registry.list() {
        match engine.merge_inline(component, &config) {
            Ok(values) => {
                digests.insert(component.name.clone(), values.digest());
            }
            Err(e) => warn!(component = %component.name, error = %e, "Values not resolvable offline"),
        }
    }

    let plan = ExecutionPlan::build(
        &sources.registry,
        &graph,
        &config,
        &current,
        &digests,
        args.uninstall,
    );

    match args.output {
        OutputFormat::Text => display::print_plan(&plan)?,
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&plan)?),
    }
    Ok(())
}

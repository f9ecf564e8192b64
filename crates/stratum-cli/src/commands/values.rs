//! Values command - show the merged values of one component

use console::style;
use stratum_core::{CoreError, MergeEngine, parse_set_values};

use super::{Sources, load_config};
use crate::error::{CliError, Result};
use crate::{OutputFormat, ValuesArgs};

pub fn run(args: &ValuesArgs) -> Result<()> {
    let sources = Sources::load(&args.sources)?;
    let config = load_config(args.config.as_deref())?;
    let component = sources.registry.lookup(&args.component)?;

    let engine = MergeEngine::new(sources.manifest.as_ref());
    let mut values = engine
        .merge_inline(component, &config)
        .map_err(|e| match e {
            CoreError::InvalidOverride { .. } => CliError::config_with_help(
                e.to_string(),
                "ConfigMap and Secret overrides are only resolved by the operator; use --set to preview them",
            ),
            other => other.into(),
        })?;

    if !args.set.is_empty() {
        values.merge(&parse_set_values(&args.set)?);
    }

    if !config.is_enabled(component) {
        eprintln!(
            "{} component '{}' is disabled in this configuration",
            style("note:").yellow().bold(),
            component.name
        );
    }

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(values.inner())?),
        OutputFormat::Yaml | OutputFormat::Text => print!("{}", values.to_yaml()?),
    }
    Ok(())
}

//! Display formatting for CLI output
//!
//! Plans are grouped by wave, with each action colored by what it does to the
//! cluster.

use console::{Style, style};
use std::collections::BTreeMap;
use std::io::{self, Write};

use stratum_core::{ExecutionPlan, PlanStep, PlannedAction};

/// Style for a planned action
fn action_style(action: PlannedAction) -> Style {
    match action {
        PlannedAction::Install => Style::new().green(),
        PlannedAction::Upgrade | PlannedAction::Retry => Style::new().yellow(),
        PlannedAction::Uninstall | PlannedAction::Blocked => Style::new().red(),
        PlannedAction::Disable => Style::new().magenta(),
        PlannedAction::Keep => Style::new().dim(),
    }
}

/// Write a plan grouped by wave
pub fn write_plan(out: &mut impl Write, plan: &ExecutionPlan) -> io::Result<()> {
    let heading = if plan.deleting {
        "UNINSTALL PLAN"
    } else {
        "EXECUTION PLAN"
    };
    writeln!(out, "{}", style(heading).bold().underlined())?;
    writeln!(
        out,
        "  {} components in {} waves, {} changes",
        plan.steps.len(),
        plan.wave_count(),
        style(plan.change_count()).cyan()
    )?;

    let mut waves: BTreeMap<usize, Vec<&PlanStep>> = BTreeMap::new();
    for step in &plan.steps {
        waves.entry(step.wave).or_default().push(step);
    }
    let ordered: Vec<_> = if plan.deleting {
        waves.iter().rev().collect()
    } else {
        waves.iter().collect()
    };

    let width = plan
        .steps
        .iter()
        .map(|s| s.component.len())
        .max()
        .unwrap_or(0);

    for (wave, steps) in ordered {
        writeln!(out)?;
        writeln!(out, "  {}", style(format!("Wave {}", wave)).bold())?;
        for step in steps {
            writeln!(
                out,
                "    {:width$}  {:<10} {}",
                step.component,
                action_style(step.action).apply_to(step.action.to_string()),
                style(&step.namespace).dim(),
                width = width
            )?;
        }
    }
    Ok(())
}

/// Print a plan to stdout
pub fn print_plan(plan: &ExecutionPlan) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_plan(&mut out, plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{Component, ComponentRegistry, DependencyGraph, EffectiveConfig, OverallStatus};

    #[test]
    fn test_write_plan_groups_waves() {
        console::set_colors_enabled(false);
        let registry = ComponentRegistry::new(vec![
            Component::new("crds", "system", "charts/crds"),
            Component::new("db", "data", "charts/db").with_dependencies(["crds"]),
        ])
        .unwrap();
        let graph = DependencyGraph::build(&registry).unwrap();
        let plan = ExecutionPlan::build(
            &registry,
            &graph,
            &EffectiveConfig::default(),
            &OverallStatus::default(),
            &Default::default(),
            false,
        );

        let mut buf = Vec::new();
        write_plan(&mut buf, &plan).unwrap();
        let text = String::from_utf8(buf).unwrap();

        insta::assert_snapshot!(text, @r"
        EXECUTION PLAN
          2 components in 2 waves, 2 changes

          Wave 0
            crds  install    system

          Wave 1
            db    install    data
        ");
    }
}

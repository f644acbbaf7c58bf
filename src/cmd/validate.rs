//! Graph and quality gate commands.

use std::process::ExitCode;

use anyhow::Result;

use taskforge::dag::{TaskNode, validate_dag, validate_steel_thread};
use taskforge::errors::TaskforgeError;
use taskforge::planning::load_definitions;

use super::super::ValidateCommands;
use super::{Ctx, exit_code, print_list};

fn state_nodes(ctx: &Ctx) -> Result<Vec<TaskNode>> {
    let state = ctx.store().load()?;
    Ok(state.tasks.values().map(TaskNode::from).collect())
}

fn definition_nodes(ctx: &Ctx) -> Result<Vec<TaskNode>> {
    let defs = load_definitions(&ctx.store().tasks_dir())?;
    Ok(defs.iter().map(|(_, def)| TaskNode::from(def)).collect())
}

/// A broken graph surfaces as a validation error; failing gates exit 1.
pub fn cmd_validate(ctx: &Ctx, command: ValidateCommands) -> Result<ExitCode> {
    match command {
        ValidateCommands::Dag { definitions } => {
            let nodes = if definitions {
                definition_nodes(ctx)?
            } else {
                state_nodes(ctx)?
            };
            let order = validate_dag(&nodes).map_err(TaskforgeError::from)?;
            let report = serde_json::json!({ "valid": true, "order": order });
            ctx.emit(&report, |_| {
                println!(
                    "{} {} task(s), no cycles",
                    console::style("✓").green(),
                    order.len()
                );
                println!("  Order: {}", order.join(" -> "));
            })?;
        }
        ValidateCommands::SteelThread => {
            let report = validate_steel_thread(&state_nodes(ctx)?).map_err(TaskforgeError::from)?;
            ctx.emit(&report, |r| {
                if r.order.is_empty() {
                    println!("No steel-thread tasks.");
                    return;
                }
                println!("Steel thread: {}", r.order.join(" -> "));
                if !r.is_connected() {
                    println!("  {} components", r.components.len());
                }
                print_list("Warnings", &r.warnings);
            })?;
        }
        ValidateCommands::Gates { phase, threshold } => {
            let phase = phase.unwrap_or(ctx.config.leakage_phase);
            let threshold = threshold.unwrap_or(ctx.config.coverage_threshold);
            let report = ctx.store().run_gates(phase, threshold)?;
            ctx.emit(&report, |r| {
                println!();
                for gate in &r.gates {
                    let mark = if gate.passed {
                        console::style("✓").green()
                    } else {
                        console::style("✗").red()
                    };
                    println!("  {} {}", mark, gate.name);
                }
                if let Some(coverage) = &r.spec_coverage {
                    println!(
                        "  Coverage: {}/{} behaviors ({:.1}%)",
                        coverage.covered_behaviors,
                        coverage.total_behaviors,
                        coverage.ratio * 100.0
                    );
                }
                println!();
                print_list("Failures", &r.failures());
                print_list("Warnings", &r.warnings());
            })?;
            return Ok(exit_code(report.passed));
        }
    }
    Ok(ExitCode::SUCCESS)
}

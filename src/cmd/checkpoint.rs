//! Execution batch checkpoint commands.

use std::process::ExitCode;

use anyhow::Result;

use taskforge::checkpoint::{Checkpoint, CheckpointManager};

use super::super::CheckpointCommands;
use super::{Ctx, exit_code, print_list};

fn print_checkpoint(checkpoint: &Checkpoint) {
    println!("  Batch:     {}", checkpoint.batch_id);
    println!("  Status:    {}", checkpoint.status);
    println!("  Spawned:   {}", checkpoint.spawned_at.to_rfc3339());
    print_list("Pending", &checkpoint.tasks.pending);
    print_list("Completed", &checkpoint.tasks.completed);
    print_list("Failed", &checkpoint.tasks.failed);
}

/// `recover` exits 1 when any task was left orphaned.
pub fn cmd_checkpoint(ctx: &Ctx, command: CheckpointCommands) -> Result<ExitCode> {
    let manager = CheckpointManager::for_store(&ctx.store());

    match command {
        CheckpointCommands::Create { task_ids } => {
            let checkpoint = manager.create(&task_ids)?;
            ctx.emit(&checkpoint, |c| {
                println!("{}", console::style("Checkpoint created").bold().green());
                print_checkpoint(c);
            })?;
        }
        CheckpointCommands::Update { task_id, outcome } => {
            let checkpoint = manager.update_task(&task_id, outcome)?;
            ctx.emit(&checkpoint, |_| {
                println!("{} recorded as {}", task_id, outcome);
            })?;
        }
        CheckpointCommands::Complete => {
            let checkpoint = manager.complete()?;
            ctx.emit(&checkpoint, |c| {
                println!("Batch {} complete.", c.batch_id);
            })?;
        }
        CheckpointCommands::Status => {
            let status = manager.status()?;
            ctx.emit(&status, |status| match status {
                None => println!("No checkpoint."),
                Some(s) => {
                    println!(
                        "{} {} of {} settled",
                        console::style("Checkpoint").bold().cyan(),
                        s.completed_count + s.failed_count,
                        s.total
                    );
                    print_checkpoint(&s.checkpoint);
                    if s.orphaned_count > 0 {
                        println!("  Orphaned:");
                        for (id, reason) in &s.checkpoint.orphaned {
                            println!("  - {}: {}", id, reason);
                        }
                    }
                }
            })?;
        }
        CheckpointCommands::Recover => {
            let report = manager.recover()?;
            ctx.emit(&report, |r| {
                println!("Recovering batch {}", r.batch_id);
                for task in &r.recovered {
                    println!(
                        "  {} {} -> {} (was {})",
                        console::style("✓").green(),
                        task.task_id,
                        task.outcome,
                        task.previous_status
                    );
                }
                for task in &r.orphaned {
                    println!(
                        "  {} {}: {}",
                        console::style("?").yellow(),
                        task.task_id,
                        task.reason
                    );
                }
            })?;
            return Ok(exit_code(report.orphaned.is_empty()));
        }
        CheckpointCommands::Clear => {
            let removed = manager.clear()?;
            let report = serde_json::json!({ "removed": removed });
            ctx.emit(&report, |_| {
                if removed {
                    println!("Checkpoint cleared.");
                } else {
                    println!("No checkpoint to clear.");
                }
            })?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

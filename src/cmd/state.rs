//! State document commands: init, status, task loading, artifacts, phases.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;

use taskforge::state::{ArtifactKind, TaskValidationVerdict};

use super::{Ctx, exit_code, print_list};

pub fn cmd_init(ctx: &Ctx, target_dir: Option<&Path>) -> Result<()> {
    let target = match target_dir {
        Some(dir) => dir,
        None => ctx.config.require_target_dir()?,
    };
    let store = ctx.store();
    let state = store.init(&target.display().to_string())?;

    ctx.emit(&state, |state| {
        println!();
        println!("{}", console::style("Initialized task state").bold().green());
        println!("  State file: {}", store.state_path().display());
        println!("  Target dir: {}", state.target_dir);
        println!("  Phase:      {}", state.phase.current);
        println!();
        println!("Next: write task definitions to {}", store.tasks_dir().display());
        println!();
    })
}

pub fn cmd_status(ctx: &Ctx) -> Result<()> {
    let summary = ctx.store().status()?;
    ctx.emit(&summary, |s| {
        println!();
        println!("{}", console::style("Task State").bold().cyan());
        println!("  Phase:      {}", s.phase);
        if !s.completed_phases.is_empty() {
            let done: Vec<String> = s.completed_phases.iter().map(|p| p.to_string()).collect();
            println!("  Completed:  {}", done.join(", "));
        }
        println!("  Target dir: {}", s.target_dir);
        println!("  Progress:   {} tasks done", s.progress);
        for (status, count) in &s.by_status {
            if *count > 0 {
                println!("    {:<8} {}", status, count);
            }
        }
        if s.halted {
            println!("  {}", console::style("Halt requested").yellow().bold());
        }
        println!();
        print_list("Active", &s.active_tasks);
        print_list("Ready", &s.ready_tasks);
        print_list("Failed", &s.failed_tasks);
    })
}

pub fn cmd_ready(ctx: &Ctx) -> Result<()> {
    let ready = ctx.store().ready_tasks()?;
    ctx.emit(&ready, |ready| {
        if ready.is_empty() {
            println!("No tasks are ready.");
            return;
        }
        println!("{:<10} {:<6} Name", "Task", "Phase");
        for task in ready {
            let marker = if task.steel_thread { " *" } else { "" };
            println!("{:<10} {:<6} {}{}", task.id, task.phase, task.name, marker);
        }
    })
}

pub fn cmd_load_tasks(ctx: &Ctx) -> Result<()> {
    let report = ctx.store().load_tasks()?;
    ctx.emit(&report, |r| {
        println!(
            "Loaded {} new task(s), {} already tracked.",
            r.added.len(),
            r.existing.len()
        );
        print_list("Added", &r.added);
    })
}

/// Exits 1 when the artifact was recorded as invalid.
pub fn cmd_register_artifact(ctx: &Ctx, kind: ArtifactKind, path: Option<&Path>) -> Result<ExitCode> {
    let schemas = ctx.schemas();
    let artifact = ctx.store().register_artifact(kind, path, schemas.as_ref())?;
    ctx.emit(&artifact, |a| {
        if a.valid {
            println!("{} {} registered ({})", console::style("✓").green(), kind, a.path);
        } else {
            println!("{} {} is invalid ({})", console::style("✗").red(), kind, a.path);
            if let Some(error) = &a.error {
                println!("  {}", error);
            }
        }
    })?;
    Ok(exit_code(artifact.valid))
}

pub fn cmd_validate_tasks(
    ctx: &Ctx,
    verdict: TaskValidationVerdict,
    summary: Option<String>,
    issues: Vec<String>,
) -> Result<()> {
    let validation = ctx
        .store()
        .register_task_validation(verdict, summary, issues)?;
    ctx.emit(&validation, |v| {
        println!("Task validation recorded: {}", v.verdict);
        print_list("Issues", &v.issues);
    })
}

pub fn cmd_log_tokens(
    ctx: &Ctx,
    task_id: &str,
    input_tokens: u64,
    output_tokens: u64,
    cost_usd: f64,
    model: Option<&str>,
) -> Result<()> {
    let store = ctx.store();
    store.log_tokens(task_id, input_tokens, output_tokens, cost_usd, model)?;
    let execution = store.load()?.execution;
    ctx.emit(&execution, |e| {
        println!(
            "Logged {} tokens for {} (total {} tokens, ${:.4})",
            input_tokens + output_tokens,
            task_id,
            e.total_tokens,
            e.total_cost_usd
        );
    })
}

/// With `check`, exits 1 when the phase cannot be left.
pub fn cmd_advance(ctx: &Ctx, check: bool) -> Result<ExitCode> {
    let store = ctx.store();
    if check {
        let report = store.check_advance()?;
        ctx.emit(&report, |r| match &r.next {
            Some(next) if r.blockers.is_empty() => {
                println!("Ready to advance: {} -> {}", r.current, next)
            }
            Some(next) => {
                println!("Cannot advance {} -> {}", r.current, next);
                print_list("Blockers", &r.blockers);
            }
            None => println!("{} is the final phase.", r.current),
        })?;
        return Ok(exit_code(report.can_advance()));
    }

    let transition = store.advance()?;
    ctx.emit(&transition, |t| {
        println!(
            "{} {} -> {}",
            console::style("Advanced").green().bold(),
            t.from,
            t.to
        );
    })?;
    Ok(ExitCode::SUCCESS)
}

pub fn cmd_replan(ctx: &Ctx, reason: &str) -> Result<()> {
    let transition = ctx.store().replan(reason)?;
    ctx.emit(&transition, |t| {
        println!("Re-planning: {} -> {} ({})", t.from, t.to, reason);
    })
}

pub fn cmd_recover_state(ctx: &Ctx) -> Result<()> {
    let fallback = ctx
        .config
        .target_dir
        .as_ref()
        .map(|dir| dir.display().to_string());
    let recovery = ctx.store().recover_state(fallback.as_deref())?;
    ctx.emit(&recovery, |r| {
        if !r.recovered {
            println!("State document is healthy; nothing to recover.");
            return;
        }
        println!(
            "{} {} task(s) recovered",
            console::style("Recovered:").yellow().bold(),
            r.tasks_recovered
        );
        if let Some(backup) = &r.backup_path {
            println!("  Backup: {}", backup.display());
        }
        print_list("Data lost", &r.data_lost);
    })
}

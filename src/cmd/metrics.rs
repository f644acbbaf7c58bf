//! Read-only metrics commands.

use anyhow::Result;

use super::Ctx;

fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

pub fn cmd_metrics(ctx: &Ctx) -> Result<()> {
    let m = ctx.store().metrics()?;
    ctx.emit(&m, |m| {
        println!();
        println!("{}", console::style("Performance").bold().cyan());
        println!("  Tasks:          {}", m.total_tasks);
        println!(
            "  Complete/Failed/Skipped: {}/{}/{}",
            m.completed_tasks, m.failed_tasks, m.skipped_tasks
        );
        println!("  Pending:        {}", m.pending_tasks);
        println!("  Running:        {}", m.running_tasks);
        println!("  Completion:     {}", percent(m.completion_rate));
        println!("  Success:        {}", percent(m.success_rate));
        println!("  First attempt:  {}", percent(m.first_attempt_success_rate));
        println!("  Avg duration:   {:.1}s", m.avg_duration_seconds);
        println!("  Tokens:         {}", m.total_tokens);
        println!("  Cost:           ${:.4}", m.total_cost_usd);
        println!();
    })
}

pub fn cmd_planning_metrics(ctx: &Ctx) -> Result<()> {
    let m = ctx.store().planning_metrics()?;
    ctx.emit(&m, |m| {
        println!();
        println!("{}", console::style("Planning Progress").bold().cyan());
        println!(
            "{:<8} {:<8} {:<8} Progress",
            "Phase", "Tasks", "Done"
        );
        for (phase, total) in &m.tasks_per_phase {
            let done = m.completed_per_phase.get(phase).copied().unwrap_or(0);
            let progress = m.phase_progress.get(phase).copied().unwrap_or(0.0);
            let marker = if *phase == m.current_phase { " <" } else { "" };
            println!(
                "{:<8} {:<8} {:<8} {}{}",
                phase,
                total,
                done,
                percent(progress),
                marker
            );
        }
        println!();
        println!("  Overall:   {}", percent(m.overall_progress));
        println!("  Remaining: {}", m.remaining_tasks);
        println!("  Ready:     {}", m.ready_tasks);
        println!("  Blocked:   {}", m.blocked_tasks);
        println!();
    })
}

pub fn cmd_failure_metrics(ctx: &Ctx) -> Result<()> {
    let m = ctx.store().failure_metrics()?;
    ctx.emit(&m, |m| {
        if m.total_failures == 0 {
            println!("No failed tasks.");
            return;
        }
        println!();
        println!(
            "{} {} ({} retryable)",
            console::style("Failures:").red().bold(),
            m.total_failures,
            m.retryable_count
        );
        for (category, count) in &m.by_category {
            println!("  {:<14} {}", category.to_string(), count);
        }
        println!();
        for task in &m.failed_tasks {
            println!(
                "  {:<10} {:<14} attempts={} {}",
                task.task_id,
                task.category.to_string(),
                task.attempts,
                task.message
            );
        }
        println!();
    })
}

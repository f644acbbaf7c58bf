//! Task lifecycle, verification and calibration commands.

use std::path::Path;

use anyhow::{Context, Result};

use taskforge::bundle::{BundleGenerator, load_result};
use taskforge::state::{
    CalibrationOutcome, CriterionCheck, Lifecycle, Recommendation, TaskFiles, TaskRecord,
    VerificationVerdict,
};

use super::super::TaskCommands;
use super::{Ctx, print_list};

fn print_record(verb: &str, task: &TaskRecord) {
    println!(
        "{} {} ({}) is now {}",
        console::style(verb).bold(),
        task.id,
        task.name,
        task.status
    );
}

pub fn cmd_task(ctx: &Ctx, command: TaskCommands) -> Result<()> {
    let store = ctx.store();
    let bundles_dir = store.bundles_dir();
    let generator = BundleGenerator::new(store.clone());
    let lifecycle = Lifecycle::new(store);

    let (verb, record) = match command {
        TaskCommands::Start { task_id } => {
            generator.ensure_intact(&task_id)?;
            ("Started", lifecycle.start(&task_id)?)
        }
        TaskCommands::Complete {
            task_id,
            created,
            modified,
            from_result,
        } => {
            let mut files = TaskFiles::default();
            files.merge(TaskFiles { created, modified });
            if from_result {
                files.merge(load_result(&bundles_dir, &task_id)?.files.to_task_files());
            }
            ("Completed", lifecycle.complete(&task_id, files)?)
        }
        TaskCommands::Fail {
            task_id,
            category,
            message,
            retryable,
        } => (
            "Failed",
            lifecycle.fail(&task_id, category, &message, retryable)?,
        ),
        TaskCommands::Retry { task_id } => ("Retrying", lifecycle.retry(&task_id)?),
        TaskCommands::Skip { task_id, reason } => ("Skipped", lifecycle.skip(&task_id, &reason)?),
    };

    ctx.emit(&record, |task| {
        print_record(verb, task);
        if let Some(failure) = &task.failure {
            println!(
                "  {} {} (retryable: {})",
                failure.category, failure.message, failure.retryable
            );
        }
    })
}

pub fn cmd_record_verification(
    ctx: &Ctx,
    task_id: &str,
    verdict: VerificationVerdict,
    recommendation: Recommendation,
    criteria_file: Option<&Path>,
) -> Result<()> {
    let criteria: Vec<CriterionCheck> = match criteria_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse criteria in {}", path.display()))?
        }
        None => Vec::new(),
    };

    let blocked = ctx
        .store()
        .record_verification(task_id, verdict, recommendation, criteria)?;
    let report = serde_json::json!({
        "task_id": task_id,
        "verdict": verdict,
        "recommendation": recommendation,
        "blocked": blocked,
    });
    ctx.emit(&report, |_| {
        println!("Verification for {}: {} / {}", task_id, verdict, recommendation);
        print_list("Blocked downstream", &blocked);
    })
}

pub fn cmd_record_calibration(
    ctx: &Ctx,
    task_id: &str,
    outcome: CalibrationOutcome,
    notes: Option<String>,
) -> Result<()> {
    let entry = ctx.store().record_calibration(task_id, outcome, notes)?;
    ctx.emit(&entry, |e| {
        println!(
            "Calibration for {}: verifier said {}, outcome {}",
            e.task_id, e.verdict, e.actual_outcome
        );
    })
}

pub fn cmd_calibration(ctx: &Ctx) -> Result<()> {
    let data = ctx.store().calibration()?;
    let score = data.score();
    let report = serde_json::json!({
        "score": score,
        "history": data.history,
    });
    ctx.emit(&report, |_| {
        println!();
        println!("{}", console::style("Verifier Calibration").bold().cyan());
        println!("  Score:           {:.2}", score.score);
        println!("  Verified:        {}", score.total_verified);
        println!("  Correct:         {}", score.correct);
        println!("  False positives: {}", score.false_positives);
        println!("  False negatives: {}", score.false_negatives);
        println!();
        print_list("False positives", &data.false_positives);
        print_list("False negatives", &data.false_negatives);
    })
}

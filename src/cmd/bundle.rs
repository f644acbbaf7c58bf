//! Execution bundle commands.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;

use taskforge::bundle::{BundleGenerator, attach_git, load_result};

use super::super::BundleCommands;
use super::{Ctx, exit_code, print_list};

fn generator(ctx: &Ctx) -> BundleGenerator {
    let generator = BundleGenerator::new(ctx.store());
    match ctx.schemas() {
        Some(schemas) => generator.with_schemas(Arc::new(schemas)),
        None => generator,
    }
}

/// Validation commands exit 1 on an invalid bundle.
pub async fn cmd_bundle(ctx: &Ctx, command: BundleCommands) -> Result<ExitCode> {
    let generator = generator(ctx);

    match command {
        BundleCommands::Generate { task_id } => {
            let bundle = generator.generate(&task_id)?;
            ctx.emit(&bundle, |b| {
                println!(
                    "{} bundle for {} ({} behaviors, {} files)",
                    console::style("Generated").green().bold(),
                    b.task_id,
                    b.behaviors.len(),
                    b.files.len()
                );
            })?;
        }
        BundleCommands::GenerateReady { max_workers } => {
            let workers = max_workers.unwrap_or(ctx.config.max_workers).max(1);
            let report = generator.generate_ready(workers).await?;
            ctx.emit(&report, |r| {
                println!("Generated {} bundle(s).", r.generated.len());
                print_list("Generated", &r.generated);
                for (task_id, error) in &r.failed {
                    println!("  {} {}: {}", console::style("✗").red(), task_id, error);
                }
            })?;
            return Ok(exit_code(report.is_success()));
        }
        BundleCommands::Validate { task_id } => {
            let report = generator.validate(&task_id)?;
            ctx.emit(&report, |r| {
                if r.valid {
                    println!("{} bundle {} is valid", console::style("✓").green(), task_id);
                } else {
                    println!("{} bundle {} is invalid", console::style("✗").red(), task_id);
                    print_list("Errors", &r.errors);
                }
            })?;
            return Ok(exit_code(report.valid));
        }
        BundleCommands::ValidateIntegrity { task_id } => {
            let report = generator.validate_integrity(&task_id)?;
            ctx.emit(&report, |r| {
                if r.valid {
                    println!("Bundle {} matches the files on disk.", task_id);
                } else {
                    println!(
                        "{} bundle {} is stale",
                        console::style("!").yellow().bold(),
                        task_id
                    );
                    print_list("Missing", &r.missing_files);
                    print_list("Changed", &r.changed_files);
                }
            })?;
            return Ok(exit_code(report.valid));
        }
        BundleCommands::List => {
            let bundles = generator.list()?;
            ctx.emit(&bundles, |bundles| {
                if bundles.is_empty() {
                    println!("No bundles.");
                    return;
                }
                println!("{:<10} {:<6} {:<25} Name", "Task", "Phase", "Created");
                for b in bundles {
                    println!(
                        "{:<10} {:<6} {:<25} {}",
                        b.task_id,
                        b.phase,
                        b.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        b.name
                    );
                }
            })?;
        }
        BundleCommands::Clean => {
            let removed = generator.clean()?;
            let report = serde_json::json!({ "removed": removed });
            ctx.emit(&report, |_| println!("Removed {} bundle(s).", removed))?;
        }
        BundleCommands::ResultFiles { task_id } => {
            let files = load_result(&generator.bundles_dir(), &task_id)?.all_files();
            ctx.emit(&files, |files| {
                for file in files {
                    println!("{}", file);
                }
            })?;
        }
        BundleCommands::UpdateGit {
            task_id,
            sha,
            message,
        } => {
            let result = attach_git(&generator.bundles_dir(), &task_id, &sha, &message)?;
            ctx.emit(&result, |_| {
                println!("Recorded commit {} for {}", sha, task_id);
            })?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

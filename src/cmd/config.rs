//! Configuration view and validation commands: `taskforge config`.

use anyhow::Result;

use taskforge::config::TaskforgeToml;

use super::super::ConfigCommands;
use super::{Ctx, print_list};

fn show_file(toml: &TaskforgeToml) {
    println!("[paths]");
    if let Some(dir) = &toml.paths.target_dir {
        println!("  target_dir = \"{}\"", dir);
    }
    if let Some(dir) = &toml.paths.schema_dir {
        println!("  schema_dir = \"{}\"", dir);
    }
    println!("[bundle]");
    println!("  max_workers = {}", toml.bundle.max_workers);
    println!("[gates]");
    println!("  coverage_threshold = {}", toml.gates.coverage_threshold);
    println!("  leakage_phase = {}", toml.gates.leakage_phase);
    println!("[state]");
    println!("  lock_timeout_secs = {}", toml.state.lock_timeout_secs);
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  format = \"{}\"", toml.logging.format);
}

pub fn cmd_config(ctx: &Ctx, command: Option<ConfigCommands>) -> Result<()> {
    let config = &ctx.config;
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            let effective = serde_json::json!({
                "config_file": config_path,
                "config_file_exists": config_path.exists(),
                "planning_dir": config.planning_dir,
                "target_dir": config.target_dir,
                "schema_dir": config.schema_dir,
                "log_level": config.log_level,
                "log_format": config.log_format,
                "max_workers": config.max_workers,
                "coverage_threshold": config.coverage_threshold,
                "leakage_phase": config.leakage_phase,
                "lock_timeout_secs": config.lock_timeout().as_secs(),
                "file": config.file(),
            });
            ctx.emit(&effective, |_| {
                println!();
                println!("{}", console::style("Taskforge Configuration").bold().cyan());
                println!();
                if config_path.exists() {
                    println!("Config file: {}", config_path.display());
                } else {
                    println!("No {} found; using defaults.", config_path.display());
                }
                println!();
                show_file(config.file());
                println!();
                println!("Effective values (with env/CLI overrides):");
                println!("  planning_dir = \"{}\"", config.planning_dir.display());
                match &config.target_dir {
                    Some(dir) => println!("  target_dir = \"{}\"", dir.display()),
                    None => println!("  target_dir = (unset)"),
                }
                match &config.schema_dir {
                    Some(dir) => println!("  schema_dir = \"{}\"", dir.display()),
                    None => println!("  schema_dir = (unset)"),
                }
                println!("  log_level = \"{}\"", config.log_level);
                println!();
            })?;
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            let report = serde_json::json!({
                "valid": warnings.is_empty(),
                "warnings": warnings,
            });
            ctx.emit(&report, |_| {
                if !config_path.exists() {
                    println!("No taskforge.toml found. Using defaults (valid).");
                } else if warnings.is_empty() {
                    println!("Configuration is valid.");
                } else {
                    print_list("Configuration warnings", &warnings);
                }
            })?;
        }
        Some(ConfigCommands::Init) => {
            TaskforgeToml::default().save(&config_path)?;
            let report = serde_json::json!({ "created": config_path });
            ctx.emit(&report, |_| {
                println!("Created taskforge.toml at {}", config_path.display());
                println!();
                println!("You can now customize:");
                println!("  - [paths] target_dir, schema_dir");
                println!("  - [bundle] max_workers");
                println!("  - [gates] coverage_threshold, leakage_phase");
                println!("  - [logging] level, format");
            })?;
        }
    }

    Ok(())
}

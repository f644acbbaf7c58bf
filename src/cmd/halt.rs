//! Cooperative halt commands.

use std::process::ExitCode;

use anyhow::Result;

use super::{Ctx, exit_code, print_list};

pub fn cmd_halt(ctx: &Ctx, reason: &str, requested_by: &str) -> Result<()> {
    let status = ctx.store().request_halt(reason, requested_by)?;
    ctx.emit(&status, |_| {
        println!(
            "{} requested by {}: {}",
            console::style("Halt").yellow().bold(),
            requested_by,
            reason
        );
        println!("Running tasks finish; no new tasks should start.");
    })
}

pub fn cmd_resume(ctx: &Ctx) -> Result<()> {
    let store = ctx.store();
    store.resume_execution()?;
    let status = store.halt_status()?;
    ctx.emit(&status, |_| println!("Execution resumed."))
}

/// Exits 1 when a halt has been requested, 0 otherwise.
pub fn cmd_check_halt(ctx: &Ctx) -> Result<ExitCode> {
    let halted = ctx.store().check_halt()?;
    let report = serde_json::json!({ "halted": halted });
    ctx.emit(&report, |_| {
        if halted {
            println!("halted");
        } else {
            println!("running");
        }
    })?;
    Ok(exit_code(!halted))
}

pub fn cmd_confirm_halt(ctx: &Ctx) -> Result<()> {
    let active = ctx.store().confirm_halt()?;
    let report = serde_json::json!({ "active_tasks": active });
    ctx.emit(&report, |_| {
        println!("Halt confirmed.");
        print_list("Still running", &active);
    })
}

pub fn cmd_halt_status(ctx: &Ctx) -> Result<()> {
    let status = ctx.store().halt_status()?;
    ctx.emit(&status, |s| {
        if !s.halted {
            println!("No halt requested.");
            return;
        }
        println!("{}", console::style("Halt requested").yellow().bold());
        if let Some(reason) = &s.reason {
            println!("  Reason:       {}", reason);
        }
        if let Some(by) = &s.requested_by {
            println!("  Requested by: {}", by);
        }
        if let Some(at) = s.requested_at {
            println!("  Requested at: {}", at.to_rfc3339());
        }
        match s.halted_at {
            Some(at) => println!("  Confirmed at: {}", at.to_rfc3339()),
            None => println!("  Not yet confirmed"),
        }
        if let Some(task) = &s.active_task {
            println!("  Active task:  {}", task);
        }
    })
}

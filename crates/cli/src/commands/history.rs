use anyhow::{Context, Result};
use unravel_core::runlog::read_tail;

use crate::commands::open_project;

/// List recorded runs, oldest first.
pub fn runs_list_command(root: &str, json: bool) -> Result<()> {
    let ctx = open_project(root)?;
    let runs = ctx.db.list_runs().context("Failed to list runs")?;

    if json {
        let serialized =
            serde_json::to_string_pretty(&runs).context("Failed to serialize runs to JSON")?;
        println!("{}", serialized);
        return Ok(());
    }

    println!("Runs ({}):", runs.len());
    if runs.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for run in runs {
        println!(
            "  - [{}] {} -> {} transformed={} skipped={} literals={} removed={} at {}",
            run.status.as_str(),
            run.input,
            run.output,
            run.transformed,
            run.skipped,
            run.literals_recovered,
            run.methods_removed,
            run.finished_at
        );
    }
    Ok(())
}

/// Print the persistent run log, optionally only its last `tail` lines.
pub fn log_show_command(root: &str, tail: Option<usize>) -> Result<()> {
    let ctx = open_project(root)?;
    if !ctx.log_path.exists() {
        println!("(log is empty: {})", ctx.log_path.display());
        return Ok(());
    }
    let lines = read_tail(&ctx.log_path, tail)
        .with_context(|| format!("Failed to read log {}", ctx.log_path.display()))?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

use std::path::Path;

use anyhow::{anyhow, Result};
use unravel_core::services::{ProjectRunner, RunOverrides};

use crate::commands::open_project;
use crate::resolve_against;

/// Deobfuscate an archive inside the project at `root`.
pub fn run_command(
    root: &str,
    input: &str,
    output: Option<&str>,
    overrides: RunOverrides,
    json: bool,
) -> Result<()> {
    let ctx = open_project(root)?;
    let input_path = resolve_against(&ctx.layout.root, input);
    if !input_path.is_file() {
        return Err(anyhow!("Input archive does not exist: {}", input_path.display()));
    }
    let output_path = output.map(|o| resolve_against(&ctx.layout.root, o));

    let runner = ProjectRunner::new(&ctx);
    let report = runner.run(&input_path, output_path.as_deref(), &overrides)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Deobfuscation {}:", report.status.as_str());
    println!("  Input: {}", report.input.display());
    println!("  Output: {}", report.output.display());
    println!("  Units: {} transformed, {} skipped", report.transformed, report.skipped);
    println!("  Literals recovered: {}", report.stats.literals_recovered);
    println!("  Symbols renamed: {}", report.stats.symbols_renamed);
    println!("  Methods removed: {}", report.stats.methods_removed);
    if report.stats.native_methods > 0 {
        println!("  Native methods (manual review): {}", report.stats.native_methods);
    }
    if let Some(log) = report.log_path.as_deref().map(Path::display) {
        println!("  Log: {}", log);
    }

    Ok(())
}

use std::collections::BTreeMap;
use std::fs;

use anyhow::{anyhow, Context, Result};
use unravel_core::db::MappingOrigin;
use unravel_core::naming::is_valid_member_name;

use crate::commands::{now_rfc3339, open_project};
use crate::resolve_against;

/// Set a manual mapping. Manual entries win over dictionary defaults and predictions.
pub fn map_set_command(root: &str, old: &str, new: &str) -> Result<()> {
    if old.is_empty() || !is_valid_member_name(new) {
        return Err(anyhow!("Invalid mapping '{}' -> '{}'", old, new));
    }
    let ctx = open_project(root)?;
    ctx.db
        .upsert_mapping(old, new, MappingOrigin::Manual, &now_rfc3339())
        .context("Failed to store mapping")?;
    println!("Mapped {old} -> {new} (manual)");
    Ok(())
}

/// List persisted mappings.
pub fn map_list_command(root: &str, json: bool) -> Result<()> {
    let ctx = open_project(root)?;
    let mappings = ctx.db.list_mappings().context("Failed to list name mappings")?;

    if json {
        let serialized = serde_json::to_string_pretty(&mappings)
            .context("Failed to serialize mappings to JSON")?;
        println!("{}", serialized);
        return Ok(());
    }

    println!("Mappings ({}):", mappings.len());
    if mappings.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for m in mappings {
        println!("  - {} -> {} [{}]", m.old_name, m.new_name, m.origin.as_str());
    }
    Ok(())
}

/// Delete a persisted mapping of any origin.
///
/// Dictionary defaults still apply to the name on the next run; predictions are made afresh.
pub fn map_delete_command(root: &str, old: &str) -> Result<()> {
    let ctx = open_project(root)?;
    let deleted = ctx.db.delete_mapping(old).context("Failed to delete mapping")?;
    if deleted == 0 {
        println!("No mapping for {old}");
    } else {
        println!("Deleted mapping for {old}");
    }
    Ok(())
}

/// Import a JSON object `{ "old": "new", ... }` as manual mappings.
pub fn map_import_command(root: &str, file: &str) -> Result<()> {
    let ctx = open_project(root)?;
    let path = resolve_against(&ctx.layout.root, file);
    let json = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read mapping file {}", path.display()))?;
    let entries: BTreeMap<String, String> =
        serde_json::from_str(&json).context("Mapping file must be a JSON object of strings")?;

    if let Some((old, new)) = entries.iter().find(|(o, n)| o.is_empty() || !is_valid_member_name(n))
    {
        return Err(anyhow!("Invalid mapping '{}' -> '{}' in {}", old, new, path.display()));
    }

    let now = now_rfc3339();
    for (old, new) in &entries {
        ctx.db
            .upsert_mapping(old, new, MappingOrigin::Manual, &now)
            .with_context(|| format!("Failed to store mapping {old}"))?;
    }
    println!("Imported {} mapping(s) from {}", entries.len(), path.display());
    Ok(())
}

/// Export persisted mappings as a JSON object, to a file or stdout.
pub fn map_export_command(root: &str, file: Option<&str>) -> Result<()> {
    let ctx = open_project(root)?;
    let mappings = ctx.db.list_mappings().context("Failed to list name mappings")?;
    let object: BTreeMap<String, String> =
        mappings.into_iter().map(|m| (m.old_name, m.new_name)).collect();
    let json = serde_json::to_string_pretty(&object)?;

    match file {
        Some(file) => {
            let path = resolve_against(&ctx.layout.root, file);
            fs::write(&path, json)
                .with_context(|| format!("Failed to write mapping file {}", path.display()))?;
            println!("Exported {} mapping(s) to {}", object.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

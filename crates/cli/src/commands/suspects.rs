use anyhow::{anyhow, Context, Result};
use unravel_core::naming::DEFAULT_SUSPECTS;

use crate::commands::open_project;

pub fn suspect_add_command(root: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("Suspect method name must not be empty"));
    }
    let ctx = open_project(root)?;
    let added = ctx.db.add_suspect(name).context("Failed to add suspect method")?;
    if added {
        println!("Added suspect method: {name}");
    } else {
        println!("Suspect method already listed: {name}");
    }
    Ok(())
}

/// List built-in and project suspect names.
pub fn suspect_list_command(root: &str) -> Result<()> {
    let ctx = open_project(root)?;
    let stored = ctx.db.list_suspects().context("Failed to list suspect methods")?;

    println!("Suspect methods ({}):", DEFAULT_SUSPECTS.len() + stored.len());
    for name in DEFAULT_SUSPECTS {
        println!("  - {name} [built-in]");
    }
    for name in stored {
        println!("  - {name}");
    }
    Ok(())
}

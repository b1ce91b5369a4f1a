use std::path::Path;

use anyhow::Result;

use crate::canonicalize_or_current;

/// Resolve the DB path from the config and open a ProjectDb (delegates to core helper).
pub fn open_project_db(
    layout: &unravel_core::db::ProjectLayout,
) -> Result<(unravel_core::db::ProjectConfig, std::path::PathBuf, unravel_core::db::ProjectDb)> {
    unravel_core::db::open_project_db(layout)
}

/// Open the project rooted at `root` (config, database and resolved paths).
pub fn open_project(root: &str) -> Result<unravel_core::db::ProjectContext> {
    let root_path = canonicalize_or_current(root)?;
    unravel_core::db::ProjectContext::from_root(root_path)
}

/// Helper to print whether a directory exists.
pub fn print_dir_status(label: &str, path: &Path) {
    let exists = path.is_dir();
    println!("- {label}: {} ({})", if exists { "OK" } else { "MISSING" }, path.display());
}

/// Current time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

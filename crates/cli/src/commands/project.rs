use std::fs;

use anyhow::{Context, Result};
use serde::Serialize;
use unravel_core::db::{PipelineConfig, ProjectConfig, ProjectDb, ProjectLayout};

use crate::commands::{open_project_db, print_dir_status};
use crate::{canonicalize_or_current, infer_project_name};

#[derive(Serialize)]
pub struct ProjectInfoSnapshot {
    pub name: String,
    pub root: String,
    pub config_file: String,
    pub config_version: String,
    pub db_path: String,
    pub log_path: String,
    pub pipeline: PipelineConfig,
    pub layout: ProjectInfoLayout,
    pub mappings: usize,
    pub suspects: Vec<String>,
    pub runs: usize,
}

#[derive(Serialize)]
pub struct ProjectInfoLayout {
    pub meta_dir: String,
    pub outputs_dir: String,
}

/// Initialize a new project at `root`.
pub fn init_project_command(root: &str, name: Option<String>) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    // Derive project name if not provided.
    let project_name = match name {
        Some(n) => n,
        None => infer_project_name(&root_path),
    };

    fs::create_dir_all(&layout.meta_dir)
        .with_context(|| format!("Failed to create meta dir: {}", layout.meta_dir.display()))?;
    fs::create_dir_all(&layout.outputs_dir).with_context(|| {
        format!("Failed to create outputs dir: {}", layout.outputs_dir.display())
    })?;

    let config = ProjectConfig::new(
        &project_name,
        layout.db_path_relative_string(),
        layout.log_path_relative_string(),
    );
    let json = serde_json::to_string_pretty(&config)?;
    fs::write(&layout.project_config_path, json).with_context(|| {
        format!("Failed to write project config: {}", layout.project_config_path.display())
    })?;

    // Create the project database immediately so follow-on commands can rely on it.
    ProjectDb::open(&layout.db_path).with_context(|| {
        format!("Failed to initialize project database at {}", layout.db_path.display())
    })?;

    println!("Initialized unravel project:");
    println!("  Name: {}", project_name);
    println!("  Root: {}", layout.root.display());
    println!("  Config: {}", layout.project_config_path.display());
    println!("  DB path (relative): {}", config.db.path);
    println!("  Log path (relative): {}", config.log.path);
    println!("  Outputs dir: {}", layout.outputs_dir.display());

    Ok(())
}

/// Show basic information about an existing project.
pub fn project_info_command(root: &str, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    let (config, _db_path, db) = open_project_db(&layout)?;
    let mappings = db.list_mappings().context("Failed to list name mappings")?;
    let suspects = db.list_suspects().context("Failed to list suspect methods")?;
    let runs = db.list_runs().unwrap_or_default();

    if json {
        let snapshot = ProjectInfoSnapshot {
            name: config.name.clone(),
            root: layout.root.display().to_string(),
            config_file: layout.project_config_path.display().to_string(),
            config_version: config.config_version.clone(),
            db_path: config.db.path.clone(),
            log_path: config.log.path.clone(),
            pipeline: config.pipeline.clone(),
            layout: ProjectInfoLayout {
                meta_dir: layout.meta_dir.display().to_string(),
                outputs_dir: layout.outputs_dir.display().to_string(),
            },
            mappings: mappings.len(),
            suspects,
            runs: runs.len(),
        };
        let serialized = serde_json::to_string_pretty(&snapshot)?;
        println!("{}", serialized);
        return Ok(());
    }

    println!("unravel Project Info");
    println!("====================");
    println!("Name: {}", config.name);
    println!("Root: {}", layout.root.display());
    println!("Config file: {}", layout.project_config_path.display());
    println!("Config version: {}", config.config_version);
    println!("DB path (config): {}", config.db.path);
    println!("Log path (config): {}", config.log.path);
    println!(
        "Pipeline: workers={} queue={} timeout={}s ml={}",
        config.pipeline.workers,
        config.pipeline.queue_capacity,
        config.pipeline.timeout_secs,
        if config.pipeline.enable_ml { "on" } else { "off" }
    );
    println!();

    println!("Directories:");
    print_dir_status("Meta dir (.unravel)", &layout.meta_dir);
    print_dir_status("Outputs dir", &layout.outputs_dir);
    println!();
    println!("Persisted mappings: {}", mappings.len());
    println!("Suspect methods: {}", suspects.len());
    println!("Runs: {}", runs.len());

    Ok(())
}

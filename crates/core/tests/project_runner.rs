mod common;

use std::fs;
use std::path::Path;

use common::*;
use tempfile::tempdir;
use unravel_core::db::{
    save_project_config, MappingOrigin, PipelineConfig, ProjectConfig, ProjectContext,
    ProjectLayout, RunStatus,
};
use unravel_core::runlog::read_tail;
use unravel_core::services::{ProjectRunner, RunOverrides};

fn init_project(root: &Path, pipeline: PipelineConfig) -> ProjectContext {
    let layout = ProjectLayout::new(root);
    fs::create_dir_all(&layout.meta_dir).expect("meta dir");
    let mut config = ProjectConfig::new(
        "Demo",
        layout.db_path_relative_string(),
        layout.log_path_relative_string(),
    );
    config.pipeline = pipeline;
    save_project_config(&layout, &config).expect("save config");
    ProjectContext::from_root(root).expect("project context")
}

#[test]
fn layout_paths_and_default_output() {
    let layout = ProjectLayout::new("/work/demo");
    assert_eq!(layout.db_path_relative_string(), ".unravel/project.db");
    assert_eq!(layout.log_path_relative_string(), ".unravel/deobf.log");
    assert_eq!(
        layout.default_output_for(Path::new("/in/client.jar")),
        Path::new("/work/demo/outputs/client-deobf.jar")
    );
    assert_eq!(
        layout.default_output_for(Path::new("/in/bundle")),
        Path::new("/work/demo/outputs/bundle-deobf.jar")
    );
    assert_eq!(layout.resolve("/abs/x.db"), Path::new("/abs/x.db"));
}

#[test]
fn config_without_pipeline_section_loads_with_defaults() {
    let dir = tempdir().expect("tempdir");
    let layout = ProjectLayout::new(dir.path());
    fs::create_dir_all(&layout.meta_dir).expect("meta dir");
    fs::write(
        &layout.project_config_path,
        r#"{
            "name": "Legacy",
            "description": null,
            "config_version": "0.1.0",
            "db": { "path": ".unravel/project.db" },
            "log": { "path": ".unravel/deobf.log" }
        }"#,
    )
    .expect("write config");

    let ctx = ProjectContext::from_root(dir.path()).expect("context");
    assert_eq!(ctx.config.name, "Legacy");
    assert_eq!(ctx.config.pipeline, PipelineConfig::default());
    assert!(ctx.db_path.exists());
}

#[test]
fn overrides_apply_on_top_of_the_project_config() {
    let base = PipelineConfig::default();
    let overrides = RunOverrides { workers: Some(9), timeout_secs: Some(5), disable_ml: true };
    let applied = overrides.apply(&base);
    assert_eq!(applied.workers, 9);
    assert_eq!(applied.timeout_secs, 5);
    assert!(!applied.enable_ml);
    assert_eq!(applied.queue_capacity, base.queue_capacity);
    assert_eq!(RunOverrides::default().apply(&base), base);
}

#[test]
fn run_persists_mappings_history_and_log() {
    let dir = tempdir().expect("tempdir");
    let ctx = init_project(dir.path(), PipelineConfig::default());
    let input = dir.path().join("client.jar");
    write_jar(
        &input,
        &[
            ("game/Combat.class", combat_class()),
            ("game/Junk.class", junk_class()),
            ("app/Keys.class", xor_keys_class(3, "abc", "def")),
        ],
    );
    ctx.db.upsert_mapping("vodka", "victim", MappingOrigin::Manual, "t0").expect("manual");

    let runner = ProjectRunner::new(&ctx);
    let report = runner.run(&input, None, &RunOverrides::default()).expect("run");

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.output, ctx.layout.outputs_dir.join("client-deobf.jar"));
    assert!(report.output.exists());
    assert_eq!(report.log_path.as_deref(), Some(ctx.log_path.as_path()));

    let runs = ctx.db.list_runs().expect("runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].transformed, 3);
    assert_eq!(runs[0].methods_removed, report.stats.methods_removed as u64);

    let mappings = ctx.db.list_mappings().expect("mappings");
    let get = |old: &str| mappings.iter().find(|m| m.old_name == old).cloned();
    assert_eq!(get("zov").map(|m| m.origin), Some(MappingOrigin::Dictionary));
    let vodka = get("vodka").expect("vodka row");
    assert_eq!((vodka.new_name.as_str(), vodka.origin), ("victim", MappingOrigin::Manual));
    assert_eq!(get("x").map(|m| m.origin), Some(MappingOrigin::Predicted));

    let log = read_tail(&ctx.log_path, None).expect("read log");
    assert!(log.iter().any(|l| l.contains("Deobfuscation started")));
    assert!(log.last().is_some_and(|l| l.contains("Deobfuscation finished")));
}

#[test]
fn unusable_model_falls_back_to_default_naming() {
    let dir = tempdir().expect("tempdir");
    let pipeline = PipelineConfig {
        enable_ml: true,
        model_path: Some("models/missing.json".to_string()),
        ..PipelineConfig::default()
    };
    let ctx = init_project(dir.path(), pipeline);
    let input = dir.path().join("client.jar");
    write_jar(&input, &[("app/Keys.class", xor_keys_class(3, "abc", "def"))]);

    let report = ProjectRunner::new(&ctx)
        .run(&input, Some(&dir.path().join("out.jar")), &RunOverrides::default())
        .expect("run despite missing model");

    assert_eq!(report.status, RunStatus::Completed);
    let log = read_tail(&ctx.log_path, None).expect("read log");
    assert!(log.iter().any(|l| l.contains("continuing with dictionary and default naming")));
    assert!(log.iter().any(|l| l.contains("predictor noop")));
    let mappings = ctx.db.list_mappings().expect("mappings");
    let x = mappings.iter().find(|m| m.old_name == "x").expect("x row");
    assert_eq!(x.new_name, "methodX");
}

#[test]
fn failed_run_is_recorded() {
    let dir = tempdir().expect("tempdir");
    let ctx = init_project(dir.path(), PipelineConfig::default());

    let err = ProjectRunner::new(&ctx)
        .run(&dir.path().join("missing.jar"), None, &RunOverrides::default())
        .expect_err("missing input");
    assert!(format!("{err:#}").contains("missing.jar"));

    let runs = ctx.db.list_runs().expect("runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    let log = read_tail(&ctx.log_path, Some(1)).expect("tail");
    assert!(log[0].contains("Deobfuscation failed"));
}

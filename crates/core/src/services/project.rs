//! Project-level glue: load persisted state, run, persist results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::db::{PipelineConfig, ProjectContext, RunRecord, RunStatus};
use crate::naming::{init_predictor, MappingStore, NamePredictor, NoopPredictor, SuspectSet};
use crate::runlog::RunLog;
use crate::services::deobfuscate::{DeobfuscateOptions, Deobfuscator, RunReport};

/// Per-run overrides of the project's pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub disable_ml: bool,
}

impl RunOverrides {
    pub fn apply(&self, config: &PipelineConfig) -> PipelineConfig {
        let mut config = config.clone();
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(timeout) = self.timeout_secs {
            config.timeout_secs = timeout;
        }
        if self.disable_ml {
            config.enable_ml = false;
        }
        config
    }
}

/// Coordinator tying a project context to a deobfuscation run.
pub struct ProjectRunner<'a> {
    pub ctx: &'a ProjectContext,
}

impl<'a> ProjectRunner<'a> {
    pub fn new(ctx: &'a ProjectContext) -> Self {
        Self { ctx }
    }

    /// Dictionary defaults overlaid with every persisted mapping.
    pub fn load_store(&self) -> Result<MappingStore> {
        let store = MappingStore::with_defaults();
        store.load_from_db(&self.ctx.db).context("Failed to load name mappings")?;
        Ok(store)
    }

    pub fn load_suspects(&self) -> Result<SuspectSet> {
        let mut suspects = SuspectSet::with_defaults();
        suspects.load_from_db(&self.ctx.db).context("Failed to load suspect methods")?;
        Ok(suspects)
    }

    /// Deobfuscate `input`. The output defaults to `outputs/<stem>-deobf.<ext>`.
    ///
    /// Mappings chosen during the run are saved back (never over a manual entry) and the run
    /// is recorded in `deobf_runs`, including failed runs.
    pub fn run(
        &self,
        input: &Path,
        output: Option<&Path>,
        overrides: &RunOverrides,
    ) -> Result<RunReport> {
        let layout = &self.ctx.layout;
        let pipeline = overrides.apply(&self.ctx.config.pipeline);
        let output: PathBuf =
            output.map(Path::to_path_buf).unwrap_or_else(|| layout.default_output_for(input));

        let log = Arc::new(
            RunLog::open(&self.ctx.log_path)
                .with_context(|| format!("Failed to open log {}", self.ctx.log_path.display()))?,
        );
        let store = Arc::new(self.load_store()?);
        let suspects = self.load_suspects()?;

        let model_path = pipeline.model_path.as_deref().map(|p| layout.resolve(p));
        let predictor: Arc<dyn NamePredictor> =
            match init_predictor(&pipeline, model_path.as_deref()) {
                Ok(p) => Arc::from(p),
                Err(e) => {
                    log.warn(format!("{e}; continuing with dictionary and default naming"));
                    Arc::new(NoopPredictor)
                }
            };

        let started_at = Utc::now().to_rfc3339();
        let deobfuscator = Deobfuscator::new(
            Arc::clone(&store),
            suspects,
            predictor,
            Arc::clone(&log),
            DeobfuscateOptions::from(&pipeline),
        );
        let outcome = deobfuscator.run(input, &output);

        let finished_at = Utc::now().to_rfc3339();
        store
            .save_to_db(&self.ctx.db, &finished_at)
            .context("Failed to save name mappings")?;
        let record = match &outcome {
            Ok(report) => RunRecord {
                input: input.display().to_string(),
                output: report.output.display().to_string(),
                status: report.status,
                transformed: report.transformed as u64,
                skipped: report.skipped as u64,
                literals_recovered: report.stats.literals_recovered as u64,
                methods_removed: report.stats.methods_removed as u64,
                started_at: report.started_at.clone(),
                finished_at: report.finished_at.clone(),
            },
            Err(_) => RunRecord {
                input: input.display().to_string(),
                output: output.display().to_string(),
                status: RunStatus::Failed,
                transformed: 0,
                skipped: 0,
                literals_recovered: 0,
                methods_removed: 0,
                started_at,
                finished_at,
            },
        };
        self.ctx.db.insert_run(&record).context("Failed to record run")?;

        outcome.with_context(|| format!("Deobfuscation of {} failed", input.display()))
    }
}

//! Run coordinator: survey, settle names, transform, assemble.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::archive::{ArchiveAssembler, ArchiveWalker, EntryKind};
use crate::db::{MappingOrigin, PipelineConfig, RunStatus};
use crate::error::{RunError, TransformError};
use crate::naming::{
    MappingStore, NamePredictor, NamingPolicy, RenamePlan, SuspectSet, UnitSurvey,
};
use crate::runlog::RunLog;
use crate::services::pipeline::{
    survey_unit, transform_unit, UnitContext, UnitOutput, UnitStats,
};
use crate::services::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq)]
pub struct DeobfuscateOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub timeout: Duration,
    pub min_confidence: f64,
    pub obfuscated_name_max_len: usize,
}

impl Default for DeobfuscateOptions {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for DeobfuscateOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            timeout: Duration::from_secs(config.timeout_secs),
            min_confidence: config.min_confidence,
            obfuscated_name_max_len: config.obfuscated_name_max_len,
        }
    }
}

/// What a run did, as shown to the user and persisted in `deobf_runs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub log_path: Option<PathBuf>,
    pub status: RunStatus,
    pub entries: usize,
    pub units: usize,
    pub transformed: usize,
    pub skipped: usize,
    pub predicted_mappings: usize,
    pub collisions: usize,
    pub timed_out: bool,
    pub stats: UnitStats,
    pub started_at: String,
    pub finished_at: String,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{} transformed, {} skipped, {} literal(s) recovered, {} method(s) removed -> {}",
            self.transformed,
            self.skipped,
            self.stats.literals_recovered,
            self.stats.methods_removed,
            self.output.display()
        )
    }
}

/// Runs the whole pipeline over one archive.
pub struct Deobfuscator {
    store: Arc<MappingStore>,
    suspects: SuspectSet,
    predictor: Arc<dyn NamePredictor>,
    log: Arc<RunLog>,
    options: DeobfuscateOptions,
}

impl std::fmt::Debug for Deobfuscator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deobfuscator")
            .field("mappings", &self.store.len())
            .field("suspects", &self.suspects.len())
            .field("predictor", &self.predictor.name())
            .field("options", &self.options)
            .finish()
    }
}

/// Bytecode units of the container, first occurrence of each name only.
fn unit_entries<'a>(
    walker: ArchiveWalker,
    log: &'a RunLog,
    report_problems: bool,
    order: &'a mut Vec<String>,
) -> impl Iterator<Item = (String, Vec<u8>)> + 'a {
    let mut seen = HashSet::new();
    walker.filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if report_problems {
                    log.warn(format!("{}: could not read entry: {}", e.name, e.message));
                }
                return None;
            }
        };
        if entry.kind != EntryKind::BytecodeUnit {
            return None;
        }
        if !seen.insert(entry.name.clone()) {
            if report_problems {
                log.warn(format!("{}: duplicate entry, keeping the first one", entry.name));
            }
            return None;
        }
        order.push(entry.name.clone());
        Some((entry.name, entry.bytes))
    })
}

impl Deobfuscator {
    pub fn new(
        store: Arc<MappingStore>,
        suspects: SuspectSet,
        predictor: Arc<dyn NamePredictor>,
        log: Arc<RunLog>,
        options: DeobfuscateOptions,
    ) -> Self {
        Self { store, suspects, predictor, log, options }
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Deobfuscate `input` into `output`.
    ///
    /// Only container-level failures are returned as errors; every unit-level problem is
    /// logged and the unit is copied through unchanged.
    pub fn run(&self, input: &Path, output: &Path) -> Result<RunReport, RunError> {
        match self.run_inner(input, output) {
            Ok(report) => {
                self.log.finish(format!("=== Deobfuscation finished: {} ===", report.summary()));
                Ok(report)
            }
            Err(err) => {
                self.log.fail(format!("=== Deobfuscation failed: {err} ==="));
                Err(err)
            }
        }
    }

    fn run_inner(&self, input: &Path, output: &Path) -> Result<RunReport, RunError> {
        let started_at = Utc::now().to_rfc3339();
        let deadline = Instant::now() + self.options.timeout;
        let walker = ArchiveWalker::open(input)?;
        let entries = walker.len();
        let mut assembler = ArchiveAssembler::create(input, output)?;
        let session = self.log.begin(format!(
            "=== Deobfuscation started: {} -> {} ({} entries, predictor {}) ===",
            input.display(),
            output.display(),
            entries,
            self.predictor.name()
        ));

        let scheduler = Scheduler::new(self.options.workers, self.options.queue_capacity)?;

        // Survey pass.
        let mut order = Vec::new();
        let surveyed = {
            let store = Arc::clone(&self.store);
            let predictor = Arc::clone(&self.predictor);
            let (min_confidence, max_len) =
                (self.options.min_confidence, self.options.obfuscated_name_max_len);
            let items = unit_entries(walker, &self.log, true, &mut order);
            scheduler.run(items, deadline, move |_, bytes: Vec<u8>| {
                let policy = NamingPolicy {
                    predictor: &*predictor,
                    min_confidence,
                    obfuscated_name_max_len: max_len,
                };
                survey_unit(&bytes, &store, &policy)
            })
        };
        let (plan, predicted, collisions) = self.settle_names(&order, &surveyed.results);

        // Units the survey could not finish are passed through, so the plan covers every
        // unit that gets renamed.
        let excluded: BTreeMap<String, TransformError> = surveyed
            .results
            .into_iter()
            .filter_map(|(name, r)| match r {
                Err(e @ (TransformError::Timeout | TransformError::Panicked(_))) => Some((name, e)),
                _ => None,
            })
            .collect();

        // Transform pass.
        let ctx = Arc::new(UnitContext {
            store: Arc::clone(&self.store),
            plan,
            suspects: self.suspects.clone(),
            log: session,
        });
        let mut second_order = Vec::new();
        let transformed = {
            let walker = ArchiveWalker::open(input)?;
            let items = unit_entries(walker, &self.log, false, &mut second_order)
                .filter(|(name, _)| !excluded.contains_key(name));
            let ctx = Arc::clone(&ctx);
            scheduler.run(items, deadline, move |name, bytes: Vec<u8>| {
                transform_unit(name, &bytes, &ctx)
            })
        };
        let mut results: BTreeMap<String, Result<UnitOutput, TransformError>> =
            transformed.results;
        results.extend(excluded.into_iter().map(|(name, e)| (name, Err(e))));
        let timed_out = surveyed.timed_out || transformed.timed_out;
        if timed_out {
            self.log.warn(format!(
                "run deadline of {}s elapsed; unfinished units are passed through",
                self.options.timeout.as_secs()
            ));
        }

        // Assembly, in source order.
        let mut stats = UnitStats::default();
        let (mut transformed_count, mut skipped) = (0, 0);
        for index in 0..assembler.source_len() {
            let name = assembler.source_name(index)?;
            let first = !assembler.contains(&name);
            if first && EntryKind::classify(&name) == EntryKind::BytecodeUnit {
                match results.get(&name) {
                    Some(Ok(out)) => {
                        assembler.write_unit(index, &out.bytes)?;
                        stats.merge(&out.stats);
                        transformed_count += 1;
                        continue;
                    }
                    Some(Err(e)) => {
                        self.log.warn(format!("{name}: passed through untransformed: {e}"))
                    }
                    None => self.log.warn(format!("{name}: passed through untransformed")),
                }
                skipped += 1;
            }
            if !assembler.copy_raw(index)? {
                self.log.warn(format!("{name}: duplicate entry skipped"));
            }
        }
        let output = assembler.finish()?;

        Ok(RunReport {
            input: input.to_path_buf(),
            output,
            log_path: self.log.path().map(Path::to_path_buf),
            status: if skipped == 0 { RunStatus::Completed } else { RunStatus::Degraded },
            entries,
            units: order.len(),
            transformed: transformed_count,
            skipped,
            predicted_mappings: predicted,
            collisions,
            timed_out,
            stats,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
        })
    }

    /// Commit survey proposals in archive order (first writer wins) and build the plan.
    fn settle_names(
        &self,
        order: &[String],
        results: &BTreeMap<String, Result<UnitSurvey, TransformError>>,
    ) -> (RenamePlan, usize, usize) {
        let surveys: Vec<UnitSurvey> = order
            .iter()
            .filter_map(|name| results.get(name).and_then(|r| r.as_ref().ok()).cloned())
            .collect();

        let mut predicted = 0;
        let mut seen = BTreeSet::new();
        for survey in &surveys {
            for p in &survey.proposals {
                if !seen.insert(p.old_name.clone()) {
                    continue;
                }
                let entry =
                    self.store.insert_if_absent(&p.old_name, &p.new_name, MappingOrigin::Predicted);
                if entry.origin == MappingOrigin::Predicted && entry.new_name == p.new_name {
                    predicted += 1;
                    let why = match p.category {
                        Some(c) => format!("{} {:.2}", c.as_str(), p.confidence),
                        None => "default".to_string(),
                    };
                    self.log.info(format!(
                        "predicted mapping {} -> {} ({why})",
                        p.old_name, p.new_name
                    ));
                }
            }
        }

        let (plan, collisions) = RenamePlan::build(&surveys, &self.store);
        for c in &collisions {
            self.log.warn(format!(
                "{}: keeping {} {}: {} would collide",
                c.class_name, c.old_name, c.descriptor, c.new_name
            ));
        }
        (plan, predicted, collisions.len())
    }
}

//! The per-unit pipeline: parse, rename, recover literals, simplify, prune, serialize.
//!
//! Everything here runs on a worker and touches only the unit it was handed plus the shared,
//! internally synchronised [`MappingStore`] and the run's [`RunSession`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::bytecode::{self, SymbolKind};
use crate::error::TransformError;
use crate::naming::{
    rename_unit, survey, MappingStore, NamingPolicy, RenamePlan, SuspectSet, UnitSurvey,
};
use crate::runlog::RunSession;
use crate::services::flow::{self, FlowStats};
use crate::services::guard::{native_methods, MANUAL_REVIEW};
use crate::services::junk::eliminate_junk;
use crate::services::literals::recover_literals;

/// Shared, read-mostly state handed to every transform task.
#[derive(Debug)]
pub struct UnitContext {
    pub store: Arc<MappingStore>,
    pub plan: RenamePlan,
    pub suspects: SuspectSet,
    pub log: RunSession,
}

/// Per-unit counters, summed into the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitStats {
    pub symbols_renamed: usize,
    pub references_rewritten: usize,
    pub literals_recovered: usize,
    pub literal_failures: usize,
    pub jumps_threaded: usize,
    pub branches_collapsed: usize,
    pub methods_removed: usize,
    pub native_methods: usize,
}

impl UnitStats {
    pub fn merge(&mut self, other: &UnitStats) {
        self.symbols_renamed += other.symbols_renamed;
        self.references_rewritten += other.references_rewritten;
        self.literals_recovered += other.literals_recovered;
        self.literal_failures += other.literal_failures;
        self.jumps_threaded += other.jumps_threaded;
        self.branches_collapsed += other.branches_collapsed;
        self.methods_removed += other.methods_removed;
        self.native_methods += other.native_methods;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutput {
    pub bytes: Vec<u8>,
    pub stats: UnitStats,
}

/// Survey pass for one entry.
pub fn survey_unit(
    bytes: &[u8],
    store: &MappingStore,
    policy: &NamingPolicy<'_>,
) -> Result<UnitSurvey, TransformError> {
    let unit = bytecode::parse(bytes)?;
    Ok(survey(&unit, store, policy))
}

/// Transform pass for one entry. On error the caller keeps the original bytes.
pub fn transform_unit(
    entry: &str,
    bytes: &[u8],
    ctx: &UnitContext,
) -> Result<UnitOutput, TransformError> {
    let log = &ctx.log;
    let mut unit = bytecode::parse(bytes)?;
    let mut stats = UnitStats::default();

    let natives = native_methods(&unit);
    for label in &natives {
        log.warn(format!("{entry}: native method {label}: {MANUAL_REVIEW}"));
    }
    stats.native_methods = natives.len();

    let outcome = rename_unit(&mut unit, &ctx.store, &ctx.plan)?;
    for r in &outcome.renamed {
        log.debug(format!("{entry}: renamed {} {} -> {}", r.descriptor, r.old_name, r.new_name));
    }
    stats.symbols_renamed = outcome.renamed.len();
    stats.references_rewritten = outcome.references;
    let original_names: HashMap<String, String> = outcome
        .renamed
        .iter()
        .filter(|r| r.kind == SymbolKind::Method)
        .map(|r| (r.new_name.clone(), r.old_name.clone()))
        .collect();

    let literals = recover_literals(&mut unit);
    for lit in &literals.recovered {
        log.debug(format!(
            "{entry}: recovered {:?} in {}@{}",
            lit.plaintext, lit.method, lit.offset
        ));
    }
    for failure in &literals.failures {
        log.warn(format!("{entry}: literal not recovered: {failure}"));
    }
    stats.literals_recovered = literals.recovered.len();
    stats.literal_failures = literals.failures.len();

    let mut flow_stats = FlowStats::default();
    for method in unit.methods.iter_mut().filter(|m| !m.is_native()) {
        if let Some(code) = method.code_mut() {
            flow_stats.merge(flow::simplify(code)?);
        }
    }
    if !flow_stats.is_empty() {
        log.debug(format!(
            "{entry}: threaded {} jump(s), collapsed {} branch(es)",
            flow_stats.jumps_threaded, flow_stats.branches_collapsed
        ));
    }
    stats.jumps_threaded = flow_stats.jumps_threaded;
    stats.branches_collapsed = flow_stats.branches_collapsed;

    let junk = eliminate_junk(&mut unit, &ctx.suspects, &original_names, &literals.spent);
    for warning in &junk.warnings {
        log.warn(format!("{entry}: {warning}"));
    }
    for helper in &junk.pruned_helpers {
        log.info(format!("{entry}: decrypt helper {helper} inlined at every call site"));
    }
    for removed in &junk.removed {
        let was =
            removed.original_name.as_deref().map(|n| format!(", was {n}")).unwrap_or_default();
        log.info(format!(
            "{entry}: removed junk method {} ({}{was})",
            removed.label,
            removed.reason.as_str()
        ));
    }
    stats.methods_removed = junk.removed.len();

    Ok(UnitOutput { bytes: unit.to_bytes(), stats })
}

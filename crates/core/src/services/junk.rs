//! Removal of suspect and unreachable methods.

use std::collections::{BTreeSet, HashMap};

use crate::bytecode::opcodes::*;
use crate::bytecode::{ClassUnit, Constant, SymbolKind};
use crate::naming::{is_special, SuspectSet};
use crate::services::literals::SpentHelper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Suspect,
    Unreferenced,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Suspect => "suspect",
            RemovalReason::Unreferenced => "never called",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedMethod {
    pub label: String,
    /// Name before renaming, when it differs.
    pub original_name: Option<String>,
    pub reason: RemovalReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JunkReport {
    pub removed: Vec<RemovedMethod>,
    /// Spent decrypt helpers removed along with the rest.
    pub pruned_helpers: Vec<String>,
    pub warnings: Vec<String>,
}

/// Private members the JVM calls reflectively during serialization.
const JVM_HOOKS: &[(&str, &str)] = &[
    ("writeObject", "(Ljava/io/ObjectOutputStream;)V"),
    ("readObject", "(Ljava/io/ObjectInputStream;)V"),
    ("readObjectNoData", "()V"),
    ("writeReplace", "()Ljava/lang/Object;"),
    ("readResolve", "()Ljava/lang/Object;"),
];

pub fn is_jvm_hook(name: &str, descriptor: &str) -> bool {
    JVM_HOOKS.iter().any(|(n, d)| *n == name && *d == descriptor)
}

/// `caller -> callees` among the unit's own methods, plus the methods pinned by handles.
fn own_calls(unit: &ClassUnit) -> (Vec<BTreeSet<usize>>, BTreeSet<usize>) {
    let own = unit.class_name();
    let resolve = |idx: u16| {
        let r = unit.pool.member_ref(idx)?;
        if r.owner != own {
            return None;
        }
        unit.find_method(&r.name, &r.descriptor)
    };

    let mut calls = vec![BTreeSet::new(); unit.methods.len()];
    for (i, method) in unit.methods.iter().enumerate() {
        let Some(code) = method.code() else { continue };
        let Ok(insns) = code.instructions() else { continue };
        for insn in insns.iter().filter(|insn| is_invoke(insn.opcode)) {
            if let Some(callee) = insn.pool_index().and_then(resolve) {
                calls[i].insert(callee);
            }
        }
    }

    // Method handles (lambdas, bootstrap arguments) pin their target unconditionally.
    let mut pinned = BTreeSet::new();
    for constant in unit.pool.entries() {
        if let Constant::MethodHandle { reference, .. } = constant {
            if let Some(target) = resolve(*reference) {
                pinned.insert(target);
            }
        }
    }
    (calls, pinned)
}

/// Remove suspect methods and, unless the class has nestmates, private methods nothing in the
/// unit calls. Serialization hooks and other JVM-invoked members are kept.
///
/// `original_names` maps current method names back to their names before renaming.
pub fn eliminate_junk(
    unit: &mut ClassUnit,
    suspects: &SuspectSet,
    original_names: &HashMap<String, String>,
    spent: &[SpentHelper],
) -> JunkReport {
    let mut report = JunkReport::default();
    let (calls, pinned) = own_calls(unit);
    let prune_private = !unit.has_attribute("NestHost") && !unit.has_attribute("NestMembers");

    let names: Vec<(String, String)> = unit
        .methods
        .iter()
        .map(|m| (unit.member_name(m), unit.member_descriptor(m)))
        .collect();
    let removable = |i: usize| {
        let m = &unit.methods[i];
        let (name, desc) = &names[i];
        !m.is_native() && !is_special(SymbolKind::Method, name, desc) && !is_jvm_hook(name, desc)
    };

    let mut removed: Vec<(usize, RemovalReason)> = Vec::new();
    for (i, (name, _)) in names.iter().enumerate() {
        let original = original_names.get(name);
        let suspect =
            suspects.contains(name) || original.is_some_and(|old| suspects.contains(old));
        if suspect && removable(i) {
            removed.push((i, RemovalReason::Suspect));
        }
    }

    if prune_private {
        loop {
            let gone: BTreeSet<usize> = removed.iter().map(|(i, _)| *i).collect();
            let mut called = pinned.clone();
            for (caller, callees) in calls.iter().enumerate() {
                if !gone.contains(&caller) {
                    called.extend(callees.iter().filter(|&&c| c != caller));
                }
            }
            let next: Vec<usize> = (0..unit.methods.len())
                .filter(|i| {
                    !gone.contains(i)
                        && !called.contains(i)
                        && unit.methods[*i].is_private()
                        && removable(*i)
                })
                .collect();
            if next.is_empty() {
                break;
            }
            removed.extend(next.into_iter().map(|i| (i, RemovalReason::Unreferenced)));
        }
    }

    let gone: BTreeSet<usize> = removed.iter().map(|(i, _)| *i).collect();
    for (i, reason) in &removed {
        if *reason != RemovalReason::Suspect {
            continue;
        }
        let still_called = calls
            .iter()
            .enumerate()
            .any(|(caller, callees)| !gone.contains(&caller) && callees.contains(i));
        if still_called || pinned.contains(i) {
            report.warnings.push(format!(
                "{} is still referenced; removing it anyway",
                unit.method_label(&unit.methods[*i])
            ));
        }
    }

    for helper in spent {
        let Some(index) = unit.find_method(&helper.name, &helper.descriptor) else { continue };
        if !gone.contains(&index) {
            continue;
        }
        report.pruned_helpers.push(unit.method_label(&unit.methods[index]));
    }

    removed.sort_by(|a, b| b.0.cmp(&a.0));
    for (i, reason) in removed {
        let label = unit.method_label(&unit.methods[i]);
        let original_name = original_names.get(&names[i].0).cloned();
        unit.methods.remove(i);
        report.removed.push(RemovedMethod { label, original_name, reason });
    }
    report.removed.reverse();
    report
}

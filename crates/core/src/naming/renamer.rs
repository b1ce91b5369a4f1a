//! Renaming engine.
//!
//! Renaming is split into two passes so that results do not depend on worker timing:
//!
//! 1. [`survey`] runs per unit (in parallel) and proposes names for obfuscated members that
//!    have no mapping yet. The coordinator commits proposals to the [`MappingStore`] in
//!    archive order and builds a [`RenamePlan`], which blocks renames that would collide.
//! 2. [`rename_unit`] runs per unit against the settled store and rewrites declarations and
//!    every member reference owned by a class of the archive.
//!
//! A symbol is renamed by repointing indices to freshly interned constants, never by editing
//! a shared `Utf8` entry, so unrelated uses of the same text are untouched.

use std::collections::{BTreeMap, BTreeSet};

use crate::bytecode::descriptor::{field_kind, method_shape};
use crate::bytecode::{ClassUnit, Constant, MemberInfo, RefKind, SymbolKind};
use crate::error::{ParseError, TransformError};
use crate::naming::predictor::{Category, Features, NamePredictor};
use crate::naming::store::MappingStore;
use crate::naming::{is_obfuscated, is_special, is_valid_member_name, synthesize_name};

/// How names are proposed for members without a mapping.
#[derive(Clone, Copy)]
pub struct NamingPolicy<'a> {
    pub predictor: &'a dyn NamePredictor,
    pub min_confidence: f64,
    pub obfuscated_name_max_len: usize,
}

impl std::fmt::Debug for NamingPolicy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamingPolicy")
            .field("predictor", &self.predictor.name())
            .field("min_confidence", &self.min_confidence)
            .field("obfuscated_name_max_len", &self.obfuscated_name_max_len)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredMember {
    pub kind: SymbolKind,
    pub name: String,
    pub descriptor: String,
}

/// A candidate mapping produced by the survey pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub kind: SymbolKind,
    pub old_name: String,
    pub new_name: String,
    pub category: Option<Category>,
    pub confidence: f64,
}

/// What the survey pass learned about one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSurvey {
    pub class_name: String,
    pub members: Vec<DeclaredMember>,
    pub proposals: Vec<Proposal>,
}

/// A rename that was refused because the new name would clash inside a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub class_name: String,
    pub kind: SymbolKind,
    pub old_name: String,
    pub new_name: String,
    pub descriptor: String,
}

/// Settled renaming decisions shared by every unit of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenamePlan {
    /// Internal names of every class in the archive.
    pub archive_classes: BTreeSet<String>,
    /// `(kind, old name, descriptor)` triples that must keep their name everywhere.
    pub blocked: BTreeSet<(SymbolKind, String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub kind: SymbolKind,
    pub old_name: String,
    pub new_name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameOutcome {
    /// Renamed declarations, in declaration order.
    pub renamed: Vec<Rename>,
    /// Member references (pool entries and `EnclosingMethod`) repointed to a new name.
    pub references: usize,
}

fn ref_kind_symbol(kind: RefKind) -> SymbolKind {
    match kind {
        RefKind::Field => SymbolKind::Field,
        RefKind::Method | RefKind::InterfaceMethod => SymbolKind::Method,
    }
}

/// Count how often each `(kind, name, descriptor)` of the unit's own class is referenced
/// from its code, and how many invocations each method body makes.
fn reference_counts(
    unit: &ClassUnit,
) -> (BTreeMap<(SymbolKind, String, String), usize>, Vec<usize>) {
    let own = unit.class_name();
    let mut inbound = BTreeMap::new();
    let mut outbound = Vec::with_capacity(unit.methods.len());
    for method in &unit.methods {
        let mut calls = 0;
        if let Some(Ok(insns)) = method.code().map(|c| c.instructions()) {
            for insn in &insns {
                if crate::bytecode::opcodes::is_invoke(insn.opcode) {
                    calls += 1;
                }
                let Some(idx) = insn.pool_index() else { continue };
                let Some(r) = unit.pool.member_ref(idx) else { continue };
                if r.owner == own {
                    *inbound.entry((ref_kind_symbol(r.kind), r.name, r.descriptor)).or_insert(0) +=
                        1;
                }
            }
        }
        outbound.push(calls);
    }
    (inbound, outbound)
}

fn candidate(
    policy: &NamingPolicy<'_>,
    kind: SymbolKind,
    old: &str,
    features: Option<Features>,
) -> (String, Option<Category>, f64) {
    let prediction = features
        .and_then(|f| policy.predictor.predict(&f))
        .filter(|p| p.confidence >= policy.min_confidence);
    let (prefix, category, confidence) = match (kind, prediction) {
        (SymbolKind::Field, Some(p)) => (p.category.field_prefix(), Some(p.category), p.confidence),
        (_, Some(p)) => (p.category.method_prefix(), Some(p.category), p.confidence),
        (SymbolKind::Field, None) => ("field", None, 0.0),
        (_, None) => ("method", None, 0.0),
    };
    (synthesize_name(prefix, old), category, confidence)
}

/// Survey pass: list declared members and propose names for obfuscated ones.
///
/// Reads the store but never writes it.
pub fn survey(unit: &ClassUnit, store: &MappingStore, policy: &NamingPolicy<'_>) -> UnitSurvey {
    let class_name = unit.class_name();
    let (inbound, outbound) = reference_counts(unit);
    let mut members = Vec::new();
    let mut proposals: Vec<Proposal> = Vec::new();

    let declared = unit
        .fields
        .iter()
        .map(|m| (SymbolKind::Field, m, None))
        .chain(unit.methods.iter().enumerate().map(|(i, m)| (SymbolKind::Method, m, Some(i))));

    for (kind, member, method_index) in declared {
        let name = unit.member_name(member);
        let descriptor = unit.member_descriptor(member);
        members.push(DeclaredMember { kind, name: name.clone(), descriptor: descriptor.clone() });

        if !wants_prediction(kind, member, &name, &descriptor, store, policy)
            || proposals.iter().any(|p| p.old_name == name)
        {
            continue;
        }
        let refs = inbound.get(&(kind, name.clone(), descriptor.clone())).copied().unwrap_or(0);
        let features = match kind {
            SymbolKind::Field => {
                field_kind(&descriptor).map(|k| Features::from_counts(0, k, 0, refs))
            }
            _ => method_shape(&descriptor).map(|(arity, ret)| {
                let calls = method_index.and_then(|i| outbound.get(i)).copied().unwrap_or(0);
                Features::from_counts(arity, ret, calls, refs)
            }),
        };
        let (new_name, category, confidence) = candidate(policy, kind, &name, features);
        proposals.push(Proposal { kind, old_name: name, new_name, category, confidence });
    }

    UnitSurvey { class_name, members, proposals }
}

fn wants_prediction(
    kind: SymbolKind,
    member: &MemberInfo,
    name: &str,
    descriptor: &str,
    store: &MappingStore,
    policy: &NamingPolicy<'_>,
) -> bool {
    !is_special(kind, name, descriptor)
        && !member.is_synthetic()
        && is_obfuscated(name, policy.obfuscated_name_max_len)
        && store.resolve(name).is_none()
        && !store.is_target(name)
}

impl RenamePlan {
    /// Settle which renames are safe, given every unit's declared members and the store as
    /// it stands after proposals were committed.
    pub fn build(surveys: &[UnitSurvey], store: &MappingStore) -> (Self, Vec<Collision>) {
        let mut plan = Self {
            archive_classes: surveys.iter().map(|s| s.class_name.clone()).collect(),
            blocked: BTreeSet::new(),
        };
        let mut collisions = Vec::new();

        // Targets that cannot name a member at all.
        for s in surveys {
            for m in &s.members {
                if is_special(m.kind, &m.name, &m.descriptor) {
                    continue;
                }
                if let Some(new) = store.resolve(&m.name) {
                    if !is_valid_member_name(&new) {
                        let key = (m.kind, m.name.clone(), m.descriptor.clone());
                        if plan.blocked.insert(key) {
                            collisions.push(Collision {
                                class_name: s.class_name.clone(),
                                kind: m.kind,
                                old_name: m.name.clone(),
                                new_name: new,
                                descriptor: m.descriptor.clone(),
                            });
                        }
                    }
                }
            }
        }

        // Reverting a rename can only remove names, so this terminates.
        loop {
            let mut changed = false;
            for s in surveys {
                let mut finals: BTreeMap<(SymbolKind, String, String), Vec<&DeclaredMember>> =
                    BTreeMap::new();
                for m in &s.members {
                    let final_name = plan.target(store, m.kind, &m.name, &m.descriptor);
                    let final_name = final_name.unwrap_or_else(|| m.name.clone());
                    finals.entry((m.kind, final_name, m.descriptor.clone())).or_default().push(m);
                }
                for ((_, final_name, _), group) in finals {
                    if group.len() < 2 {
                        continue;
                    }
                    for m in group {
                        if m.name == final_name {
                            continue;
                        }
                        let key = (m.kind, m.name.clone(), m.descriptor.clone());
                        if plan.blocked.insert(key) {
                            changed = true;
                            collisions.push(Collision {
                                class_name: s.class_name.clone(),
                                kind: m.kind,
                                old_name: m.name.clone(),
                                new_name: final_name.clone(),
                                descriptor: m.descriptor.clone(),
                            });
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }

        (plan, collisions)
    }

    /// New name for a member, or `None` if it keeps its name.
    pub fn target(
        &self,
        store: &MappingStore,
        kind: SymbolKind,
        name: &str,
        descriptor: &str,
    ) -> Option<String> {
        if is_special(kind, name, descriptor)
            || self.blocked.contains(&(kind, name.to_string(), descriptor.to_string()))
        {
            return None;
        }
        store.resolve(name).filter(|new| new != name)
    }
}

/// Rewrite every declaration and in-archive member reference of `unit` according to the
/// settled store and plan.
///
/// Fails only on constant pool overflow; the caller then keeps the original bytes, so a
/// unit is renamed completely or not at all.
pub fn rename_unit(
    unit: &mut ClassUnit,
    store: &MappingStore,
    plan: &RenamePlan,
) -> Result<RenameOutcome, TransformError> {
    let own = unit.class_name();
    let mut outcome = RenameOutcome::default();

    // Declarations.
    let mut decls = Vec::new();
    for (kind, members) in [(SymbolKind::Field, &unit.fields), (SymbolKind::Method, &unit.methods)]
    {
        for (i, m) in members.iter().enumerate() {
            let name = unit.member_name(m);
            let descriptor = unit.member_descriptor(m);
            if let Some(new_name) = plan.target(store, kind, &name, &descriptor) {
                decls.push((kind, i, Rename { kind, old_name: name, new_name, descriptor }));
            }
        }
    }
    for (kind, i, rename) in decls {
        let idx = unit.pool.intern_utf8(&rename.new_name).ok_or(TransformError::PoolOverflow)?;
        match kind {
            SymbolKind::Field => unit.fields[i].name_index = idx,
            _ => unit.methods[i].name_index = idx,
        }
        outcome.renamed.push(rename);
    }

    // Member references owned by classes of the archive.
    let mut refs = Vec::new();
    for (index, constant) in unit.pool.entries().iter().enumerate() {
        let Constant::MemberRef { kind, class, name_and_type } = *constant else { continue };
        let Some(owner) = unit.pool.class_name(class) else { continue };
        if owner != own && !plan.archive_classes.contains(&owner) {
            continue;
        }
        let Some((name, descriptor)) = unit.pool.name_and_type(name_and_type) else { continue };
        if let Some(new_name) = plan.target(store, ref_kind_symbol(kind), &name, &descriptor) {
            refs.push((index as u16, name_and_type, new_name));
        }
    }
    for (index, name_and_type, new_name) in refs {
        let nat = rebuild_name_and_type(unit, name_and_type, &new_name)?;
        if let Some(Constant::MemberRef { name_and_type, .. }) = unit.pool.get_mut(index) {
            *name_and_type = nat;
            outcome.references += 1;
        }
    }

    // EnclosingMethod: class_index u16, method_index u16 (NameAndType or 0).
    let mut enclosing = Vec::new();
    for (i, attr) in unit.attributes.iter().enumerate() {
        if unit.pool.utf8(attr.name_index).as_deref() != Some("EnclosingMethod")
            || attr.info.len() != 4
        {
            continue;
        }
        let class = u16::from_be_bytes([attr.info[0], attr.info[1]]);
        let method = u16::from_be_bytes([attr.info[2], attr.info[3]]);
        if method == 0 {
            continue;
        }
        let Some(owner) = unit.pool.class_name(class) else { continue };
        if owner != own && !plan.archive_classes.contains(&owner) {
            continue;
        }
        let Some((name, descriptor)) = unit.pool.name_and_type(method) else { continue };
        if let Some(new_name) = plan.target(store, SymbolKind::Method, &name, &descriptor) {
            enclosing.push((i, method, new_name));
        }
    }
    for (i, method, new_name) in enclosing {
        let nat = rebuild_name_and_type(unit, method, &new_name)?;
        unit.attributes[i].info[2..4].copy_from_slice(&nat.to_be_bytes());
        outcome.references += 1;
    }

    Ok(outcome)
}

/// Intern a `NameAndType` equal to the one at `index` but named `new_name`.
fn rebuild_name_and_type(
    unit: &mut ClassUnit,
    index: u16,
    new_name: &str,
) -> Result<u16, TransformError> {
    let descriptor = match unit.pool.get(index)? {
        Constant::NameAndType { descriptor, .. } => *descriptor,
        _ => {
            return Err(ParseError::BadIndex { index, reason: "expected a NameAndType constant" }
                .into())
        }
    };
    let name = unit.pool.intern_utf8(new_name).ok_or(TransformError::PoolOverflow)?;
    unit.pool
        .intern(Constant::NameAndType { name, descriptor })
        .ok_or(TransformError::PoolOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcodes::{ALOAD_0, INVOKEVIRTUAL, RETURN};
    use crate::bytecode::{parse, ClassBuilder, ACC_PUBLIC};
    use crate::naming::predictor::NoopPredictor;

    fn policy() -> NamingPolicy<'static> {
        NamingPolicy { predictor: &NoopPredictor, min_confidence: 0.0, obfuscated_name_max_len: 2 }
    }

    #[test]
    fn survey_proposes_default_names_without_predictor() {
        let mut b = ClassBuilder::new("demo/A");
        b.field(0x0002, "a", "I").method(ACC_PUBLIC, "b", "()V", vec![RETURN]);
        let unit = b.build();
        let store = MappingStore::new();
        let s = survey(&unit, &store, &policy());
        let names: Vec<(&str, &str)> =
            s.proposals.iter().map(|p| (p.old_name.as_str(), p.new_name.as_str())).collect();
        assert_eq!(names, vec![("a", "fieldA"), ("b", "methodB")]);
    }

    #[test]
    fn colliding_rename_is_blocked() {
        let mut b = ClassBuilder::new("demo/A");
        b.method(ACC_PUBLIC, "a", "()V", vec![RETURN])
            .method(ACC_PUBLIC, "methodA", "()V", vec![RETURN]);
        let mut unit = b.build();
        let store = MappingStore::new();
        store.insert_if_absent("a", "methodA", crate::db::MappingOrigin::Predicted);
        let s = survey(&unit, &store, &policy());
        let (plan, collisions) = RenamePlan::build(&[s], &store);
        assert_eq!(collisions.len(), 1);
        let outcome = rename_unit(&mut unit, &store, &plan).unwrap();
        assert!(outcome.renamed.is_empty());
    }

    #[test]
    fn shared_utf8_is_not_edited_in_place() {
        let mut b = ClassBuilder::new("demo/A");
        let literal = b.string("a");
        let call = b.method_ref("demo/A", "a", "()V");
        let code = vec![ALOAD_0, INVOKEVIRTUAL, (call >> 8) as u8, call as u8, RETURN];
        b.method(ACC_PUBLIC, "a", "()V", code);
        let mut unit = parse(&b.to_bytes()).unwrap();
        let store = MappingStore::new();
        store.set_override("a", "attack");
        let s = survey(&unit, &store, &policy());
        let (plan, _) = RenamePlan::build(&[s], &store);
        let outcome = rename_unit(&mut unit, &store, &plan).unwrap();
        assert_eq!(outcome.renamed.len(), 1);
        assert_eq!(outcome.references, 1);
        assert_eq!(unit.pool.string(literal).as_deref(), Some("a"));
        assert_eq!(unit.pool.member_ref(call).unwrap().name, "attack");
    }
}

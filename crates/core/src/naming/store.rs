//! Process-wide name mapping store and suspect set.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::Mutex;
use serde::Serialize;

use crate::db::{DbResult, MappingOrigin, MappingRecord, ProjectDb};

/// Mappings every project starts with.
pub const DEFAULT_DICTIONARY: &[(&str, &str)] = &[
    ("zov", "isCritActive"),
    ("pisun", "isAttackActive"),
    ("vodka", "targetEntity"),
    ("forft", "unusedMethod"),
];

/// Junk names every project starts with.
pub const DEFAULT_SUSPECTS: &[&str] = &["unusedMethod"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub new_name: String,
    pub origin: MappingOrigin,
}

#[derive(Debug, Default)]
struct Table {
    entries: BTreeMap<String, MappingEntry>,
    /// How many keys map to each new name.
    targets: HashMap<String, usize>,
}

impl Table {
    fn put(&mut self, old: String, entry: MappingEntry) {
        if let Some(prev) = self.entries.get(&old) {
            if let Some(n) = self.targets.get_mut(&prev.new_name) {
                *n -= 1;
                if *n == 0 {
                    self.targets.remove(&prev.new_name);
                }
            }
        }
        *self.targets.entry(entry.new_name.clone()).or_insert(0) += 1;
        self.entries.insert(old, entry);
    }
}

/// Old-name → new-name table shared by every worker of a run.
///
/// Each operation is one critical section. Automatic inserts are first-writer-wins and never
/// replace an existing key; only [`MappingStore::set_override`] replaces, and it always wins.
#[derive(Debug, Default)]
pub struct MappingStore {
    table: Mutex<Table>,
}

impl MappingStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with [`DEFAULT_DICTIONARY`].
    pub fn with_defaults() -> Self {
        let store = Self::new();
        for (old, new) in DEFAULT_DICTIONARY {
            store.insert_if_absent(old, new, MappingOrigin::Dictionary);
        }
        store
    }

    /// Insert `old → new` unless `old` is already mapped. Returns the entry in effect
    /// afterwards, which is the existing one when the key was taken.
    pub fn insert_if_absent(&self, old: &str, new: &str, origin: MappingOrigin) -> MappingEntry {
        let mut table = self.table.lock();
        if let Some(existing) = table.entries.get(old) {
            return existing.clone();
        }
        let entry = MappingEntry { new_name: new.to_string(), origin };
        table.put(old.to_string(), entry.clone());
        entry
    }

    /// Manual override: replaces any existing value for `old`.
    pub fn set_override(&self, old: &str, new: &str) {
        let entry = MappingEntry { new_name: new.to_string(), origin: MappingOrigin::Manual };
        self.table.lock().put(old.to_string(), entry);
    }

    pub fn resolve(&self, old: &str) -> Option<String> {
        self.table.lock().entries.get(old).map(|e| e.new_name.clone())
    }

    pub fn get(&self, old: &str) -> Option<MappingEntry> {
        self.table.lock().entries.get(old).cloned()
    }

    /// Whether some key maps to `name`.
    pub fn is_target(&self, name: &str) -> bool {
        self.table.lock().targets.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().entries.is_empty()
    }

    /// Copy of the whole table, ordered by old name.
    pub fn snapshot(&self) -> BTreeMap<String, MappingEntry> {
        self.table.lock().entries.clone()
    }

    /// Load persisted rows. Manual rows override, everything else is first-writer-wins.
    pub fn load_from_db(&self, db: &ProjectDb) -> DbResult<usize> {
        let records = db.list_mappings()?;
        for r in &records {
            match r.origin {
                MappingOrigin::Manual => self.set_override(&r.old_name, &r.new_name),
                origin => {
                    self.insert_if_absent(&r.old_name, &r.new_name, origin);
                }
            }
        }
        Ok(records.len())
    }

    /// Persist the table. Manual rows in the database are never replaced by automatic ones.
    pub fn save_to_db(&self, db: &ProjectDb, updated_at: &str) -> DbResult<usize> {
        let records: Vec<MappingRecord> = self
            .snapshot()
            .into_iter()
            .map(|(old_name, e)| MappingRecord {
                old_name,
                new_name: e.new_name,
                origin: e.origin,
                updated_at: updated_at.to_string(),
            })
            .collect();
        db.save_mappings(&records)
    }
}

/// Names of methods known to be junk. Read-only for the duration of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspectSet {
    names: BTreeSet<String>,
}

impl SuspectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut set = Self::new();
        set.extend(DEFAULT_SUSPECTS.iter().map(|s| s.to_string()));
        set
    }

    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    pub fn extend(&mut self, names: impl IntoIterator<Item = String>) {
        self.names.extend(names);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn load_from_db(&mut self, db: &ProjectDb) -> DbResult<usize> {
        let names = db.list_suspects()?;
        let count = names.len();
        self.extend(names);
        Ok(count)
    }
}

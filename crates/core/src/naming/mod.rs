//! Identifier renaming: mapping store, predictor, and the per-unit renaming engine.

pub mod predictor;
pub mod renamer;
pub mod store;

use sha2::{Digest, Sha256};

use crate::bytecode::SymbolKind;

pub use predictor::{
    init_predictor, Category, Features, LogisticPredictor, NamePredictor, NoopPredictor,
    Prediction,
};
pub use renamer::{
    rename_unit, survey, Collision, DeclaredMember, NamingPolicy, Proposal, Rename, RenameOutcome,
    RenamePlan, UnitSurvey,
};
pub use store::{MappingEntry, MappingStore, SuspectSet, DEFAULT_DICTIONARY, DEFAULT_SUSPECTS};

const CONFUSABLE: &[char] = &['I', 'l', '1', 'O', '0', '_'];

/// Constructors, static initialisers and the program entry point keep their names.
pub fn is_special(kind: SymbolKind, name: &str, descriptor: &str) -> bool {
    match kind {
        SymbolKind::Method => {
            name == "<init>"
                || name == "<clinit>"
                || (name == "main" && descriptor == "([Ljava/lang/String;)V")
        }
        SymbolKind::Field => false,
        SymbolKind::Class => true,
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Whether `name` looks machine-generated.
pub fn is_obfuscated(name: &str, max_len: usize) -> bool {
    if name.is_empty() {
        return false;
    }
    name.chars().count() <= max_len
        || !name.chars().all(is_identifier_char)
        || name.chars().all(|c| CONFUSABLE.contains(&c))
}

/// Whether `name` can legally name a field or method in a class file.
pub fn is_valid_member_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['.', ';', '[', '/', '<', '>'])
}

/// `prefix` + qualifier derived from `old`.
///
/// `a` with prefix `is` becomes `isA`; names that are not plain ASCII identifiers get a
/// stable hash qualifier instead (`isX1f2e3d4c`).
pub fn synthesize_name(prefix: &str, old: &str) -> String {
    if old.chars().all(is_identifier_char) && !old.is_empty() {
        let mut chars = old.chars();
        let first = chars.next().map(|c| c.to_ascii_uppercase()).unwrap_or('X');
        format!("{prefix}{first}{}", chars.as_str())
    } else {
        let digest = Sha256::digest(old.as_bytes());
        let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
        format!("{prefix}X{hex}")
    }
}

//! unravel-core
//!
//! Core library for deobfuscating JVM class archives.
//!
//! This crate holds the bytecode model, the naming engine (mapping store, predictor,
//! renamer), the per-unit rewriting passes, the bounded scheduler and the archive
//! reader/writer, plus project persistence. Frontends stay thin wrappers around it.

pub mod archive;
pub mod bytecode;
pub mod db;
pub mod error;
pub mod naming;
pub mod runlog;
pub mod services;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

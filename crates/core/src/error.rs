//! Error taxonomy for the deobfuscation pipeline.
//!
//! Only [`ArchiveOpenError`] (and write failures on the output container) abort a run.
//! Every other error here is scoped to a single unit or call site and is recorded in the
//! run log while the pipeline keeps going.

use std::path::PathBuf;

use thiserror::Error;

/// The input or output container could not be opened. Fatal for the whole run.
#[derive(Debug, Error)]
pub enum ArchiveOpenError {
    #[error("Failed to open archive {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid archive container: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Output archive {0} would overwrite the input archive")]
    SameAsInput(PathBuf),
}

/// A bytecode unit does not match the class file layout.
///
/// Parsing never touches shared state, so a unit failing with this error is simply
/// passed through untransformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("bad magic 0x{0:08X}")]
    BadMagic(u32),

    #[error("unsupported class file version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("truncated input at offset {offset}: needed {needed} more byte(s)")]
    Truncated { offset: usize, needed: usize },

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: u16 },

    #[error("constant pool index {index} is invalid: {reason}")]
    BadIndex { index: u16, reason: &'static str },

    #[error("malformed Code attribute: {0}")]
    MalformedCode(String),

    #[error("invalid opcode 0x{opcode:02X} at code offset {offset}")]
    BadOpcode { opcode: u8, offset: usize },

    #[error("branch at code offset {offset} targets {target}, outside the method body")]
    BadBranch { offset: usize, target: i64 },

    #[error("{0} trailing byte(s) after the class structure")]
    TrailingBytes(usize),
}

/// The configured name predictor could not be initialised.
///
/// Raised once at startup; the run continues with dictionary-and-default naming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Name prediction unavailable: {0}")]
pub struct PredictionUnavailable(pub String);

/// A single obfuscated literal could not be statically recovered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiteralRecoveryFailure {
    #[error("decrypt helper {0} not found in unit")]
    HelperNotFound(String),

    #[error("call to {helper} at {method}@{offset} does not take a constant literal")]
    NonConstantArgument { helper: String, method: String, offset: usize },

    #[error("decoding rule of helper {0} is not supported")]
    UnsupportedDecoding(String),

    #[error("literal #{index} could not be decoded by {helper}: {reason}")]
    InvalidEncoding { helper: String, index: u16, reason: String },

    #[error("no room to rewrite literal #{0}")]
    PoolOverflow(u16),
}

/// A unit-level transformation failure. The original bytes are passed through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("could not read entry: {0}")]
    Read(String),

    #[error("constant pool is full")]
    PoolOverflow,

    #[error("transformation did not finish before the run deadline")]
    Timeout,

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Fatal run-level errors.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    ArchiveOpen(#[from] ArchiveOpenError),

    #[error("Failed to write output archive: {0}")]
    ArchiveWrite(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to build worker pool: {0}")]
    Pool(String),
}

use serde::{Deserialize, Serialize};

/// Where a name mapping came from.
///
/// Manual entries always win over dictionary defaults and predictions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MappingOrigin {
    Dictionary,
    Manual,
    Predicted,
}

impl MappingOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingOrigin::Dictionary => "dictionary",
            MappingOrigin::Manual => "manual",
            MappingOrigin::Predicted => "predicted",
        }
    }
}

impl std::str::FromStr for MappingOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dictionary" => Ok(MappingOrigin::Dictionary),
            "manual" => Ok(MappingOrigin::Manual),
            "predicted" => Ok(MappingOrigin::Predicted),
            other => Err(format!("unknown mapping origin '{other}'")),
        }
    }
}

/// A persisted `old_name -> new_name` row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingRecord {
    pub old_name: String,
    pub new_name: String,
    pub origin: MappingOrigin,
    pub updated_at: String,
}

/// Final status of a deobfuscation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every bytecode unit was transformed.
    Completed,
    /// Some units failed or missed the deadline and were passed through untransformed.
    Degraded,
    /// A fatal error aborted the run.
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Degraded => "degraded",
            RunStatus::Failed => "failed",
        }
    }
}

/// Record describing one deobfuscation run, for bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    pub input: String,
    pub output: String,
    pub status: RunStatus,
    pub transformed: u64,
    pub skipped: u64,
    pub literals_recovered: u64,
    pub methods_removed: u64,
    pub started_at: String,
    pub finished_at: String,
}

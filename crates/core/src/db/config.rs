use serde::{Deserialize, Serialize};

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbConfig {
    /// Path to the project database file (typically relative to project root).
    pub path: String,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Location of the persistent run log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Path to the append-only log file (typically relative to project root).
    pub path: String,
}

impl LogConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Tunables of the deobfuscation pipeline.
///
/// Every field has a default, so older `project.json` files without a `pipeline`
/// section (or with only some keys) keep loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of worker threads transforming units in parallel.
    pub workers: usize,
    /// Units that may be queued on top of the ones being worked on.
    pub queue_capacity: usize,
    /// Overall deadline for the transform pass, in seconds.
    pub timeout_secs: u64,
    /// Consult the name predictor for obfuscated names without a mapping.
    pub enable_ml: bool,
    /// Optional JSON model replacing the built-in training set.
    pub model_path: Option<String>,
    /// Predictions below this confidence fall back to default naming.
    pub min_confidence: f64,
    /// Names up to this length are considered obfuscated.
    pub obfuscated_name_max_len: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            timeout_secs: 60,
            enable_ml: true,
            model_path: None,
            min_confidence: 0.0,
            obfuscated_name_max_len: 2,
        }
    }
}

/// Serializable configuration describing an unravel project.
///
/// This lives at `.unravel/project.json` in the project root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Human-friendly project name.
    pub name: String,
    /// Optional description / notes.
    pub description: Option<String>,
    /// Schema/config version. This is about the config format, not the tool version.
    pub config_version: String,
    /// Database configuration (path is typically relative to project root).
    pub db: DbConfig,
    pub log: LogConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl ProjectConfig {
    /// Create a new project configuration using the given name, db path and log path.
    pub fn new(
        name: impl Into<String>,
        db_path: impl Into<String>,
        log_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            config_version: "0.1.0".to_string(),
            db: DbConfig::new(db_path),
            log: LogConfig::new(log_path),
            pipeline: PipelineConfig::default(),
        }
    }
}

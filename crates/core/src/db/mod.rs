//! Project database integration and project layout definitions.
//!
//! This module wraps a SQLite database storing:
//! - The persisted name-mapping table (dictionary, manual and predicted entries)
//! - The suspect-method set consulted by junk elimination
//! - A history of deobfuscation runs
//!
//! Alongside it live the project config (`.unravel/project.json`) and the
//! on-disk layout computation.

pub mod config;
pub mod context;
pub mod layout;
pub mod models;
pub mod project_db;
pub mod util;

pub use config::{DbConfig, LogConfig, PipelineConfig, ProjectConfig};
pub use context::ProjectContext;
pub use layout::ProjectLayout;
pub use models::{MappingOrigin, MappingRecord, RunRecord, RunStatus};
pub use project_db::{DbError, DbResult, ProjectDb, CURRENT_SCHEMA_VERSION};
pub use util::{load_project_config, open_project_db, save_project_config};

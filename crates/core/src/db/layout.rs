use std::path::{Path, PathBuf};

/// Logical layout of a project on disk.
///
/// This is derived from a chosen root path. It does *not* perform any IO itself.
/// The CLI or other frontends are responsible for actually creating directories
/// and files based on this layout.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    /// Root directory of the project.
    pub root: PathBuf,
    /// Directory for internal metadata (.unravel).
    pub meta_dir: PathBuf,
    /// Path to the project config file (JSON).
    pub project_config_path: PathBuf,
    /// Path to the project database file.
    pub db_path: PathBuf,
    /// Path to the append-only run log.
    pub log_path: PathBuf,
    /// Directory for deobfuscated archives.
    pub outputs_dir: PathBuf,
}

impl ProjectLayout {
    /// Compute the default layout for a project rooted at `root`.
    ///
    /// This does *not* touch the filesystem.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let meta_dir = root.join(".unravel");
        let project_config_path = meta_dir.join("project.json");
        let db_path = meta_dir.join("project.db");
        let log_path = meta_dir.join("deobf.log");
        let outputs_dir = root.join("outputs");

        Self { root, meta_dir, project_config_path, db_path, log_path, outputs_dir }
    }

    /// Compute a database path string suitable for storing in `ProjectConfig`,
    /// typically as a path relative to `root`.
    pub fn db_path_relative_string(&self) -> String {
        self.relative_string(&self.db_path)
    }

    pub fn log_path_relative_string(&self) -> String {
        self.relative_string(&self.log_path)
    }

    fn relative_string(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => path.to_string_lossy().to_string(),
        }
    }

    /// Default output path for a given input archive: `outputs/<stem>-deobf.<ext>`.
    pub fn default_output_for(&self, input: &Path) -> PathBuf {
        let stem = input.file_stem().map(|s| s.to_string_lossy().to_string());
        let stem = stem.filter(|s| !s.is_empty()).unwrap_or_else(|| "archive".to_string());
        let ext = input
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "jar".to_string());
        self.outputs_dir.join(format!("{stem}-deobf.{ext}"))
    }

    /// Resolve a path stored in the config (relative to the root unless absolute).
    pub fn resolve(&self, configured: &str) -> PathBuf {
        let path = Path::new(configured);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

use std::path::Path;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::db::{MappingOrigin, MappingRecord, RunRecord, RunStatus};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Error type for project database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

/// SQLite-backed project database.
///
/// This is a thin wrapper around `rusqlite::Connection` that is responsible for:
/// - Opening/creating the DB file.
/// - Applying schema migrations.
/// - Reading and writing name mappings, suspect names and run history.
#[derive(Debug)]
pub struct ProjectDb {
    conn: Connection,
}

impl ProjectDb {
    /// Open (or create) a project database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Expose a reference to the underlying connection for advanced callers.
    /// For most code, prefer higher-level helpers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert or update a mapping.
    ///
    /// A `manual` row is only ever replaced by another `manual` value. Returns `true` if a
    /// row was written.
    pub fn upsert_mapping(
        &self,
        old_name: &str,
        new_name: &str,
        origin: MappingOrigin,
        updated_at: &str,
    ) -> DbResult<bool> {
        let affected = self.conn.execute(
            r#"
            INSERT INTO name_mappings (old_name, new_name, origin, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(old_name) DO UPDATE SET
                new_name = excluded.new_name,
                origin = excluded.origin,
                updated_at = excluded.updated_at
            WHERE name_mappings.origin != 'manual' OR excluded.origin = 'manual'
            "#,
            params![old_name, new_name, origin.as_str(), updated_at],
        )?;
        Ok(affected > 0)
    }

    /// Write a batch of mappings in one transaction, with the same manual-wins rule as
    /// [`ProjectDb::upsert_mapping`]. Returns the number of rows written.
    pub fn save_mappings(&self, records: &[MappingRecord]) -> DbResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO name_mappings (old_name, new_name, origin, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(old_name) DO UPDATE SET
                    new_name = excluded.new_name,
                    origin = excluded.origin,
                    updated_at = excluded.updated_at
                WHERE name_mappings.origin != 'manual' OR excluded.origin = 'manual'
                "#,
            )?;
            for r in records {
                written += stmt.execute(params![
                    r.old_name,
                    r.new_name,
                    r.origin.as_str(),
                    r.updated_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// List all persisted mappings (ordered by old name).
    pub fn list_mappings(&self) -> DbResult<Vec<MappingRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT old_name, new_name, origin, updated_at
            FROM name_mappings
            ORDER BY old_name
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let origin: String = row.get(2)?;
            Ok(MappingRecord {
                old_name: row.get(0)?,
                new_name: row.get(1)?,
                origin: origin.parse::<MappingOrigin>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })?,
                updated_at: row.get(3)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Delete a mapping. Returns the number of rows affected.
    pub fn delete_mapping(&self, old_name: &str) -> DbResult<usize> {
        Ok(self.conn.execute("DELETE FROM name_mappings WHERE old_name = ?1", params![old_name])?)
    }

    /// Add a name to the suspect set. Returns `false` if it was already present.
    pub fn add_suspect(&self, name: &str) -> DbResult<bool> {
        let affected = self
            .conn
            .execute("INSERT OR IGNORE INTO suspect_methods (name) VALUES (?1)", params![name])?;
        Ok(affected > 0)
    }

    pub fn list_suspects(&self) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM suspect_methods ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Record a finished run and return its row id.
    pub fn insert_run(&self, record: &RunRecord) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO deobf_runs (input, output, status, transformed, skipped, literals_recovered, methods_removed, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.input,
                record.output,
                record.status.as_str(),
                record.transformed as i64,
                record.skipped as i64,
                record.literals_recovered as i64,
                record.methods_removed as i64,
                record.started_at,
                record.finished_at
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// List recorded runs, oldest first.
    pub fn list_runs(&self) -> DbResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT input, output, status, transformed, skipped, literals_recovered, methods_removed, started_at, finished_at
            FROM deobf_runs
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(2)?;
            Ok(RunRecord {
                input: row.get(0)?,
                output: row.get(1)?,
                status: status.parse::<RunStatusString>()?.0,
                transformed: row.get::<_, i64>(3)? as u64,
                skipped: row.get::<_, i64>(4)? as u64,
                literals_recovered: row.get::<_, i64>(5)? as u64,
                methods_removed: row.get::<_, i64>(6)? as u64,
                started_at: row.get(7)?,
                finished_at: row.get(8)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: name_mappings, suspect_methods and deobf_runs tables
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version < 1 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS name_mappings (
                old_name   TEXT PRIMARY KEY,
                new_name   TEXT NOT NULL,
                origin     TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS suspect_methods (
                name TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS deobf_runs (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                input              TEXT NOT NULL,
                output             TEXT NOT NULL,
                status             TEXT NOT NULL,
                transformed        INTEGER NOT NULL DEFAULT 0,
                skipped            INTEGER NOT NULL DEFAULT 0,
                literals_recovered INTEGER NOT NULL DEFAULT 0,
                methods_removed    INTEGER NOT NULL DEFAULT 0,
                started_at         TEXT NOT NULL,
                finished_at        TEXT NOT NULL
            );
            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

struct RunStatusString(pub RunStatus);

impl std::str::FromStr for RunStatusString {
    type Err = rusqlite::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.to_lowercase().as_str() {
            "completed" => RunStatus::Completed,
            "degraded" => RunStatus::Degraded,
            "failed" => RunStatus::Failed,
            _other => {
                return Err(rusqlite::Error::InvalidQuery);
            }
        };
        Ok(RunStatusString(status))
    }
}

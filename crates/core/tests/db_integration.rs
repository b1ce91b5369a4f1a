use rusqlite::Connection;
use tempfile::tempdir;
use unravel_core::db::{
    DbError, MappingOrigin, MappingRecord, ProjectDb, RunRecord, RunStatus,
    CURRENT_SCHEMA_VERSION,
};

fn user_version(db: &ProjectDb) -> i32 {
    db.connection().query_row("PRAGMA user_version;", [], |row| row.get(0)).expect("user_version")
}

fn table_exists(db: &ProjectDb, name: &str) -> bool {
    db.connection()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .expect("sqlite_master")
        == 1
}

#[test]
fn open_creates_schema_at_current_version() {
    let dir = tempdir().expect("tempdir");
    let db = ProjectDb::open(&dir.path().join("project.db")).expect("open db");

    assert_eq!(user_version(&db), CURRENT_SCHEMA_VERSION);
    for table in ["name_mappings", "suspect_methods", "deobf_runs"] {
        assert!(table_exists(&db, table), "missing table {table}");
    }
}

#[test]
fn reopening_keeps_existing_rows() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("project.db");
    {
        let db = ProjectDb::open(&path).expect("open db");
        db.upsert_mapping("a", "isReady", MappingOrigin::Manual, "2024-01-01T00:00:00Z")
            .expect("seed mapping");
        db.add_suspect("forft").expect("seed suspect");
    }

    let db = ProjectDb::open(&path).expect("reopen db");
    assert_eq!(user_version(&db), CURRENT_SCHEMA_VERSION);
    let mappings = db.list_mappings().expect("list mappings");
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].new_name, "isReady");
    assert_eq!(mappings[0].origin, MappingOrigin::Manual);
    assert_eq!(db.list_suspects().expect("list suspects"), vec!["forft"]);
    assert!(db.list_runs().expect("list runs").is_empty());
}

#[test]
fn open_rejects_newer_schema() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("project.db");
    {
        let conn = Connection::open(&path).expect("raw open");
        conn.execute_batch("PRAGMA user_version = 99;").expect("bump version");
    }

    match ProjectDb::open(&path) {
        Err(DbError::UnsupportedSchemaVersion { found, max_supported, .. }) => {
            assert_eq!(found, 99);
            assert_eq!(max_supported, CURRENT_SCHEMA_VERSION);
        }
        other => panic!("expected UnsupportedSchemaVersion, got {other:?}"),
    }
}

#[test]
fn manual_mappings_are_never_replaced_by_automatic_ones() {
    let dir = tempdir().expect("tempdir");
    let db = ProjectDb::open(&dir.path().join("project.db")).expect("open db");

    assert!(db.upsert_mapping("zov", "critTick", MappingOrigin::Manual, "t1").expect("manual"));
    assert!(!db
        .upsert_mapping("zov", "isCritActive", MappingOrigin::Dictionary, "t2")
        .expect("dictionary"));
    assert!(!db.upsert_mapping("zov", "isZov", MappingOrigin::Predicted, "t3").expect("predicted"));
    assert!(db.upsert_mapping("zov", "critFlag", MappingOrigin::Manual, "t4").expect("manual 2"));

    let mappings = db.list_mappings().expect("list");
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].new_name, "critFlag");
    assert_eq!(mappings[0].updated_at, "t4");
}

#[test]
fn save_mappings_applies_the_same_rule_in_one_batch() {
    let dir = tempdir().expect("tempdir");
    let db = ProjectDb::open(&dir.path().join("project.db")).expect("open db");
    db.upsert_mapping("b", "fieldB", MappingOrigin::Manual, "t0").expect("seed manual");

    let record = |old: &str, new: &str, origin| MappingRecord {
        old_name: old.to_string(),
        new_name: new.to_string(),
        origin,
        updated_at: "t1".to_string(),
    };
    let written = db
        .save_mappings(&[
            record("a", "methodA", MappingOrigin::Predicted),
            record("b", "getB", MappingOrigin::Predicted),
            record("vodka", "targetEntity", MappingOrigin::Dictionary),
        ])
        .expect("save");
    assert_eq!(written, 2);

    let names: Vec<(String, String)> = db
        .list_mappings()
        .expect("list")
        .into_iter()
        .map(|m| (m.old_name, m.new_name))
        .collect();
    assert_eq!(
        names,
        vec![
            ("a".to_string(), "methodA".to_string()),
            ("b".to_string(), "fieldB".to_string()),
            ("vodka".to_string(), "targetEntity".to_string()),
        ]
    );

    assert_eq!(db.delete_mapping("a").expect("delete"), 1);
    assert_eq!(db.delete_mapping("a").expect("delete again"), 0);
}

#[test]
fn suspects_are_deduplicated_and_sorted() {
    let dir = tempdir().expect("tempdir");
    let db = ProjectDb::open(&dir.path().join("project.db")).expect("open db");

    assert!(db.add_suspect("zz").expect("add zz"));
    assert!(db.add_suspect("aa").expect("add aa"));
    assert!(!db.add_suspect("zz").expect("add zz again"));
    assert_eq!(db.list_suspects().expect("list"), vec!["aa", "zz"]);
}

#[test]
fn runs_round_trip_in_insertion_order() {
    let dir = tempdir().expect("tempdir");
    let db = ProjectDb::open(&dir.path().join("project.db")).expect("open db");

    let run = |status, transformed| RunRecord {
        input: "in/client.jar".to_string(),
        output: "outputs/client-deobf.jar".to_string(),
        status,
        transformed,
        skipped: 1,
        literals_recovered: 4,
        methods_removed: 2,
        started_at: "2024-05-01T10:00:00Z".to_string(),
        finished_at: "2024-05-01T10:00:02Z".to_string(),
    };
    let first = db.insert_run(&run(RunStatus::Degraded, 9)).expect("insert first");
    let second = db.insert_run(&run(RunStatus::Failed, 0)).expect("insert second");
    assert!(second > first);

    let runs = db.list_runs().expect("list runs");
    assert_eq!(runs, vec![run(RunStatus::Degraded, 9), run(RunStatus::Failed, 0)]);
}

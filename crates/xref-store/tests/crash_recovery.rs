use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use serde_json::Value;
use tempfile::tempdir;
use xref_store::{
    JsonFileStore, LoadSource, PersistenceProvider, StoreEvent, StoreEventLog, TableKind,
};
use xref_types::{CounterTable, MappingTable, Tool};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn mappings(entries: &[(&str, Tool, &str)]) -> MappingTable {
    let mut table = MappingTable::new();
    for (internal, tool, external) in entries {
        table.insert(*internal, *tool, *external);
    }
    table
}

fn jira_counters(key: &str, value: u64) -> CounterTable {
    let mut table = CounterTable::default();
    table.jira.insert(key.to_owned(), value);
    table
}

fn read_json(path: &Path) -> Value {
    let bytes = fs::read(path).expect("read document");
    serde_json::from_slice(&bytes).expect("document is JSON")
}

fn observed_store(root: &Path) -> (JsonFileStore, Arc<StoreEventLog>) {
    let log = Arc::new(StoreEventLog::new(64));
    let store = JsonFileStore::open(root)
        .expect("open store")
        .with_observer(log.clone());
    (store, log)
}

#[test]
fn corrupt_primary_recovers_previous_save_from_backup() {
    init_tracing();
    let dir = tempdir().expect("tempdir");
    let (store, log) = observed_store(dir.path());

    let first = mappings(&[("TASK-E01-b2c4", Tool::Jira, "PROJ-1")]);
    let second = mappings(&[
        ("TASK-E01-b2c4", Tool::Jira, "PROJ-1"),
        ("TASK-E01-c3d5", Tool::Jira, "PROJ-2"),
    ]);
    store.save_mappings(&first).expect("first save");
    store.save_mappings(&second).expect("second save");

    let paths = store.paths(TableKind::Mappings);
    fs::write(&paths.primary, b"{ truncated").expect("corrupt primary");
    log.drain();

    let loaded = store.load_mappings().expect("load");
    assert_eq!(loaded, first, "case=backup_holds_first_save");

    let restored = read_json(&paths.primary);
    assert_eq!(
        restored["mappings"]["TASK-E01-b2c4"]["jira"], "PROJ-1",
        "case=primary_restored_from_backup"
    );
    assert!(restored["mappings"].get("TASK-E01-c3d5").is_none());

    let events = log.drain();
    assert!(
        events.contains(&StoreEvent::BackupRecovered {
            table: TableKind::Mappings
        }),
        "case=backup_event {events:?}"
    );
    assert!(events.contains(&StoreEvent::TableLoaded {
        table: TableKind::Mappings,
        source: LoadSource::Backup,
    }));
    assert_eq!(store.metrics().backup_recoveries, 1);
}

#[test]
fn double_corruption_yields_default_without_error() {
    init_tracing();
    let dir = tempdir().expect("tempdir");
    let (store, log) = observed_store(dir.path());

    store.save_counters(&jira_counters("PROJ", 1)).expect("save");
    store.save_counters(&jira_counters("PROJ", 2)).expect("save");

    let paths = store.paths(TableKind::Counters);
    fs::write(&paths.primary, b"not json at all").expect("corrupt primary");
    fs::write(&paths.backup, br#"{"version": "9.9"}"#).expect("corrupt backup");
    log.drain();

    let loaded = store.load_counters().expect("load never fails on corruption");
    assert_eq!(loaded, CounterTable::default(), "case=default_counters");

    let events = log.drain();
    assert!(
        events
            .iter()
            .any(|event| matches!(event, StoreEvent::DefaultFallback { .. })),
        "case=fallback_event {events:?}"
    );
    assert!(events.contains(&StoreEvent::TableLoaded {
        table: TableKind::Counters,
        source: LoadSource::Default,
    }));
    assert_eq!(
        fs::read(&paths.backup).expect("backup"),
        br#"{"version": "9.9"}"#,
        "case=backup_left_untouched"
    );
}

#[test]
fn corrupt_primary_without_backup_yields_default() {
    let dir = tempdir().expect("tempdir");
    let store = JsonFileStore::open(dir.path()).expect("open");
    let paths = store.paths(TableKind::Mappings);
    fs::write(&paths.primary, b"[1, 2, 3]").expect("write");

    assert!(store.load_mappings().expect("load").is_empty());
    assert_eq!(store.metrics().default_fallbacks, 1);
}

#[test]
fn invalid_documents_are_treated_as_corrupt() {
    let cases: [(&str, &str); 6] = [
        ("missing_version", r#"{"updated": "x", "mappings": {}}"#),
        ("missing_updated", r#"{"version": "1.0", "mappings": {}}"#),
        ("missing_payload", r#"{"version": "1.0", "updated": "x"}"#),
        ("wrong_version", r#"{"version": "0.9", "updated": "x", "mappings": {}}"#),
        (
            "unknown_tool",
            r#"{"version": "1.0", "updated": "x", "mappings": {"TASK-A-b": {"trello": "1"}}}"#,
        ),
        (
            "non_string_external",
            r#"{"version": "1.0", "updated": "x", "mappings": {"TASK-A-b": {"jira": 7}}}"#,
        ),
    ];

    for (case, document) in cases {
        let dir = tempdir().expect("tempdir");
        let store = JsonFileStore::open(dir.path()).expect("open");
        let good = mappings(&[("DOC-XYZ-z7w6", Tool::Linear, "TEAM-1")]);
        store.save_mappings(&good).expect("save");
        // Second save moves `good` into the backup.
        store.save_mappings(&good).expect("save");
        fs::write(store.paths(TableKind::Mappings).primary, document).expect("write");

        let loaded = store.load_mappings().expect("load");
        assert_eq!(loaded, good, "case={case}");
    }
}

#[test]
fn missing_counter_file_loads_default_shape() {
    let dir = tempdir().expect("tempdir");
    let store = JsonFileStore::open(dir.path()).expect("open");
    let counters = store.load_counters().expect("load");
    assert_eq!(
        serde_json::to_value(&counters).expect("to_value"),
        serde_json::json!({"jira": {}, "azure_devops": 0, "linear": {}, "github": 0})
    );
}

#[test]
fn saved_documents_are_pretty_printed_envelopes() {
    let dir = tempdir().expect("tempdir");
    let store = JsonFileStore::open(dir.path()).expect("open");
    store
        .save_mappings(&mappings(&[("FEAT-ABC-x9y8", Tool::AzureDevops, "1")]))
        .expect("save");

    let path = dir.path().join("external_id_mapping.json");
    let text = fs::read_to_string(&path).expect("read");
    assert!(text.starts_with("{\n  \""), "case=indented");
    assert!(text.ends_with("}\n"), "case=trailing_newline");

    let value = read_json(&path);
    assert_eq!(value["version"], "1.0");
    let updated = value["updated"].as_str().expect("updated is a string");
    assert!(
        time::OffsetDateTime::parse(updated, &time::format_description::well_known::Rfc3339)
            .is_ok(),
        "case=rfc3339_timestamp {updated}"
    );
    assert_eq!(value["mappings"]["FEAT-ABC-x9y8"]["azure_devops"], "1");
}

#[test]
fn backup_holds_previous_version_and_timestamp_advances() {
    let dir = tempdir().expect("tempdir");
    let store = JsonFileStore::open(dir.path()).expect("open");
    let paths = store.paths(TableKind::Counters);

    store.save_counters(&jira_counters("PROJ", 1)).expect("save");
    let first = fs::read(&paths.primary).expect("read first");
    thread::sleep(std::time::Duration::from_millis(5));
    store.save_counters(&jira_counters("PROJ", 2)).expect("save");

    assert_eq!(fs::read(&paths.backup).expect("read backup"), first);
    let before = read_json(&paths.backup);
    let after = read_json(&paths.primary);
    assert_eq!(after["counters"]["jira"]["PROJ"], 2);
    assert_ne!(before["updated"], after["updated"], "case=timestamp_updated");
}

#[test]
fn concurrent_saves_never_leave_a_torn_document() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().to_path_buf();

    thread::scope(|scope| {
        for worker in 0..6_u64 {
            let root = root.clone();
            scope.spawn(move || {
                // Separate store instances share only the directory.
                let store = JsonFileStore::open(&root).expect("open");
                for round in 0..10 {
                    store
                        .save_counters(&jira_counters("RACE", worker * 100 + round))
                        .expect("save");
                    store.load_counters().expect("load");
                }
            });
        }
    });

    let store = JsonFileStore::open(&root).expect("open");
    let paths = store.paths(TableKind::Counters);
    let value = read_json(&paths.primary);
    assert_eq!(value["version"], "1.0");
    assert!(value["counters"]["jira"]["RACE"].is_u64());
    assert!(!paths.lock.exists(), "case=lock_released");
    assert!(!paths.temp.exists(), "case=no_staging_leftover");
    assert_eq!(store.metrics().default_fallbacks, 0);
}

#[test]
fn save_creates_missing_directories() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("nested").join("state");
    let store = JsonFileStore::open(&root).expect("open");
    fs::remove_dir_all(dir.path().join("nested")).expect("remove root");

    store.save_counters(&CounterTable::default()).expect("save");
    assert!(root.join("external_id_counters.json").is_file());
}

#[test]
fn save_failure_surfaces_as_io_error() {
    let dir = tempdir().expect("tempdir");
    let store = JsonFileStore::open(dir.path()).expect("open");
    let paths = store.paths(TableKind::Mappings);
    // A directory squatting on the primary's name makes the rename fail.
    fs::create_dir(&paths.primary).expect("mkdir");
    fs::write(paths.primary.join("occupant"), b"x").expect("occupy");

    let err = store.save_mappings(&MappingTable::new()).unwrap_err();
    assert_eq!(err.kind(), xref_error::ErrorKind::IoFailure, "case={err}");
    assert!(!paths.temp.exists(), "case=staging_removed");
    assert!(!paths.lock.exists(), "case=lock_released");
}

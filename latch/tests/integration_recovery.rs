//! Integration tests for activation failure and corruption recovery.

use std::fs;

use latch::{
    FilterCriteria, PersistenceService, RecordTable, ServiceConfig, State, StorageLayout,
    StoredValue, record,
};

#[test]
fn test_activation_failure_leaves_service_inactive() {
    let temp_dir = tempfile::tempdir().unwrap();

    // Occupy the directory path with a file so the tree cannot be created.
    fs::write(temp_dir.path().join("persistence"), b"in the way").unwrap();

    let mut service = PersistenceService::new(ServiceConfig::new(temp_dir.path()));
    service.activate();
    assert!(!service.is_active());

    // Subsequent operations are no-ops and must not panic.
    service.store("temp.Kitchen", State::Number(21.5), None);
    service.flush();
    assert!(service.query(&FilterCriteria::item("temp.Kitchen")).is_empty());
    assert!(service.item_info().is_empty());
    service.deactivate();
}

#[test]
fn test_corrupt_table_is_quarantined_not_deleted() {
    let temp_dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(temp_dir.path(), "latch");
    layout.ensure().unwrap();

    // Plant an unusable table file.
    fs::write(layout.table_file(), b"definitely not a latch table").unwrap();

    let mut service = PersistenceService::new(ServiceConfig::new(temp_dir.path()));
    service.activate();
    assert!(service.is_active(), "repair mode must recover from a corrupt file");

    // The corrupt bytes were preserved in backup/, not destroyed.
    let quarantined: Vec<_> = fs::read_dir(layout.backup_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(quarantined.len(), 1);
    assert_eq!(
        fs::read(&quarantined[0]).unwrap(),
        b"definitely not a latch table"
    );

    // The fresh table is fully usable.
    service.store("temp.Kitchen", State::Number(21.5), None);
    service.flush();
    assert_eq!(service.query(&FilterCriteria::item("temp.Kitchen")).len(), 1);
}

#[test]
fn test_corrupt_record_is_isolated() {
    let temp_dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(temp_dir.path(), "latch");
    layout.ensure().unwrap();

    // Seed the table directly: two valid records and one malformed one.
    {
        let table = RecordTable::open(layout.table_file(), 10_000, 15).unwrap();
        let good1 = record::encode(&StoredValue::now("temp.Kitchen", State::Number(21.5))).unwrap();
        let good2 = record::encode(&StoredValue::now("light.Hall", State::OnOff(true))).unwrap();
        table.put("temp.Kitchen", &good1).unwrap();
        table.put("light.Hall", &good2).unwrap();
        table.put("broken.Item", "{ this is not a record").unwrap();
        table.sync().unwrap();
    }

    let mut service = PersistenceService::new(ServiceConfig::new(temp_dir.path()));
    service.activate();
    assert!(service.is_active());

    // The malformed record is excluded; the valid entries are unaffected.
    let info = service.item_info();
    let names: Vec<&str> = info.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["light.Hall", "temp.Kitchen"]);

    assert!(service.query(&FilterCriteria::item("broken.Item")).is_empty());
    assert_eq!(service.query(&FilterCriteria::item("temp.Kitchen")).len(), 1);
}

#[test]
fn test_record_with_empty_name_is_treated_as_absent() {
    let temp_dir = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(temp_dir.path(), "latch");
    layout.ensure().unwrap();

    {
        let table = RecordTable::open(layout.table_file(), 10_000, 15).unwrap();
        // Well-formed JSON, semantically invalid: empty name.
        table
            .put(
                "ghost",
                r#"{"name":"","state":{"type":"number","value":1.0},"timestamp":"2025-01-07T08:30:00Z"}"#,
            )
            .unwrap();
        table.sync().unwrap();
    }

    let mut service = PersistenceService::new(ServiceConfig::new(temp_dir.path()));
    service.activate();

    assert!(service.query(&FilterCriteria::item("ghost")).is_empty());
    assert!(service.item_info().is_empty());
}

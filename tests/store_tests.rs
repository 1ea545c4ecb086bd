//! Tests for append-only result persistence.

use nbgrade::{report::GradingResult, store::ResultStore};

fn record(assignment: &str) -> GradingResult {
    GradingResult::ungraded(assignment, 10.0, "fixture record")
}

#[test]
fn records_round_trip_through_the_store() {
    let dir = tempfile::tempdir().expect("create store dir");
    let store = ResultStore::new(dir.path());

    let result = record("lab-01");
    let path = store.save(&result).expect("save record");
    assert!(path.exists());

    let loaded = store.load("lab-01", &result.id).expect("load record");
    assert_eq!(loaded, result);
}

#[test]
fn regrades_append_new_records_instead_of_overwriting() {
    let dir = tempfile::tempdir().expect("create store dir");
    let store = ResultStore::new(dir.path());

    let first = record("lab-01");
    let second = record("lab-01");
    let first_path = store.save(&first).expect("save first");
    let second_path = store.save(&second).expect("save second");

    assert_ne!(first_path, second_path);
    assert!(first_path.exists());
    assert!(second_path.exists());
}

#[test]
fn saving_the_same_record_twice_is_refused() {
    let dir = tempfile::tempdir().expect("create store dir");
    let store = ResultStore::new(dir.path());

    let result = record("lab-02");
    store.save(&result).expect("first save");
    let err = store.save(&result).expect_err("second save of same id");
    assert!(err.to_string().contains("append-only"));
}

#[test]
fn records_are_grouped_by_assignment() {
    let dir = tempfile::tempdir().expect("create store dir");
    let store = ResultStore::new(dir.path());

    let path = store.save(&record("lab-07")).expect("save record");
    assert!(path.starts_with(dir.path().join("lab-07")));
}

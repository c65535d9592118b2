//! Persistence, existence checks and locking of the file engine.

use kvlayer_core::{Database, IteratorOptions, OpenOptions, Status, Value};
use kvlayer_engine::FileEngine;
use kvlayer_testkit::utf8;
use tempfile::TempDir;

fn file_db(location: &std::path::Path) -> Database {
    Database::with_options(location, FileEngine::new(), utf8()).unwrap()
}

#[tokio::test]
async fn data_survives_a_new_instance() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("db");

    let db = file_db(&location);
    db.put("b", "2").await.unwrap();
    db.put("a", "1").await.unwrap();
    db.del("b").await.unwrap();
    db.close().await.unwrap();

    let reopened = file_db(&location);
    let entries = reopened
        .iterator(IteratorOptions::new())
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(entries, vec![(Value::from("a"), Value::from("1"))]);
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn error_if_exists() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("db");
    let db = file_db(&location);
    db.open().await.unwrap();
    db.close().await.unwrap();

    let err = db
        .open_with(OpenOptions::new().error_if_exists(true))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LEVEL_DATABASE_OPEN_FAILED");
    assert_eq!(db.status(), Status::Closed);
}

#[tokio::test]
async fn missing_location_without_create() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("absent");
    let db = file_db(&location);

    let err = db
        .open_with(OpenOptions::new().create_if_missing(false))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LEVEL_DATABASE_OPEN_FAILED");
    assert!(!location.exists());
}

#[tokio::test]
async fn second_handle_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("db");
    let first = file_db(&location);
    first.open().await.unwrap();

    let second = file_db(&location);
    let err = second.open().await.unwrap_err();
    assert_eq!(err.code(), "LEVEL_DATABASE_OPEN_FAILED");
    assert!(err.to_string().contains("locked"));

    first.close().await.unwrap();
    second.open().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn destroy_and_repair_offline() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("db");
    let db = file_db(&location);
    db.put("k", "v").await.unwrap();

    assert_eq!(db.destroy().await.unwrap_err().code(), "LEVEL_DATABASE_ALREADY_OPEN");
    db.close().await.unwrap();

    db.repair().await.unwrap();
    let reopened = file_db(&location);
    assert_eq!(reopened.get("k").await.unwrap(), Some(Value::from("v")));
    reopened.close().await.unwrap();

    db.destroy().await.unwrap();
    assert!(!location.exists());

    // Nothing left to repair
    db.repair().await.unwrap();
}

#[tokio::test]
async fn snapshot_reads_survive_later_writes() {
    let dir = TempDir::new().unwrap();
    let db = file_db(&dir.path().join("db"));
    db.put("k", "old").await.unwrap();

    let snapshot = db.snapshot().await.unwrap();
    db.put("k", "new").await.unwrap();

    let pinned = db
        .iterator(IteratorOptions::new().snapshot(&snapshot))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(pinned, vec![(Value::from("k"), Value::from("old"))]);
    assert_eq!(db.get("k").await.unwrap(), Some(Value::from("new")));

    snapshot.close().await.unwrap();
    db.close().await.unwrap();
}

#[tokio::test]
async fn failed_chained_batch_leaves_reads_unchanged() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("db");
    let db = file_db(&location);
    db.put("b", "2").await.unwrap();

    std::fs::remove_dir_all(&location).unwrap();

    let mut batch = db.chained_batch().unwrap();
    batch.put("a", "1").unwrap().del("b").unwrap().put("c", "3").unwrap();
    let err = batch.write().await.unwrap_err();
    assert_eq!(err.code(), "LEVEL_DATABASE_BATCH_FAILED");

    assert_eq!(db.get("a").await.unwrap(), None);
    assert_eq!(db.get("b").await.unwrap(), Some(Value::from("2")));
    assert_eq!(db.get("c").await.unwrap(), None);
    let keys = db.keys(IteratorOptions::new()).unwrap().all().await.unwrap();
    assert_eq!(keys, vec![Value::from("b")]);
}

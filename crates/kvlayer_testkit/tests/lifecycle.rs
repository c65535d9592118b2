//! Open/close state machine, deferred operations and implicit opens.

use kvlayer_core::{Database, DatabaseOptions, Error, OpenOptions, Status, Value};
use kvlayer_engine::MemoryEngine;
use kvlayer_testkit::{init_tracing, utf8, ScriptedEngine, TestDatabase};
use std::time::Duration;

fn slow_open() -> TestDatabase {
    TestDatabase::scripted(ScriptedEngine::new().delay_open(Duration::from_millis(20)))
}

#[tokio::test]
async fn deferred_operations_run_in_call_order() {
    init_tracing();
    let db = slow_open();

    let (first_put, first_get, second_put, second_get) = tokio::join!(
        db.put("a", "1"),
        db.get("a"),
        db.put("a", "2"),
        db.get("a"),
    );

    first_put.unwrap();
    second_put.unwrap();
    assert_eq!(first_get.unwrap(), Some(Value::from("1")));
    assert_eq!(second_get.unwrap(), Some(Value::from("2")));
    assert_eq!(db.status(), Status::Open);
    assert_eq!(db.engine().unwrap().calls().opens, 1);
}

#[tokio::test]
async fn failed_open_rejects_every_deferred_operation() {
    let db = TestDatabase::scripted(
        ScriptedEngine::new()
            .delay_open(Duration::from_millis(5))
            .fail_open("disk unplugged"),
    );

    let (put, get, opened) = tokio::join!(db.put("a", "1"), db.get("a"), db.open());

    for err in [put.unwrap_err(), get.unwrap_err(), opened.unwrap_err()] {
        assert_eq!(err.code(), "LEVEL_DATABASE_OPEN_FAILED");
        assert_eq!(err.to_string(), "disk unplugged");
    }
    assert_eq!(db.status(), Status::Closed);
}

#[tokio::test]
async fn concurrent_opens_share_one_engine_open() {
    let db = slow_open();

    let (a, b, c) = tokio::join!(db.open(), db.open(), db.open());
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(db.engine().unwrap().calls().opens, 1);
}

#[tokio::test]
async fn close_waits_for_open_in_flight() {
    let db = slow_open();

    let (opened, closed) = tokio::join!(db.open(), db.close());
    opened.unwrap();
    closed.unwrap();

    assert_eq!(db.status(), Status::Closed);
    let calls = db.engine().unwrap().calls();
    assert_eq!(calls.opens, 1);
    assert_eq!(calls.closes, 1);
}

#[tokio::test]
async fn passive_open() {
    let db = slow_open();

    let err = db.open_with(OpenOptions::new().passive(true)).await.unwrap_err();
    assert!(matches!(err, Error::NotOpen));

    let (opened, passive) =
        tokio::join!(db.open(), db.open_with(OpenOptions::new().passive(true)));
    opened.unwrap();
    passive.unwrap();

    let (closed, passive) =
        tokio::join!(db.close(), db.open_with(OpenOptions::new().passive(true)));
    closed.unwrap();
    assert_eq!(passive.unwrap_err().code(), "LEVEL_DATABASE_CLOSING");
}

#[tokio::test]
async fn failed_close_leaves_database_open() {
    let db = TestDatabase::scripted(ScriptedEngine::new().fail_close("still flushing"));
    db.put("k", "v").await.unwrap();

    let err = db.close().await.unwrap_err();
    assert_eq!(err.code(), "LEVEL_DATABASE_CLOSE_FAILED");
    assert_eq!(err.to_string(), "still flushing");
    assert_eq!(db.status(), Status::Open);
    assert_eq!(db.get("k").await.unwrap(), Some(Value::from("v")));
}

#[tokio::test]
async fn reopen_keeps_data() {
    let db = TestDatabase::scripted(ScriptedEngine::new());
    db.put("k", "v").await.unwrap();
    db.close().await.unwrap();

    assert!(matches!(db.get("k").await, Err(Error::NotOpen)));

    db.open().await.unwrap();
    assert_eq!(db.get("k").await.unwrap(), Some(Value::from("v")));
    assert_eq!(db.engine().unwrap().calls().opens, 2);
}

#[tokio::test]
async fn implicit_open_uses_database_open_options() {
    let db = Database::with_options(
        "missing",
        MemoryEngine::new(),
        utf8().open_options(OpenOptions::new().create_if_missing(false)),
    )
    .unwrap();

    let err = db.get("a").await.unwrap_err();
    assert_eq!(err.code(), "LEVEL_DATABASE_OPEN_FAILED");
    assert_eq!(db.status(), Status::Closed);

    // An explicit open with different options is still possible
    db.open_with(OpenOptions::new()).await.unwrap();
    assert_eq!(db.get("a").await.unwrap(), None);
}

#[tokio::test]
async fn close_before_any_open_is_a_no_op() {
    let db = TestDatabase::scripted(ScriptedEngine::new());
    db.close().await.unwrap();

    assert_eq!(db.status(), Status::Closed);
    assert_eq!(db.engine().unwrap().calls().closes, 0);
}

#[tokio::test]
async fn engine_options_reach_the_engine() {
    let db = Database::with_options(
        "opts",
        MemoryEngine::new(),
        DatabaseOptions::new().open_options(OpenOptions::new().compression(false)),
    )
    .unwrap();
    db.open().await.unwrap();
    assert_eq!(
        db.get_property("kvlayer.compression").unwrap(),
        Some("false".to_string())
    );
}

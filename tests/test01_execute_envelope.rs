use std::sync::{Arc, Mutex};

use tokio::runtime::Runtime;

use sql_session::prelude::*;
use sql_session::test_utils::{FakeDriver, Script};

fn session_over(driver: &FakeDriver) -> Session {
    Session::builder(Arc::new(driver.clone()))
        .connection_string("fake://db")
        .build()
        .unwrap()
}

fn capture(events: &EventHub) -> Arc<Mutex<Vec<SqlCall>>> {
    let seen: Arc<Mutex<Vec<SqlCall>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    events.subscribe(Arc::new(move |call: &SqlCall| {
        sink.lock().unwrap().push(call.clone());
    }));
    seen
}

#[test]
fn non_query_returns_rows_and_publishes_one_success_event() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        driver.script("UPDATE t SET x = 1", Script::rows(3));
        let mut session = session_over(&driver);
        let seen = capture(session.events());

        let rows = session
            .execute_non_query(|_| Command::text("UPDATE t SET x = 1"))
            .await
            .unwrap();

        assert_eq!(rows, 3);
        assert_eq!(driver.executed(), vec!["UPDATE t SET x = 1".to_string()]);
        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].text(), "UPDATE t SET x = 1");
        assert!(!calls[0].is_error());
    });
}

#[test]
fn scalar_returns_value_and_null_when_unscripted() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        driver.script("SELECT COUNT(*) FROM t", Script::scalar(SqlValue::Int(42)));
        let mut session = session_over(&driver);

        let count = session
            .execute_scalar(|_| Command::text("SELECT COUNT(*) FROM t"))
            .await
            .unwrap();
        assert_eq!(count, SqlValue::Int(42));

        let empty = session
            .execute_scalar(|_| Command::text("SELECT x FROM empty"))
            .await
            .unwrap();
        assert!(empty.is_null());
    });
}

#[test]
fn every_subscriber_sees_each_call_once() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        let mut session = session_over(&driver);
        let first = capture(session.events());
        let second = capture(session.events());

        session
            .execute_non_query(|_| Command::text("DELETE FROM t"))
            .await
            .unwrap();
        session
            .execute_scalar(|_| Command::text("SELECT 1"))
            .await
            .unwrap();

        assert_eq!(first.lock().unwrap().len(), 2);
        assert_eq!(second.lock().unwrap().len(), 2);
    });
}

#[test]
fn failure_is_classified_and_publishes_error_event_with_same_text() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        driver.fail_with("INSERT INTO t VALUES (1)", "1555", "duplicate key");
        let classifier = CodeTableClassifier::from_pairs([("1555", ErrorKind::Conflict)]);
        let mut session = Session::builder(Arc::new(driver.clone()))
            .connection_string("fake://db")
            .classifier(Arc::new(classifier))
            .build()
            .unwrap();
        let seen = capture(session.events());

        let err = session
            .execute_non_query(|_| Command::text("INSERT INTO t VALUES (1)"))
            .await
            .unwrap_err();

        let db = err.as_db().expect("expected a classified error");
        assert_eq!(db.kind, ErrorKind::Conflict);
        assert_eq!(db.code, "1555");
        assert_eq!(db.message, "duplicate key");
        assert!(!db.is_retryable());

        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_error());
        assert_eq!(calls[0].text(), "INSERT INTO t VALUES (1)");
    });
}

#[test]
fn after_call_hook_sees_output_parameters_on_success_only() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        driver.script(
            "proc_upsert",
            Script::rows(1).with_outputs(vec![Parameter::input("new_id", SqlValue::Int(7))]),
        );
        let mut session = session_over(&driver);

        let observed: Arc<Mutex<Option<SqlValue>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        session
            .execute_non_query_with(
                |_| Command::stored_procedure("proc_upsert").out_param("new_id"),
                move |command| {
                    *sink.lock().unwrap() = command.output("new_id").cloned();
                },
            )
            .await
            .unwrap();
        assert_eq!(*observed.lock().unwrap(), Some(SqlValue::Int(7)));

        // On failure the hook never runs.
        driver.fail_with("proc_fail", "5", "busy");
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        let result = session
            .execute_non_query_with(
                |_| Command::stored_procedure("proc_fail"),
                move |_| *flag.lock().unwrap() = true,
            )
            .await;
        assert!(result.is_err());
        assert!(!*ran.lock().unwrap());
    });
}

#[test]
fn command_factory_can_use_the_driver_parameter_prefix() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        let mut session = session_over(&driver);
        assert_eq!(session.driver_name(), "fake");

        session
            .execute_non_query(|s| {
                assert_eq!(s.parameter_prefix(), "@");
                Command::text("UPDATE t SET name = @name")
                    .param("name", SqlValue::Text("alice".into()))
            })
            .await
            .unwrap();
    });
}

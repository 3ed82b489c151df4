use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;

use sql_session::prelude::*;
use sql_session::test_utils::{FakeDriver, TxEvent};

fn session_over(driver: &FakeDriver) -> Session {
    Session::builder(Arc::new(driver.clone()))
        .connection_string("fake://db")
        .build()
        .unwrap()
}

#[test]
fn only_one_transaction_can_be_active() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        let mut session = session_over(&driver);

        let tx = session.begin_transaction().await.unwrap();
        assert!(session.transaction_active().await);

        let err = session.begin_transaction().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Usage(UsageError::TransactionActive)
        ));

        drop(tx);
    });
}

#[test]
fn commit_frees_the_slot_and_completes_the_handle() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        let mut session = session_over(&driver);

        let mut tx = session.begin_transaction().await.unwrap();
        assert!(!tx.is_completed());
        tx.commit().await.unwrap();
        assert!(tx.is_completed());
        assert!(!session.transaction_active().await);
        assert_eq!(driver.tx_log(), vec![TxEvent::Begin, TxEvent::Commit]);

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Usage(UsageError::TransactionCompleted)
        ));

        // A new transaction can start once the previous one completed.
        let tx2 = session.begin_transaction().await.unwrap();
        drop(tx2);
    });
}

#[test]
fn rollback_frees_the_slot_and_is_not_repeatable() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        let mut session = session_over(&driver);

        let mut tx = session.begin_transaction().await.unwrap();
        tx.rollback().await.unwrap();
        assert!(!session.transaction_active().await);
        assert_eq!(driver.tx_log(), vec![TxEvent::Begin, TxEvent::Rollback]);

        let err = tx.rollback().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Usage(UsageError::TransactionCompleted)
        ));
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Usage(UsageError::TransactionCompleted)
        ));
    });
}

#[test]
fn dropping_an_uncompleted_handle_rolls_back_exactly_once() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        let mut session = session_over(&driver);

        let tx = session.begin_transaction().await.unwrap();
        drop(tx);

        // The rollback runs on a spawned task; give it a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(driver.tx_log(), vec![TxEvent::Begin, TxEvent::Rollback]);
        assert!(!session.transaction_active().await);

        // And the session is usable again.
        let mut tx = session.begin_transaction().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(
            driver.tx_log(),
            vec![
                TxEvent::Begin,
                TxEvent::Rollback,
                TxEvent::Begin,
                TxEvent::Commit
            ]
        );
    });
}

#[test]
fn dropping_a_committed_handle_does_not_roll_back() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        let mut session = session_over(&driver);

        let mut tx = session.begin_transaction().await.unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(driver.tx_log(), vec![TxEvent::Begin, TxEvent::Commit]);
    });
}

#[test]
fn a_failed_commit_leaves_the_transaction_open_for_rollback() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        driver.fail_next_commit(DriverFailure::new("5", "database is locked"));
        let classifier = CodeTableClassifier::from_pairs([("5", ErrorKind::Unavailable)]);
        let mut session = Session::builder(Arc::new(driver.clone()))
            .connection_string("fake://db")
            .classifier(Arc::new(classifier))
            .build()
            .unwrap();

        let mut tx = session.begin_transaction().await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Unavailable));

        // The handle is not completed and the slot is still occupied.
        assert!(!tx.is_completed());
        assert!(session.transaction_active().await);

        // The caller can still resolve it explicitly.
        tx.rollback().await.unwrap();
        assert!(!session.transaction_active().await);
        assert_eq!(driver.tx_log(), vec![TxEvent::Begin, TxEvent::Rollback]);
    });
}

#[test]
fn a_failed_begin_surfaces_as_a_classified_error() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        driver.fail_next_begin(DriverFailure::new("5", "database is locked"));
        let classifier = CodeTableClassifier::from_pairs([("5", ErrorKind::Unavailable)]);
        let mut session = Session::builder(Arc::new(driver.clone()))
            .connection_string("fake://db")
            .classifier(Arc::new(classifier))
            .build()
            .unwrap();

        let err = session.begin_transaction().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Unavailable));
        assert!(!session.transaction_active().await);
        assert!(driver.tx_log().is_empty());

        // The failure was one-shot; the next begin succeeds.
        let mut tx = session.begin_transaction().await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(driver.tx_log(), vec![TxEvent::Begin, TxEvent::Commit]);
    });
}

#[test]
fn explicit_rollback_frees_the_slot_before_returning() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        let mut session = session_over(&driver);

        // No scheduling gap as with a dropped handle: the next begin can
        // follow immediately.
        let mut tx = session.begin_transaction().await.unwrap();
        tx.rollback().await.unwrap();
        let mut tx = session.begin_transaction().await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            driver.tx_log(),
            vec![
                TxEvent::Begin,
                TxEvent::Rollback,
                TxEvent::Begin,
                TxEvent::Commit
            ]
        );
    });
}

#[test]
fn commands_run_while_a_transaction_is_active() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        let mut session = session_over(&driver);

        let mut tx = session.begin_transaction().await.unwrap();
        session
            .execute_non_query(|_| Command::text("UPDATE t SET x = 1"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(driver.executed(), vec!["UPDATE t SET x = 1".to_string()]);
        assert_eq!(driver.tx_log(), vec![TxEvent::Begin, TxEvent::Commit]);
    });
}

#[test]
fn begin_respects_the_requested_isolation_level() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let driver = FakeDriver::new();
        let mut session = session_over(&driver);

        let mut tx = session
            .begin_transaction_with(IsolationLevel::Serializable)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(driver.tx_log(), vec![TxEvent::Begin, TxEvent::Commit]);
    });
}

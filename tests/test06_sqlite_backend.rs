#![cfg(feature = "sqlite")]

use std::sync::Arc;

use tokio::runtime::Runtime;

use sql_session::prelude::*;
use sql_session::sqlite::{SqliteDriver, sqlite_classifier};

fn sqlite_session() -> Session {
    Session::builder(Arc::new(SqliteDriver))
        .connection_string(":memory:")
        .classifier(Arc::new(sqlite_classifier()))
        .build()
        .unwrap()
}

async fn create_person_table(session: &mut Session) {
    session
        .execute_non_query(|_| {
            Command::text("CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        })
        .await
        .unwrap();
}

#[test]
fn insert_select_and_count_round_trip() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = sqlite_session();
        create_person_table(&mut session).await;

        let rows = session
            .execute_non_query(|_| {
                Command::text("INSERT INTO person (id, name) VALUES (:id, :name)")
                    .param("id", SqlValue::Int(1))
                    .param("name", SqlValue::Text("alice".into()))
            })
            .await
            .unwrap();
        assert_eq!(rows, 1);

        let count = session
            .execute_scalar(|_| Command::text("SELECT COUNT(*) FROM person"))
            .await
            .unwrap();
        assert_eq!(count, SqlValue::Int(1));

        let name = session
            .execute_reader(
                |_| {
                    Command::text("SELECT name FROM person WHERE id = :id")
                        .param("id", SqlValue::Int(1))
                },
                |set| {
                    set.rows[0]
                        .get("name")
                        .and_then(|v| v.as_text().map(str::to_owned))
                },
            )
            .await
            .unwrap();
        assert_eq!(name, Some("alice".to_string()));
    });
}

#[test]
fn duplicate_primary_key_classifies_as_conflict() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = sqlite_session();
        create_person_table(&mut session).await;

        let insert = |_: &Session| {
            Command::text("INSERT INTO person (id, name) VALUES (:id, :name)")
                .param("id", SqlValue::Int(1))
                .param("name", SqlValue::Text("alice".into()))
        };
        session.execute_non_query(insert).await.unwrap();
        let err = session.execute_non_query(insert).await.unwrap_err();

        let db = err.as_db().expect("expected a classified error");
        assert_eq!(db.kind, ErrorKind::Conflict);
        assert_eq!(db.code, "1555");
    });
}

#[test]
fn committed_work_is_visible_and_rolled_back_work_is_not() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = sqlite_session();
        create_person_table(&mut session).await;

        let mut tx = session.begin_transaction().await.unwrap();
        session
            .execute_non_query(|_| {
                Command::text("INSERT INTO person (id, name) VALUES (1, 'alice')")
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = session.begin_transaction().await.unwrap();
        session
            .execute_non_query(|_| Command::text("INSERT INTO person (id, name) VALUES (2, 'bob')"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let count = session
            .execute_scalar(|_| Command::text("SELECT COUNT(*) FROM person"))
            .await
            .unwrap();
        assert_eq!(count, SqlValue::Int(1));
    });
}

#[test]
fn scalar_on_an_empty_result_is_null() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = sqlite_session();
        create_person_table(&mut session).await;

        let value = session
            .execute_scalar(|_| Command::text("SELECT name FROM person WHERE id = 99"))
            .await
            .unwrap();
        assert!(value.is_null());
    });
}

#[test]
fn value_types_survive_a_round_trip() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = sqlite_session();
        session
            .execute_non_query(|_| {
                Command::text("CREATE TABLE blobs (id INTEGER PRIMARY KEY, body BLOB, score REAL)")
            })
            .await
            .unwrap();

        session
            .execute_non_query(|_| {
                Command::text("INSERT INTO blobs (id, body, score) VALUES (:id, :body, :score)")
                    .param("id", SqlValue::Int(1))
                    .param("body", SqlValue::Blob(vec![1, 2, 3]))
                    .param("score", SqlValue::Float(0.5))
            })
            .await
            .unwrap();

        let (body, score) = session
            .execute_reader(
                |_| Command::text("SELECT body, score FROM blobs WHERE id = 1"),
                |set| {
                    let row = &set.rows[0];
                    (
                        row.get("body").and_then(|v| v.as_blob().map(<[u8]>::to_vec)),
                        row.get("score").and_then(SqlValue::as_float),
                    )
                },
            )
            .await
            .unwrap();
        assert_eq!(body, Some(vec![1, 2, 3]));
        assert_eq!(score, Some(0.5));
    });
}

#[test]
fn a_file_backed_database_persists_across_sessions() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.db").to_string_lossy().into_owned();

        let mut writer = Session::builder(Arc::new(SqliteDriver))
            .connection_string(path.clone())
            .classifier(Arc::new(sqlite_classifier()))
            .build()
            .unwrap();
        create_person_table(&mut writer).await;
        writer
            .execute_non_query(|_| {
                Command::text("INSERT INTO person (id, name) VALUES (1, 'alice')")
            })
            .await
            .unwrap();
        writer.close().await;

        let mut reader = Session::builder(Arc::new(SqliteDriver))
            .connection_string(path)
            .classifier(Arc::new(sqlite_classifier()))
            .build()
            .unwrap();
        let count = reader
            .execute_scalar(|_| Command::text("SELECT COUNT(*) FROM person"))
            .await
            .unwrap();
        assert_eq!(count, SqlValue::Int(1));
    });
}

#[test]
fn stored_procedures_are_rejected() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut session = sqlite_session();

        let err = session
            .execute_non_query(|_| Command::stored_procedure("proc_anything"))
            .await
            .unwrap_err();
        // No native code, so the table classifier falls through.
        assert_eq!(err.kind(), Some(ErrorKind::Unexpected));
    });
}

//! PostgreSQL integration tests
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p dbaction-pg -- --ignored
//!
//! Each test creates its own table so tests can run in parallel.

use std::sync::{Arc, Mutex};

use dbaction_pg::{
    chain, execute, flatten, pure, query, query_with, sequence, Action, Conn, PgAction,
    PgArguments, PgConfig, PgConn, PgRow, PgTransactor, Pure, Stage, Transactor,
};
use sqlx::{Arguments, Row};

type Stash = Arc<Mutex<Option<Conn<PgConn>>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn transactor() -> PgTransactor {
    init_tracing();
    let config = PgConfig::from_env().expect("invalid environment");
    PgTransactor::connect(&config)
        .await
        .expect("failed to connect to DATABASE_URL")
}

/// Scratch table with an integer primary key, dropped by `drop_in`.
struct Table(String);

impl Table {
    async fn create_in(tr: &PgTransactor) -> Self {
        let name = format!("dbaction_{}", uuid::Uuid::new_v4().simple());
        execute(format!("CREATE TABLE {name} (bar INTEGER PRIMARY KEY)"))
            .run(tr)
            .await
            .expect("create table failed");
        Self(name)
    }

    fn count(&self) -> PgAction<i64> {
        query(format!("SELECT COUNT(*) AS num FROM {}", self.0)).try_map(num)
    }

    fn insert(&self, keys: &[i32]) -> PgAction<u64> {
        let values: Vec<String> = keys.iter().map(|k| format!("({k})")).collect();
        execute(format!("INSERT INTO {} (bar) VALUES {}", self.0, values.join(", ")))
    }

    async fn drop_in(self, tr: &PgTransactor) {
        execute(format!("DROP TABLE IF EXISTS {}", self.0))
            .transact(tr)
            .await
            .expect("drop table failed");
    }
}

fn num(rows: Vec<PgRow>) -> Result<i64, sqlx::Error> {
    rows.first().ok_or(sqlx::Error::RowNotFound)?.try_get("num")
}

fn select(n: i64) -> PgAction<i64> {
    query(format!("SELECT {n}::int8 AS num")).try_map(num)
}

fn increment(n: i64) -> PgAction<i64> {
    let mut args = PgArguments::default();
    args.add(n).expect("bind failed");
    query_with("SELECT $1 + 1 AS num", args).try_map(num)
}

/// Action that keeps a copy of its connection handle in `stash`.
fn keep_handle(stash: Stash) -> PgAction<()> {
    Action::new(move |conn: Conn<PgConn>| async move {
        *stash.lock().unwrap() = Some(conn);
        Ok(())
    })
}

#[tokio::test]
#[ignore = "requires database"]
async fn run_a_query() {
    let tr = transactor().await;
    assert_eq!(select(42).run(&tr).await.unwrap(), 42);
    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn transact_a_query() {
    let tr = transactor().await;
    assert_eq!(select(43).transact(&tr).await.unwrap(), 43);
    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn flat_map_binds_previous_result() {
    let tr = transactor().await;
    let res = select(44).flat_map(increment).run(&tr).await.unwrap();
    assert_eq!(res, 45);
    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn transaction_sees_its_own_inserts() {
    let tr = transactor().await;
    let table = Table::create_in(&tr).await;

    let count = table.count();
    let res = chain!(table.insert(&[1, 2, 3]), move |_| count)
        .transact(&tr)
        .await
        .unwrap();
    assert_eq!(res, 3);

    table.drop_in(&tr).await;
    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn failed_transaction_rolls_back() {
    let tr = transactor().await;
    let table = Table::create_in(&tr).await;
    table.insert(&[1]).transact(&tr).await.unwrap();

    let duplicate = table.insert(&[3]);
    let err = table
        .insert(&[2, 3])
        .flat_map(move |_| duplicate)
        .transact(&tr)
        .await
        .unwrap_err();

    assert!(err.is_execution());
    let db_err = err
        .downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .expect("expected a database error");
    assert!(db_err.is_unique_violation());

    assert_eq!(table.count().run(&tr).await.unwrap(), 1);

    table.drop_in(&tr).await;
    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn failing_transform_rejects_run() {
    let tr = transactor().await;
    let table = Table::create_in(&tr).await;

    let err = table
        .count()
        .try_map(|_| Err::<i64, _>(anyhow::anyhow!("error message")))
        .run(&tr)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "action failed: error message");

    table.drop_in(&tr).await;
    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn pure_wraps_values_and_futures() {
    let tr = transactor().await;

    assert_eq!(pure::<PgConn, _>(Pure::Value(42)).run(&tr).await.unwrap(), 42);
    assert_eq!(
        pure::<PgConn, _>(Pure::future(async { Ok(43) })).run(&tr).await.unwrap(),
        43
    );
    assert_eq!(
        pure::<PgConn, _>(Pure::thunk(|| async { Ok(44) })).run(&tr).await.unwrap(),
        44
    );

    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn flatten_collects_results() {
    let tr = transactor().await;
    let res = flatten(vec![select(1), select(2), select(3)])
        .map(|items| items.into_iter().sum::<i64>())
        .run(&tr)
        .await
        .unwrap();
    assert_eq!(res, 6);
    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn chain_passes_results_along() {
    let tr = transactor().await;

    assert_eq!(chain!(select(1)).run(&tr).await.unwrap(), 1);

    let res = chain!(select(4), increment, increment)
        .run(&tr)
        .await
        .unwrap();
    assert_eq!(res, 6);

    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn sequence_shares_one_connection() {
    let tr = transactor().await;

    let (one,) = sequence((select(1),)).run(&tr).await.unwrap();
    assert_eq!(one, 1);

    let res = sequence((select(5), select(6), select(7)))
        .transact(&tr)
        .await
        .unwrap();
    assert_eq!(res, (5, 6, 7));

    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn concurrent_runs_each_get_a_connection() {
    let tr = transactor().await;

    let handles: Vec<_> = (0..10_i64)
        .map(|i| {
            let tr = tr.clone();
            tokio::spawn(async move { select(i).flat_map(increment).run(&tr).await })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let res = handle.await.expect("task panicked").unwrap();
        assert_eq!(res, i as i64 + 1);
    }

    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn leaked_handle_fails_transaction_release() {
    let tr = transactor().await;
    let table = Table::create_in(&tr).await;
    let stash = Stash::default();

    let keep = keep_handle(stash.clone());
    let err = table
        .insert(&[1])
        .flat_map(move |_| keep)
        .transact(&tr)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Release));
    assert!(err.superseded().is_none());

    let leaked = stash.lock().unwrap().take().expect("handle was not stashed");
    assert!(leaked.lock().await.in_transaction());
    assert_eq!(table.count().run(&tr).await.unwrap(), 0);

    // Dropping the last handle abandons the transaction.
    drop(leaked);
    assert_eq!(table.count().run(&tr).await.unwrap(), 0);

    table.drop_in(&tr).await;
    tr.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn leaked_handle_defers_plain_release() {
    let tr = transactor().await;
    let table = Table::create_in(&tr).await;
    let stash = Stash::default();

    let keep = keep_handle(stash.clone());
    table
        .insert(&[1])
        .flat_map(move |_| keep)
        .run(&tr)
        .await
        .unwrap();

    // The connection stays usable through the stashed handle.
    let leaked = stash.lock().unwrap().take().expect("handle was not stashed");
    assert!(!leaked.lock().await.in_transaction());
    let inserted = table.insert(&[2]).execute(leaked.clone()).await.unwrap();
    assert_eq!(inserted, 1);

    drop(leaked);
    assert_eq!(table.count().run(&tr).await.unwrap(), 2);

    table.drop_in(&tr).await;
    tr.close().await.unwrap();
}

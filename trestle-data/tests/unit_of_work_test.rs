//! Unit of work transaction and lifecycle behaviour.

mod common;

use common::{Customer, Order};
use std::sync::Arc;
use trestle_data::prelude::*;

fn server() -> MemoryServer {
    let server = MemoryServer::new();
    server.create_database("db").unwrap();
    server
}

#[tokio::test]
async fn test_commit_without_begin_is_implicit() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();
    assert_eq!(uow.state(), TransactionState::Idle);

    uow.repository::<Order>()
        .unwrap()
        .save(Order::new("A-1"))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    assert_eq!(uow.state(), TransactionState::Committed);
    assert_eq!(pool.database().count::<Order>(), 1);
    assert_eq!(pool.database().commit_count(), 1);
}

#[tokio::test]
async fn test_failed_commit_leaves_no_partial_writes() {
    let server = server();
    let pool = server.connect("db").unwrap();

    let mut setup = pool.unit_of_work(CancellationToken::new()).unwrap();
    let existing = setup
        .repository::<Order>()
        .unwrap()
        .save(Order::new("A-1"))
        .await
        .unwrap();
    setup.commit().await.unwrap();

    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();
    let orders = uow.repository::<Order>().unwrap();
    let customers = uow.repository::<Customer>().unwrap();

    customers.save(Customer::new("c@example.com")).await.unwrap();
    orders.save(Order::new("A-2")).await.unwrap();
    // duplicate id forces the commit to fail after other tables were touched
    let mut duplicate = Order::new("A-3");
    duplicate.id = existing.id;
    orders.save(duplicate).await.unwrap();

    let err = uow.commit().await.unwrap_err();
    assert!(matches!(err, DataError::Conflict(_)));
    assert_eq!(uow.state(), TransactionState::RolledBack);
    assert_eq!(uow.session().pending_changes(), 0);

    let db = pool.database();
    assert_eq!(db.count::<Order>(), 1);
    assert_eq!(db.count::<Customer>(), 0);
    assert_eq!(db.rows::<Order>()[0].number, "A-1");
}

#[tokio::test]
async fn test_commit_spans_repositories() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();

    uow.repository::<Order>().unwrap().save(Order::new("A-1")).await.unwrap();
    uow.repository::<Customer>()
        .unwrap()
        .save(Customer::new("c@example.com"))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    assert_eq!(pool.database().count::<Order>(), 1);
    assert_eq!(pool.database().count::<Customer>(), 1);
    assert_eq!(pool.database().commit_count(), 1);
}

#[tokio::test]
async fn test_begin_while_active_is_an_error() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();

    uow.begin_transaction(Some(IsolationLevel::Serializable)).await.unwrap();
    assert_eq!(
        uow.state(),
        TransactionState::InTransaction(IsolationLevel::Serializable)
    );
    assert_eq!(uow.session().isolation(), Some(IsolationLevel::Serializable));

    let err = uow.begin_transaction(None).await.unwrap_err();
    assert!(matches!(err, DataError::TransactionActive));
}

#[tokio::test]
async fn test_default_isolation_is_read_committed() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();

    uow.begin_transaction(None).await.unwrap();
    assert_eq!(
        uow.state(),
        TransactionState::InTransaction(IsolationLevel::ReadCommitted)
    );
}

#[tokio::test]
async fn test_rollback_discards_and_is_safe_when_idle() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();

    uow.rollback().await.unwrap();
    assert_eq!(uow.state(), TransactionState::Idle);

    uow.begin_transaction(None).await.unwrap();
    uow.repository::<Order>().unwrap().save(Order::new("A-1")).await.unwrap();
    uow.rollback().await.unwrap();

    assert_eq!(uow.state(), TransactionState::RolledBack);
    assert_eq!(uow.session().pending_changes(), 0);
    assert_eq!(pool.database().count::<Order>(), 0);
}

#[tokio::test]
async fn test_reusable_across_transaction_cycles() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();
    let orders = uow.repository::<Order>().unwrap();

    orders.save(Order::new("A-1")).await.unwrap();
    uow.commit().await.unwrap();

    uow.begin_transaction(None).await.unwrap();
    orders.save(Order::new("A-2")).await.unwrap();
    uow.rollback().await.unwrap();

    orders.save(Order::new("A-3")).await.unwrap();
    uow.commit().await.unwrap();

    let numbers: Vec<String> = pool
        .database()
        .rows::<Order>()
        .into_iter()
        .map(|o| o.number)
        .collect();
    assert_eq!(numbers, vec!["A-1", "A-3"]);
}

#[tokio::test]
async fn test_in_transaction_commits_on_success() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();

    let saved = uow
        .in_transaction(None, |uow| {
            Box::pin(async move {
                let orders = uow.repository::<Order>()?;
                orders.save(Order::new("A-1")).await
            })
        })
        .await
        .unwrap();

    assert_eq!(saved.id, 1);
    assert_eq!(uow.state(), TransactionState::Committed);
    assert_eq!(pool.database().count::<Order>(), 1);
}

#[derive(Debug)]
enum ServiceError {
    Data(DataError),
    Rejected,
}

impl From<DataError> for ServiceError {
    fn from(err: DataError) -> Self {
        ServiceError::Data(err)
    }
}

#[tokio::test]
async fn test_in_transaction_rolls_back_on_error() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();

    let result: Result<(), ServiceError> = uow
        .in_transaction(None, |uow| {
            Box::pin(async move {
                uow.repository::<Order>()?.save(Order::new("A-1")).await?;
                Err::<(), _>(ServiceError::Rejected)
            })
        })
        .await;

    assert!(matches!(result, Err(ServiceError::Rejected)));
    assert_eq!(uow.state(), TransactionState::RolledBack);
    assert_eq!(uow.session().pending_changes(), 0);
    assert_eq!(pool.database().count::<Order>(), 0);

    // the transaction was closed, so a new one can start
    uow.begin_transaction(None).await.unwrap();
}

#[tokio::test]
async fn test_in_transaction_propagates_commit_failure() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();

    let result: Result<(), ServiceError> = uow
        .in_transaction(None, |uow| {
            Box::pin(async move {
                let mut ghost = Order::new("ghost");
                ghost.id = 9;
                uow.repository::<Order>()?.update(ghost).await?;
                Ok::<(), ServiceError>(())
            })
        })
        .await;

    assert!(matches!(
        result,
        Err(ServiceError::Data(DataError::Missing(_)))
    ));
    assert_eq!(uow.state(), TransactionState::RolledBack);
}

#[tokio::test]
async fn test_cancellation_mid_transaction_rolls_back() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let token = CancellationToken::new();
    let mut uow = pool.unit_of_work(token.clone()).unwrap();

    let result: Result<(), DataError> = uow
        .in_transaction(None, move |uow| {
            Box::pin(async move {
                uow.repository::<Order>()?.save(Order::new("A-1")).await?;
                token.cancel();
                std::future::pending::<()>().await;
                Ok::<(), DataError>(())
            })
        })
        .await;

    assert!(matches!(result, Err(DataError::Cancelled)));
    assert_eq!(uow.state(), TransactionState::RolledBack);
    assert_eq!(uow.session().pending_changes(), 0);
    assert_eq!(pool.database().count::<Order>(), 0);
}

#[tokio::test]
async fn test_cancelled_commit_writes_nothing() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let token = CancellationToken::new();
    let mut uow = pool.unit_of_work(token.clone()).unwrap();

    uow.repository::<Order>().unwrap().save(Order::new("A-1")).await.unwrap();
    token.cancel();

    let err = uow.commit().await.unwrap_err();
    assert!(matches!(err, DataError::Cancelled));
    assert_eq!(uow.session().pending_changes(), 0);
    assert_eq!(pool.database().count::<Order>(), 0);
}

#[tokio::test]
async fn test_close_twice_releases_once() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let db = pool.database().clone();

    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();
    assert_eq!(db.active_connections(), 1);

    uow.close().await.unwrap();
    uow.close().await.unwrap();
    assert!(uow.is_closed());
    assert_eq!(uow.state(), TransactionState::Disposed);
    assert_eq!(db.released_connections(), 1);

    drop(uow);
    assert_eq!(db.opened_connections(), 1);
    assert_eq!(db.released_connections(), 1);
    assert_eq!(db.active_connections(), 0);
}

#[tokio::test]
async fn test_repository_after_close_is_disposed() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();
    let orders = uow.repository::<Order>().unwrap();

    uow.close().await.unwrap();

    assert!(matches!(uow.repository::<Order>(), Err(DataError::Disposed)));
    assert!(matches!(
        orders.save(Order::new("late")).await,
        Err(DataError::Disposed)
    ));
    assert!(matches!(uow.commit().await, Err(DataError::Disposed)));
}

#[tokio::test]
async fn test_close_discards_uncommitted_changes() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();

    uow.repository::<Order>().unwrap().save(Order::new("A-1")).await.unwrap();
    uow.close().await.unwrap();

    assert_eq!(pool.database().count::<Order>(), 0);
}

#[tokio::test]
async fn test_drop_releases_connection() {
    let server = server();
    let pool = server.connect("db").unwrap();
    let db = pool.database().clone();

    {
        let mut uow = pool.unit_of_work(CancellationToken::new()).unwrap();
        uow.begin_transaction(None).await.unwrap();
        uow.repository::<Order>().unwrap().save(Order::new("A-1")).await.unwrap();
    }

    assert_eq!(db.active_connections(), 0);
    assert_eq!(db.count::<Order>(), 0);
}

#[tokio::test]
async fn test_units_of_work_on_separate_tasks() {
    let server = server();
    let pool = Arc::new(server.connect("db").unwrap());

    let mut tasks = Vec::new();
    for n in 0..8 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let mut uow = pool.unit_of_work(CancellationToken::new())?;
            uow.repository::<Order>()?
                .save(Order::new(format!("T-{n}")))
                .await?;
            uow.commit().await?;
            uow.close().await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(pool.database().count::<Order>(), 8);
    assert_eq!(pool.database().active_connections(), 0);
}

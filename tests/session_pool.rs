mod common;

use std::time::Duration;

use common::*;
use spanner_core::{
    Error, ReleaseOutcome, SessionKind, SessionPool, SessionPoolConfig, TimestampBound,
};
use tonic::{Code, Status};

fn new_pool(fake: &FakeSpanner, config: SessionPoolConfig) -> SessionPool {
    SessionPool::new(DATABASE, Box::new(fake.clone()), config)
}

#[tokio::test]
async fn test_fill() {
    let fake = FakeSpanner::new();
    let pool = new_pool(&fake, pool_config(3, 10));
    pool.fill().await.unwrap();

    let status = pool.status();
    assert_eq!(status.idle_read, 3);
    assert_eq!(status.size(), 3);
    assert_eq!(fake.created_sessions(), 3);

    // already full
    pool.fill().await.unwrap();
    assert_eq!(fake.created_sessions(), 3);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_fill_over_several_requests() {
    let fake = FakeSpanner::new();
    fake.limit_batches(2);
    let pool = new_pool(&fake, pool_config(5, 10));
    pool.fill().await.unwrap();

    assert_eq!(pool.status().idle_read, 5);
    let counts = fake
        .calls_to(Rpc::BatchCreateSessions)
        .into_iter()
        .map(|call| match call {
            Call::BatchCreateSessions { count } => count,
            _ => unreachable!(),
        })
        .collect::<Vec<_>>();
    assert_eq!(counts, vec![5, 3, 1]);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_grows_in_batches() {
    let fake = FakeSpanner::new();
    let config = SessionPoolConfig::builder()
        .min(0)
        .max(10)
        .inc_step(2)
        .build()
        .unwrap();
    let pool = new_pool(&fake, config);

    let sessions = futures::future::join_all((0..3).map(|_| pool.acquire_read(None))).await;
    let sessions = sessions
        .into_iter()
        .collect::<Result<Vec<_>, Error>>()
        .unwrap();

    // ceil(3 / 2) * 2
    assert_eq!(fake.created_sessions(), 4);
    let status = pool.status();
    assert_eq!(status.leased, 3);
    assert_eq!(status.idle_read, 1);

    for session in sessions {
        pool.release(session, ReleaseOutcome::Reusable);
    }
    assert_eq!(pool.status().idle_read, 4);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_growth_is_capped_by_max() {
    let fake = FakeSpanner::new();
    let config = SessionPoolConfig::builder()
        .min(0)
        .max(2)
        .inc_step(5)
        .build()
        .unwrap();
    let pool = new_pool(&fake, config);

    let session = pool.acquire_read(None).await.unwrap();
    assert_eq!(fake.created_sessions(), 2);
    assert_eq!(pool.status().size(), 2);

    pool.release(session, ReleaseOutcome::Reusable);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_most_recently_released_first() {
    let fake = FakeSpanner::new();
    let pool = new_pool(&fake, pool_config(2, 2));
    pool.fill().await.unwrap();

    let first = pool.acquire_read(None).await.unwrap();
    let second = pool.acquire_read(None).await.unwrap();
    let second_name = second.name().to_string();
    pool.release(first, ReleaseOutcome::Reusable);
    pool.release(second, ReleaseOutcome::Reusable);

    let session = pool.acquire_read(None).await.unwrap();
    assert_eq!(session.name(), second_name);
    pool.release(session, ReleaseOutcome::Reusable);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_waiters_are_served_on_release() {
    let fake = FakeSpanner::new();
    let pool = new_pool(&fake, pool_config(1, 1));
    pool.fill().await.unwrap();

    let session = pool.acquire_read(None).await.unwrap();
    let name = session.name().to_string();
    let waiting = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire_read(None).await }
    });
    eventually(|| pool.status().waiters == 1).await;

    pool.release(session, ReleaseOutcome::Reusable);
    let session = waiting.await.unwrap().unwrap();
    assert_eq!(session.name(), name);
    assert_eq!(pool.status().leased, 1);
    assert_eq!(fake.created_sessions(), 1);

    pool.release(session, ReleaseOutcome::Reusable);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_fail_fast() {
    let fake = FakeSpanner::new();
    let config = SessionPoolConfig::builder()
        .min(1)
        .max(1)
        .fail(true)
        .build()
        .unwrap();
    let pool = new_pool(&fake, config);
    pool.fill().await.unwrap();

    let session = pool.acquire_read(None).await.unwrap();
    match pool.acquire_read(None).await {
        Err(Error::SessionPoolExhausted { context }) => {
            assert!(context.contains("leased: 1"));
            assert!(context.contains(session.name()));
        }
        other => panic!("unexpected result: {:?}", other.map(|s| s.name().to_string())),
    }

    pool.release(session, ReleaseOutcome::Reusable);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_acquire_timeout() {
    let fake = FakeSpanner::new();
    let config = SessionPoolConfig::builder()
        .min(1)
        .max(1)
        .acquire_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let pool = new_pool(&fake, config);
    pool.fill().await.unwrap();

    let session = pool.acquire_read(None).await.unwrap();
    let err = pool.acquire_write(None).await.unwrap_err();
    assert_eq!(err.code(), Some(Code::DeadlineExceeded));
    // the timed out waiter is gone
    assert_eq!(pool.status().waiters, 0);

    pool.release(session, ReleaseOutcome::Reusable);
    assert_eq!(pool.status().idle_read, 1);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_not_found_sessions_are_replaced() {
    let fake = FakeSpanner::new();
    let pool = new_pool(&fake, pool_config(2, 2));
    pool.fill().await.unwrap();

    let session = pool.acquire_read(None).await.unwrap();
    let gone = session.name().to_string();
    fake.forget_session(&gone);
    pool.release(session, ReleaseOutcome::NotFound);

    eventually(|| pool.status().idle_read == 2).await;
    assert_eq!(pool.status().size(), 2);
    assert_eq!(fake.created_sessions(), 3);

    let first = pool.acquire_read(None).await.unwrap();
    let second = pool.acquire_read(None).await.unwrap();
    assert_ne!(first.name(), gone);
    assert_ne!(second.name(), gone);

    pool.release(first, ReleaseOutcome::Reusable);
    pool.release(second, ReleaseOutcome::Reusable);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_creation_failure_reaches_waiters() {
    let fake = FakeSpanner::new();
    fake.fail(Rpc::BatchCreateSessions, Status::unavailable("try again"));
    let pool = new_pool(&fake, pool_config(0, 2));

    let err = pool.acquire_read(None).await.unwrap_err();
    assert_eq!(err.code(), Some(Code::Unavailable));
    assert_eq!(pool.status().pending, 0);

    // the next acquisition creates a session
    let session = pool.acquire_read(None).await.unwrap();
    pool.release(session, ReleaseOutcome::Reusable);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_write_sessions_are_prepared() {
    let fake = FakeSpanner::new();
    let config = SessionPoolConfig::builder()
        .min(4)
        .max(4)
        .write_sessions(0.5)
        .build()
        .unwrap();
    let pool = new_pool(&fake, config);
    pool.fill().await.unwrap();

    let status = pool.status();
    assert_eq!(status.idle_read, 2);
    assert_eq!(status.idle_write, 2);
    assert_eq!(status.prepared, 2);
    assert_eq!(fake.calls_to(Rpc::BeginTransaction).len(), 2);

    let session = pool.acquire_write(None).await.unwrap();
    assert_eq!(session.kind(), SessionKind::ReadWrite);
    pool.release(session, ReleaseOutcome::Reusable);
    // its prepared transaction was not used
    assert_eq!(pool.status().prepared, 2);
    assert_eq!(fake.calls_to(Rpc::BeginTransaction).len(), 2);
    pool.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_evict_idle() {
    let fake = FakeSpanner::new();
    let config = SessionPoolConfig::builder()
        .min(1)
        .max(3)
        .inc_step(1)
        .max_idle(Duration::from_secs(10 * 60))
        .build()
        .unwrap();
    let pool = new_pool(&fake, config);
    pool.fill().await.unwrap();

    let mut sessions = Vec::new();
    for _ in 0..3 {
        sessions.push(pool.acquire_read(None).await.unwrap());
    }
    for session in sessions {
        pool.release(session, ReleaseOutcome::Reusable);
    }
    assert_eq!(pool.status().idle_read, 3);

    tokio::time::advance(Duration::from_secs(11 * 60)).await;
    pool.evict_idle().await;

    assert_eq!(pool.status().size(), 1);
    eventually(|| fake.live_sessions() == 1).await;
    assert_eq!(fake.deleted_sessions().len(), 2);
    pool.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_ping_idle() {
    let fake = FakeSpanner::new();
    let config = SessionPoolConfig::builder()
        .min(1)
        .max(1)
        .keep_alive(Duration::from_secs(5 * 60))
        .build()
        .unwrap();
    let pool = new_pool(&fake, config);
    pool.fill().await.unwrap();

    tokio::time::advance(Duration::from_secs(6 * 60)).await;
    pool.ping_idle().await;

    let pings = fake
        .calls_to(Rpc::ExecuteSql)
        .into_iter()
        .filter(|call| matches!(call, Call::ExecuteSql { sql, tx: Tx::SingleUse, .. } if sql == "SELECT 1"))
        .count();
    assert!(pings >= 1);
    assert_eq!(pool.status().idle_read, 1);
    assert_eq!(fake.created_sessions(), 1);
    pool.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_ping_replaces_lost_sessions() {
    let fake = FakeSpanner::new();
    let config = SessionPoolConfig::builder()
        .min(1)
        .max(1)
        .keep_alive(Duration::from_secs(5 * 60))
        .build()
        .unwrap();
    let pool = new_pool(&fake, config);
    pool.fill().await.unwrap();
    fake.forget_sessions();

    tokio::time::advance(Duration::from_secs(6 * 60)).await;
    pool.ping_idle().await;

    eventually(|| pool.status().idle_read == 1).await;
    assert_eq!(fake.created_sessions(), 2);
    assert_eq!(fake.live_sessions(), 1);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_close() {
    let fake = FakeSpanner::new();
    let pool = new_pool(&fake, pool_config(2, 2));
    pool.fill().await.unwrap();

    let session = pool.acquire_read(None).await.unwrap();
    match pool.close().await {
        Err(Error::SessionLeak(leaks)) => {
            assert_eq!(leaks.len(), 1);
            assert!(leaks[0].contains(session.name()));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(fake.deleted_sessions().len(), 1);
    assert!(matches!(pool.acquire_read(None).await, Err(Error::PoolClosed)));

    // released after close: deleted
    pool.release(session, ReleaseOutcome::Reusable);
    eventually(|| fake.live_sessions() == 0).await;
}

#[tokio::test]
async fn test_client_pool_limits() {
    let fake = FakeSpanner::new();
    let client = new_client(&fake, pool_config(2, 4)).await;
    assert_eq!(client.pool_status().idle_read, 2);

    let mut snapshots = Vec::new();
    for _ in 0..4 {
        snapshots.push(client.snapshot(TimestampBound::Strong).await.unwrap());
    }
    assert_eq!(client.pool_status().size(), 4);
    assert_eq!(fake.created_sessions(), 4);

    let fifth = tokio::time::timeout(
        Duration::from_millis(100),
        client.snapshot(TimestampBound::Strong),
    )
    .await;
    assert!(fifth.is_err());

    let waiting = tokio::spawn({
        let client = client.clone();
        async move { client.snapshot(TimestampBound::Strong).await }
    });
    if let Some(mut snapshot) = snapshots.pop() {
        snapshot.end();
    }
    snapshots.push(waiting.await.unwrap().unwrap());
    assert_eq!(client.pool_status().size(), 4);
    assert_eq!(fake.created_sessions(), 4);

    for mut snapshot in snapshots {
        snapshot.end();
    }
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_waiters_survive_a_failed_batch() {
    let fake = FakeSpanner::new();
    fake.fail(Rpc::BatchCreateSessions, Status::unavailable("try again"));
    let config = SessionPoolConfig::builder()
        .min(0)
        .max(3)
        .inc_step(1)
        .concurrency(1)
        .build()
        .unwrap();
    let pool = new_pool(&fake, config);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let mut results =
        futures::future::join_all((0..3).map(|_| pool.acquire_read(Some(deadline)))).await;

    // only the waiter the failed batch was created for sees the error
    match results.remove(0) {
        Err(err) => assert_eq!(err.code(), Some(Code::Unavailable)),
        Ok(_) => panic!("the first acquire should have failed"),
    }
    let sessions = results
        .into_iter()
        .collect::<Result<Vec<_>, Error>>()
        .unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(fake.calls_to(Rpc::BatchCreateSessions).len(), 3);
    assert_eq!(pool.status().waiters, 0);

    for session in sessions {
        pool.release(session, ReleaseOutcome::Reusable);
    }
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_read_lease_consumes_prepared_transaction() {
    let fake = FakeSpanner::new();
    let config = SessionPoolConfig::builder()
        .min(1)
        .max(1)
        .write_sessions(1.0)
        .build()
        .unwrap();
    let pool = new_pool(&fake, config);
    pool.fill().await.unwrap();
    assert_eq!(pool.status().prepared, 1);

    let session = pool.acquire_read(None).await.unwrap();
    assert_eq!(session.kind(), SessionKind::ReadWrite);
    assert_eq!(pool.status().prepared, 0);

    // the transaction begun for writes is gone, a new one is prepared on release
    pool.release(session, ReleaseOutcome::Reusable);
    eventually(|| pool.status().prepared == 1).await;
    assert_eq!(fake.calls_to(Rpc::BeginTransaction).len(), 2);
    pool.close().await.unwrap();
}

use std::time::SystemTime;

use futures::future::BoxFuture;
use log::{debug, info, warn};
use tokio::time::{Duration, Instant};
use tonic::Code;

use crate::client::Database;
use crate::transaction::PartitionedDml;
use crate::{Error, ReadWriteTransaction, RetryConfig, Statement, TransactionOptions};

const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Sends a unary request, resending it as-is while it fails with `UNAVAILABLE`.
pub(crate) async fn retry_rpc<T, F>(retry: &RetryConfig, mut call: F) -> Result<T, Error>
where
    F: FnMut() -> BoxFuture<'static, Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(err)
                if err.code() == Some(Code::Unavailable) && attempt + 1 < retry.max_rpc_attempts =>
            {
                let delay = retry.backoff(attempt as u32);
                attempt += 1;
                warn!("retrying request in {:?} (attempt {}): {}", delay, attempt, err);
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

/// Decides whether a failed attempt is retried, and waits before the retry.
struct Retrier<'a> {
    retry: &'a RetryConfig,
    deadline: Instant,
    aborted: u32,
}

impl Retrier<'_> {
    async fn on_error(&mut self, err: Error) -> Result<(), Error> {
        let lost = err.is_session_not_found();
        if !lost && !err.is_aborted() {
            return Err(err);
        }
        if Instant::now() >= self.deadline {
            return Err(Error::deadline(
                "transaction did not complete before its deadline",
                Some(err),
            ));
        }
        if lost {
            debug!("session was lost, retrying on a new session: {}", err);
            return Ok(());
        }
        let delay = err
            .retry_delay()
            .unwrap_or_else(|| self.retry.backoff(self.aborted));
        self.aborted += 1;
        if Instant::now() + delay >= self.deadline {
            return Err(Error::deadline(
                "transaction did not complete before its deadline",
                Some(err),
            ));
        }
        info!(
            "transaction aborted, retrying in {:?} (attempt {})",
            delay, self.aborted
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// Runs units of work in read-write transactions, retrying them when they abort.
///
/// Obtained through [`Client::read_write()`](crate::Client::read_write).
pub struct TransactionRunner {
    database: Database,
    options: TransactionOptions,
}

impl TransactionRunner {
    pub(crate) fn new(database: Database) -> Self {
        Self {
            database,
            options: TransactionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.options.timeout.unwrap_or(DEFAULT_TRANSACTION_TIMEOUT)
    }

    /// Runs `work` in a read-write transaction and commits it.
    ///
    /// The closure runs again, in a new transaction, whenever the transaction aborts or its session is lost.
    /// Any other error rolls the transaction back and is returned as-is.
    ///
    /// ```no_run
    /// # use spanner_core::*;
    /// # async fn f(client: Client) -> Result<(), Error> {
    /// let updated = client
    ///     .read_write()
    ///     .run(|tx| {
    ///         Box::pin(async move {
    ///             tx.update("UPDATE person SET name = @name WHERE id = 42", &[("name", &"ferris")])
    ///                 .await
    ///         })
    ///     })
    ///     .await?;
    /// # Ok(()) }
    /// ```
    pub async fn run<F, T>(&self, work: F) -> Result<T, Error>
    where
        F: for<'a> FnMut(&'a mut ReadWriteTransaction) -> BoxFuture<'a, Result<T, Error>>,
    {
        self.run_and_commit(work).await.map(|(value, _)| value)
    }

    /// Like [`TransactionRunner::run`], also returning the commit timestamp.
    /// The timestamp is absent when `work` ended the transaction itself.
    pub async fn run_and_commit<F, T>(&self, mut work: F) -> Result<(T, Option<SystemTime>), Error>
    where
        F: for<'a> FnMut(&'a mut ReadWriteTransaction) -> BoxFuture<'a, Result<T, Error>>,
    {
        let mut retrier = Retrier {
            retry: &self.database.retry,
            deadline: self.deadline(),
            aborted: 0,
        };
        loop {
            match self.attempt(&mut work, retrier.deadline).await {
                Ok(committed) => return Ok(committed),
                Err(err) => retrier.on_error(err).await?,
            }
        }
    }

    async fn attempt<F, T>(&self, work: &mut F, deadline: Instant) -> Result<(T, Option<SystemTime>), Error>
    where
        F: for<'a> FnMut(&'a mut ReadWriteTransaction) -> BoxFuture<'a, Result<T, Error>>,
    {
        let session = self.database.pool.acquire_write(Some(deadline)).await?;
        let mut tx = ReadWriteTransaction::new(self.database.clone(), session, &self.options);
        let outcome = work(&mut tx).await;
        let result = match outcome {
            Ok(value) if tx.is_ended() => Ok((value, None)),
            Ok(value) => tx.commit().await.map(|timestamp| (value, Some(timestamp))),
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            if err.is_session_not_found() {
                tx.discard_session();
            } else if !err.is_aborted() && !tx.is_ended() && tx.id().is_some() {
                if let Err(rollback) = tx.rollback().await {
                    debug!("rollback failed: {}", rollback);
                }
            }
        }
        tx.end();
        result
    }

    /// Runs a partitioned DML statement, returning a lower bound of the number of modified rows.
    pub(crate) async fn run_partitioned_update(&self, statement: &Statement) -> Result<i64, Error> {
        let mut retrier = Retrier {
            retry: &self.database.retry,
            deadline: self.deadline(),
            aborted: 0,
        };
        loop {
            let session = self
                .database
                .pool
                .acquire_read(Some(retrier.deadline))
                .await?;
            let mut pdml = PartitionedDml::new(self.database.clone(), session);
            let result = pdml.execute(statement).await;
            if matches!(&result, Err(err) if err.is_session_not_found()) {
                pdml.discard_session();
            }
            pdml.end();
            match result {
                Ok(count) => return Ok(count),
                Err(err) => retrier.on_error(err).await?,
            }
        }
    }
}

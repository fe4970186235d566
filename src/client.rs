use std::future::Future;
use std::time::SystemTime;

use async_trait::async_trait;
use log::{info, warn};

use crate::requests;
use crate::row_stream::{RowStream, StreamLease, StreamRequest};
use crate::{
    BatchReadOnlyTransaction, Config, Connection, DatabaseId, Error, KeySet, Mutation, MutationContext, PoolStatus,
    ReadContext, ReadOptions, RetryConfig, Session, SessionPool, Snapshot, SpannerResource,
    Statement, StreamConfig, TimestampBound, ToSpanner, TransactionRunner, Value, WriteOp,
};

/// Everything a transaction needs to talk to the database.
#[derive(Clone)]
pub(crate) struct Database {
    pub(crate) pool: SessionPool,
    pub(crate) connection: Box<dyn Connection>,
    pub(crate) retry: RetryConfig,
    pub(crate) stream: StreamConfig,
}

/// A handle to a Cloud Spanner database.
///
/// Clones share the same session pool.
#[derive(Clone)]
pub struct Client {
    id: DatabaseId,
    database: Database,
}

impl Client {
    pub fn config() -> Config {
        Config::default()
    }

    pub(crate) async fn connect(config: Config, connection: Box<dyn Connection>) -> Result<Self, Error> {
        let id = config
            .database
            .ok_or_else(|| Error::Config("missing database".to_string()))?;
        let pool = SessionPool::new(&id.id(), connection.clone(), config.session_pool);
        if let Err(err) = pool.fill().await {
            warn!("failed to create the initial sessions of {}: {}", id, err);
            if let Err(close) = pool.close().await {
                warn!("{}", close);
            }
            return Err(err);
        }
        info!(
            "connected to {} with {} session(s)",
            id,
            pool.status().size()
        );
        Ok(Self {
            id,
            database: Database {
                pool,
                connection,
                retry: config.retry,
                stream: config.stream,
            },
        })
    }

    pub fn database(&self) -> &DatabaseId {
        &self.id
    }

    pub fn session_pool(&self) -> &SessionPool {
        &self.database.pool
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.database.pool.status()
    }

    /// Single-use reads observing all committed data.
    pub fn read_only(&self) -> SingleUse {
        self.read_only_with_bound(TimestampBound::Strong)
    }

    /// Single-use reads bounded by `bound`.
    pub fn read_only_with_bound(&self, bound: TimestampBound) -> SingleUse {
        SingleUse {
            database: self.database.clone(),
            bound,
        }
    }

    /// Leases a session for a multi-use read-only transaction. The snapshot must be [ended](Snapshot::end).
    ///
    /// Snapshots that are never ended are reported, with the location of this call, when the client closes.
    #[track_caller]
    pub fn snapshot(
        &self,
        bound: TimestampBound,
    ) -> impl Future<Output = Result<Snapshot, Error>> + Send + '_ {
        let session = self.database.pool.acquire_read(None);
        async move { Ok(Snapshot::new(self.database.clone(), session.await?, bound)) }
    }

    /// Begins a read-only transaction whose queries and reads can be split into partitions.
    /// The transaction must be [ended](BatchReadOnlyTransaction::end).
    #[track_caller]
    pub fn batch_read_only(
        &self,
        bound: TimestampBound,
    ) -> impl Future<Output = Result<BatchReadOnlyTransaction, Error>> + Send + '_ {
        let session = self.database.pool.acquire_read(None);
        async move { BatchReadOnlyTransaction::begin(self.database.clone(), session.await?, bound).await }
    }

    pub fn read_write(&self) -> TransactionRunner {
        TransactionRunner::new(self.database.clone())
    }

    /// Runs a DML statement as partitioned DML, returning a lower bound of the number of modified rows.
    pub async fn run_partitioned_update(&self, statement: &Statement) -> Result<i64, Error> {
        self.read_write().run_partitioned_update(statement).await
    }

    /// Applies the mutations atomically in a read-write transaction, returning the commit timestamp.
    pub async fn apply(&self, mutations: Vec<Mutation>) -> Result<SystemTime, Error> {
        let (_, timestamp) = self
            .read_write()
            .run_and_commit(|tx| {
                let mutations = mutations.clone();
                Box::pin(async move { tx.buffer(mutations) })
            })
            .await?;
        timestamp.ok_or_else(|| Error::Client("transaction ended without committing".to_string()))
    }

    pub fn table(&self, name: &str) -> Table<'_> {
        Table {
            client: self,
            name: name.to_string(),
        }
    }

    /// Closes the session pool; fails with [`Error::SessionLeak`] when transactions were not ended.
    pub async fn close(&self) -> Result<(), Error> {
        self.database.pool.close().await
    }
}

/// Reads in single-use read-only transactions, each one on its own session.
///
/// The session goes back to the pool once the returned [`RowStream`] is exhausted or dropped.
pub struct SingleUse {
    database: Database,
    bound: TimestampBound,
}

impl SingleUse {
    async fn stream(&self, session: Session, request: StreamRequest) -> Result<RowStream, Error> {
        let lease = StreamLease::new(self.database.pool.clone(), session);
        let mut rows = RowStream::new(
            self.database.connection.clone(),
            request,
            self.database.stream.clone(),
            self.database.retry.clone(),
            Some(lease),
        );
        rows.prefetch().await?;
        Ok(rows)
    }
}

#[async_trait]
impl ReadContext for SingleUse {
    async fn read(
        &mut self,
        table: &str,
        key_set: KeySet,
        columns: &[&str],
        options: ReadOptions,
    ) -> Result<RowStream, Error> {
        let session = self.database.pool.acquire_read(None).await?;
        let request = requests::read(
            session.name(),
            requests::single_use(requests::read_only_options(&self.bound)),
            table,
            key_set,
            columns,
            &options,
            None,
        );
        self.stream(session, StreamRequest::Read(request)).await
    }

    async fn execute_query(&mut self, statement: &Statement) -> Result<RowStream, Error> {
        let session = self.database.pool.acquire_read(None).await?;
        let request = requests::execute_sql(
            session.name(),
            requests::single_use(requests::read_only_options(&self.bound)),
            statement,
            None,
            None,
        );
        self.stream(session, StreamRequest::Sql(request)).await
    }
}

/// Mutations of a single table, each one applied in its own transaction.
pub struct Table<'a> {
    client: &'a Client,
    name: String,
}

impl Table<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn insert(&self, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<SystemTime, Error> {
        let mutation = Mutation::insert(&self.name, values)?;
        self.client.apply(vec![mutation]).await
    }

    pub async fn update(&self, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<SystemTime, Error> {
        let mutation = Mutation::update(&self.name, values)?;
        self.client.apply(vec![mutation]).await
    }

    pub async fn upsert(&self, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<SystemTime, Error> {
        let mutation = Mutation::upsert(&self.name, values)?;
        self.client.apply(vec![mutation]).await
    }

    pub async fn replace(&self, values: &[(&str, &(dyn ToSpanner + Sync))]) -> Result<SystemTime, Error> {
        let mutation = Mutation::replace(&self.name, values)?;
        self.client.apply(vec![mutation]).await
    }

    /// Writes several rows at once.
    pub async fn write(
        &self,
        op: WriteOp,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<SystemTime, Error> {
        let mutation = Mutation::write(op, &self.name, columns, rows)?;
        self.client.apply(vec![mutation]).await
    }

    pub async fn delete(&self, key_set: KeySet) -> Result<SystemTime, Error> {
        self.client
            .apply(vec![Mutation::delete(&self.name, key_set)])
            .await
    }

    /// Reads rows of the table in a strong single-use transaction.
    pub async fn read(
        &self,
        key_set: KeySet,
        columns: &[&str],
        options: ReadOptions,
    ) -> Result<RowStream, Error> {
        self.client
            .read_only()
            .read(&self.name, key_set, columns, options)
            .await
    }
}

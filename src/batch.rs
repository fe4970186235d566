use std::time::SystemTime;

use async_trait::async_trait;
use prost::bytes::Bytes;

use crate::client::Database;
use crate::proto::google::spanner::v1 as proto;
use crate::requests;
use crate::row_stream::{RowStream, StreamRequest};
use crate::transaction::{TransactionCore, TransactionKind};
use crate::{Error, KeySet, ReadContext, ReadOptions, Session, Statement, TimestampBound};

/// Hints on how a query or read is split, the server may return a different number of partitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionOptions {
    pub partition_size_bytes: Option<i64>,
    pub max_partitions: Option<i64>,
}

impl PartitionOptions {
    pub fn partition_size_bytes(mut self, bytes: i64) -> Self {
        self.partition_size_bytes = Some(bytes);
        self
    }

    pub fn max_partitions(mut self, partitions: i64) -> Self {
        self.max_partitions = Some(partitions);
        self
    }
}

/// A slice of a partitioned query or read, executed with [`BatchReadOnlyTransaction::execute`].
///
/// Partitions may be executed in any order and concurrently, through clones of the transaction's client.
/// They become invalid once the transaction that created them ends.
#[derive(Debug, Clone)]
pub struct Partition {
    request: StreamRequest,
}

impl Partition {
    fn new(mut request: StreamRequest, token: Bytes) -> Self {
        match &mut request {
            StreamRequest::Sql(request) => request.partition_token = token,
            StreamRequest::Read(request) => request.partition_token = token,
        }
        Self { request }
    }

    /// The opaque token identifying this partition.
    pub fn token(&self) -> &[u8] {
        match &self.request {
            StreamRequest::Sql(request) => &request.partition_token,
            StreamRequest::Read(request) => &request.partition_token,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self.request, StreamRequest::Sql(_))
    }
}

/// A read-only transaction that splits queries and reads into [`Partition`]s.
///
/// Every partition observes the same timestamp. The transaction is begun when it is created and its session stays
/// leased until [`BatchReadOnlyTransaction::end`] is called.
pub struct BatchReadOnlyTransaction {
    core: TransactionCore,
}

impl BatchReadOnlyTransaction {
    pub(crate) async fn begin(
        database: Database,
        session: Session,
        bound: TimestampBound,
    ) -> Result<Self, Error> {
        let mut core = TransactionCore::new(database, session, TransactionKind::ReadOnly(bound), None);
        if let Err(err) = core.begin().await {
            core.end();
            return Err(err);
        }
        Ok(Self { core })
    }

    /// The id of the transaction, as chosen by the server.
    pub fn id(&self) -> Option<&[u8]> {
        self.core.id().map(|id| id.as_ref())
    }

    pub fn read_timestamp(&self) -> Option<SystemTime> {
        self.core.read_timestamp()
    }

    pub fn is_ended(&self) -> bool {
        self.core.is_ended()
    }

    fn selector(&self) -> Result<proto::TransactionSelector, Error> {
        self.core
            .id()
            .map(requests::with_id)
            .ok_or_else(|| Error::Client("batch transaction has no id".to_string()))
    }

    /// Splits the query into partitions. The query must be root-partitionable (e.g.: no `ORDER BY`).
    pub async fn partition_query(
        &mut self,
        statement: &Statement,
        options: PartitionOptions,
    ) -> Result<Vec<Partition>, Error> {
        let partitions = self.core.partition_query(statement, &options).await?;
        let session = self.core.session_name()?;
        let selector = self.selector()?;
        Ok(partitions
            .into_iter()
            .map(|partition| {
                let request = requests::execute_sql(session, selector.clone(), statement, None, None);
                Partition::new(StreamRequest::Sql(request), partition.partition_token)
            })
            .collect())
    }

    /// Splits the read into partitions. `options.limit` is not supported by partitioned reads and is ignored.
    pub async fn partition_read(
        &mut self,
        table: &str,
        key_set: KeySet,
        columns: &[&str],
        options: ReadOptions,
        partition_options: PartitionOptions,
    ) -> Result<Vec<Partition>, Error> {
        let partitions = self
            .core
            .partition_read(
                table,
                key_set.clone(),
                columns,
                options.index.as_deref(),
                &partition_options,
            )
            .await?;
        let session = self.core.session_name()?;
        let selector = self.selector()?;
        let options = ReadOptions {
            limit: None,
            ..options
        };
        Ok(partitions
            .into_iter()
            .map(|partition| {
                let request = requests::read(
                    session,
                    selector.clone(),
                    table,
                    key_set.clone(),
                    columns,
                    &options,
                    None,
                );
                Partition::new(StreamRequest::Read(request), partition.partition_token)
            })
            .collect())
    }

    /// Streams the rows of a single partition.
    pub async fn execute(&mut self, partition: &Partition) -> Result<RowStream, Error> {
        self.core.session_name()?;
        self.core.stream(partition.request.clone()).await
    }

    /// Returns the session to the pool, invalidating the partitions. Calling this more than once has no effect.
    pub fn end(&mut self) {
        self.core.end()
    }
}

#[async_trait]
impl ReadContext for BatchReadOnlyTransaction {
    async fn read(
        &mut self,
        table: &str,
        key_set: KeySet,
        columns: &[&str],
        options: ReadOptions,
    ) -> Result<RowStream, Error> {
        self.core.read(table, key_set, columns, &options).await
    }

    async fn execute_query(&mut self, statement: &Statement) -> Result<RowStream, Error> {
        self.core.execute_query(statement).await
    }
}

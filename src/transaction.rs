use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use log::debug;
use prost::bytes::Bytes;

use crate::client::Database;
use crate::proto::google::spanner::v1 as proto;
use crate::requests;
use crate::row_stream::{RowStream, StreamRequest};
use crate::runner::retry_rpc;
use crate::{
    Connection, DmlContext, Error, KeySet, Mutation, MutationContext, PartitionOptions, ReadContext,
    ReadOptions, ReleaseOutcome, ResultSetStats, Session, Statement,
};

/// Determines which data a read-only transaction observes.
#[derive(Clone, Debug, PartialEq)]
pub enum TimestampBound {
    /// Observes all transactions committed before the read starts.
    Strong,
    ReadTimestamp(SystemTime),
    MinReadTimestamp(SystemTime),
    ExactStaleness(Duration),
    MaxStaleness(Duration),
}

impl From<TimestampBound> for proto::transaction_options::read_only::TimestampBound {
    fn from(value: TimestampBound) -> Self {
        use proto::transaction_options::read_only::TimestampBound as Bound;
        match value {
            TimestampBound::Strong => Bound::Strong(true),
            TimestampBound::ReadTimestamp(timestamp) => Bound::ReadTimestamp(timestamp.into()),
            TimestampBound::MinReadTimestamp(timestamp) => {
                Bound::MinReadTimestamp(timestamp.into())
            }
            TimestampBound::MaxStaleness(duration) => Bound::MaxStaleness(to_duration(duration)),
            TimestampBound::ExactStaleness(duration) => Bound::ExactStaleness(to_duration(duration)),
        }
    }
}

fn to_duration(duration: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: duration.as_secs() as i64,
        nanos: duration.subsec_nanos() as i32,
    }
}

/// Options of a read-write transaction run through [`TransactionRunner`](crate::TransactionRunner).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionOptions {
    /// Tag attached to every request of the transaction.
    pub transaction_tag: Option<String>,
    /// Reads take no lock and conflicts are detected at commit instead.
    pub optimistic_lock: bool,
    /// Bound on the time spent retrying the transaction, one hour when absent.
    pub timeout: Option<Duration>,
}

impl TransactionOptions {
    pub fn transaction_tag(mut self, tag: &str) -> Self {
        self.transaction_tag = Some(tag.to_string());
        self
    }

    pub fn optimistic_lock(mut self, optimistic_lock: bool) -> Self {
        self.optimistic_lock = optimistic_lock;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransactionKind {
    ReadOnly(TimestampBound),
    ReadWrite { optimistic_lock: bool },
    PartitionedDml,
}

pub(crate) fn to_system_time(timestamp: &prost_types::Timestamp) -> Result<SystemTime, Error> {
    if timestamp.seconds < 0 || !(0..1_000_000_000).contains(&timestamp.nanos) {
        return Err(Error::Codec(format!(
            "unsupported timestamp: {:?}",
            timestamp
        )));
    }
    Ok(UNIX_EPOCH + Duration::new(timestamp.seconds as u64, timestamp.nanos as u32))
}

/// State shared by every kind of transaction: the leased session, the transaction id once known and the DML
/// sequence number. The session goes back to the pool exactly once, when the transaction ends.
pub(crate) struct TransactionCore {
    database: Database,
    session: Option<Session>,
    kind: TransactionKind,
    id: Option<Bytes>,
    tag: Option<String>,
    seqno: i64,
    mutations: Vec<Mutation>,
    /// Shared with the row streams of the transaction, which may learn that the session is gone mid-stream.
    session_lost: Arc<AtomicBool>,
    read_timestamp: Option<SystemTime>,
}

impl TransactionCore {
    pub(crate) fn new(
        database: Database,
        session: Session,
        kind: TransactionKind,
        tag: Option<String>,
    ) -> Self {
        Self {
            database,
            session: Some(session),
            kind,
            id: None,
            tag,
            seqno: 1,
            mutations: Vec::new(),
            session_lost: Arc::new(AtomicBool::new(false)),
            read_timestamp: None,
        }
    }

    fn session(&self) -> Result<&str, Error> {
        self.session
            .as_ref()
            .map(Session::name)
            .ok_or(Error::TransactionEnded)
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.session.is_none()
    }

    fn options(&self) -> proto::TransactionOptions {
        match &self.kind {
            TransactionKind::ReadOnly(bound) => requests::read_only_options(bound),
            TransactionKind::ReadWrite { optimistic_lock } => {
                requests::read_write_options(*optimistic_lock)
            }
            TransactionKind::PartitionedDml => requests::partitioned_dml_options(),
        }
    }

    /// Un-begun transactions begin inline with their first request.
    fn selector(&self) -> proto::TransactionSelector {
        match &self.id {
            Some(id) => requests::with_id(id),
            None => requests::begin(self.options()),
        }
    }

    fn next_seqno(&mut self) -> i64 {
        let seqno = self.seqno;
        self.seqno += 1;
        seqno
    }

    fn begun(&mut self, transaction: &proto::Transaction) {
        if self.id.is_none() && !transaction.id.is_empty() {
            self.id = Some(transaction.id.clone());
        }
        if let Some(timestamp) = &transaction.read_timestamp {
            self.read_timestamp = to_system_time(timestamp).ok();
        }
    }

    fn observe<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(err) = &result {
            if err.is_session_not_found() {
                self.session_lost.store(true, Ordering::SeqCst);
            }
        }
        result
    }

    /// The session is released as not found when the transaction ends.
    pub(crate) fn discard_session(&mut self) {
        self.session_lost.store(true, Ordering::SeqCst);
    }

    async fn call<T, F>(&mut self, rpc: F) -> Result<T, Error>
    where
        T: Send,
        F: Fn(Box<dyn Connection>) -> BoxFuture<'static, Result<T, Error>> + Send + Sync,
    {
        let connection = self.database.connection.clone();
        let result = retry_rpc(&self.database.retry, || rpc(connection.clone())).await;
        self.observe(result)
    }

    /// Begins the transaction with a dedicated request instead of inline.
    pub(crate) async fn begin(&mut self) -> Result<(), Error> {
        let request =
            requests::begin_transaction(self.session()?, self.options(), self.tag.as_deref());
        let transaction = self
            .call(move |mut connection| {
                let request = request.clone();
                async move { connection.begin_transaction(request).await }.boxed()
            })
            .await?;
        self.begun(&transaction);
        Ok(())
    }

    pub(crate) async fn stream(&mut self, request: StreamRequest) -> Result<RowStream, Error> {
        let mut rows = RowStream::new(
            self.database.connection.clone(),
            request,
            self.database.stream.clone(),
            self.database.retry.clone(),
            None,
        )
        .track_session(self.session_lost.clone());
        let result = rows.prefetch().await;
        self.observe(result)?;
        if let Some(transaction) = rows.transaction() {
            self.begun(transaction);
        }
        Ok(rows)
    }

    pub(crate) async fn execute_query(&mut self, statement: &Statement) -> Result<RowStream, Error> {
        let request = requests::execute_sql(
            self.session()?,
            self.selector(),
            statement,
            None,
            self.tag.as_deref(),
        );
        self.stream(StreamRequest::Sql(request)).await
    }

    pub(crate) async fn read(
        &mut self,
        table: &str,
        key_set: KeySet,
        columns: &[&str],
        options: &ReadOptions,
    ) -> Result<RowStream, Error> {
        let request = requests::read(
            self.session()?,
            self.selector(),
            table,
            key_set,
            columns,
            options,
            self.tag.as_deref(),
        );
        self.stream(StreamRequest::Read(request)).await
    }

    pub(crate) fn session_name(&self) -> Result<&str, Error> {
        self.session()
    }

    pub(crate) fn id(&self) -> Option<&Bytes> {
        self.id.as_ref()
    }

    pub(crate) fn read_timestamp(&self) -> Option<SystemTime> {
        self.read_timestamp
    }

    pub(crate) async fn partition_query(
        &mut self,
        statement: &Statement,
        options: &PartitionOptions,
    ) -> Result<Vec<proto::Partition>, Error> {
        let request = requests::partition_query(self.session()?, self.selector(), statement, options);
        let response = self
            .call(move |mut connection| {
                let request = request.clone();
                async move { connection.partition_query(request).await }.boxed()
            })
            .await?;
        if let Some(transaction) = &response.transaction {
            self.begun(transaction);
        }
        Ok(response.partitions)
    }

    pub(crate) async fn partition_read(
        &mut self,
        table: &str,
        key_set: KeySet,
        columns: &[&str],
        index: Option<&str>,
        options: &PartitionOptions,
    ) -> Result<Vec<proto::Partition>, Error> {
        let request = requests::partition_read(
            self.session()?,
            self.selector(),
            table,
            key_set,
            columns,
            index,
            options,
        );
        let response = self
            .call(move |mut connection| {
                let request = request.clone();
                async move { connection.partition_read(request).await }.boxed()
            })
            .await?;
        if let Some(transaction) = &response.transaction {
            self.begun(transaction);
        }
        Ok(response.partitions)
    }

    pub(crate) async fn execute_update(&mut self, statement: &Statement) -> Result<i64, Error> {
        let session = self.session()?.to_string();
        let seqno = self.next_seqno();
        let request = requests::execute_sql(
            &session,
            self.selector(),
            statement,
            Some(seqno),
            self.tag.as_deref(),
        );
        let result_set = self
            .call(move |mut connection| {
                let request = request.clone();
                async move { connection.execute_sql(request).await }.boxed()
            })
            .await?;
        if let Some(transaction) = result_set
            .metadata
            .as_ref()
            .and_then(|m| m.transaction.as_ref())
        {
            self.begun(transaction);
        }
        result_set
            .stats
            .map(ResultSetStats::from)
            .and_then(|stats| stats.row_count())
            .ok_or_else(|| Error::Codec("DML statement returned no row count".to_string()))
    }

    pub(crate) async fn execute_updates(&mut self, statements: &[Statement]) -> Result<Vec<i64>, Error> {
        if statements.is_empty() {
            return Err(Error::Client("a batch needs at least one statement".to_string()));
        }
        let session = self.session()?.to_string();
        let seqno = self.next_seqno();
        let request = requests::execute_batch_dml(
            &session,
            self.selector(),
            statements,
            seqno,
            self.tag.as_deref(),
        );
        let response = self
            .call(move |mut connection| {
                let request = request.clone();
                async move { connection.execute_batch_dml(request).await }.boxed()
            })
            .await?;
        if let Some(transaction) = response
            .result_sets
            .first()
            .and_then(|rs| rs.metadata.as_ref())
            .and_then(|m| m.transaction.as_ref())
        {
            self.begun(transaction);
        }
        let row_counts = response
            .result_sets
            .into_iter()
            .map(|rs| {
                rs.stats
                    .map(ResultSetStats::from)
                    .and_then(|stats| stats.row_count())
                    .ok_or_else(|| Error::Codec("DML statement returned no row count".to_string()))
            })
            .collect::<Result<Vec<i64>, Error>>()?;
        match response.status {
            Some(status) if status.code != 0 => {
                let status = tonic::Status::new(tonic::Code::from_i32(status.code), status.message);
                let err = Error::BatchUpdate { row_counts, status };
                self.observe(Err(err))
            }
            _ => Ok(row_counts),
        }
    }

    pub(crate) fn buffer(&mut self, mutations: Vec<Mutation>) -> Result<(), Error> {
        self.session()?;
        self.mutations.extend(mutations);
        Ok(())
    }

    /// Commits the buffered mutations. The transaction ends whether the commit succeeds or not.
    pub(crate) async fn commit(&mut self) -> Result<SystemTime, Error> {
        let session = self.session()?.to_string();
        let mutations = std::mem::take(&mut self.mutations);
        let request = requests::commit(&session, self.id.as_ref(), mutations, self.tag.as_deref());
        let result = self
            .call(move |mut connection| {
                let request = request.clone();
                async move { connection.commit(request).await }.boxed()
            })
            .await;
        self.end();
        result?
            .commit_timestamp
            .as_ref()
            .map(to_system_time)
            .transpose()?
            .ok_or_else(|| Error::Codec("commit response has no timestamp".to_string()))
    }

    pub(crate) async fn rollback(&mut self) -> Result<(), Error> {
        let session = self.session()?.to_string();
        let id = self
            .id
            .clone()
            .ok_or_else(|| Error::Client("cannot roll back a transaction that has not begun".to_string()))?;
        let request = requests::rollback(&session, &id);
        self.call(move |mut connection| {
            let request = request.clone();
            async move { connection.rollback(request).await }.boxed()
        })
        .await?;
        self.end();
        Ok(())
    }

    pub(crate) fn end(&mut self) {
        if let Some(mut session) = self.session.take() {
            let outcome = if self.session_lost.load(Ordering::SeqCst) {
                ReleaseOutcome::NotFound
            } else {
                ReleaseOutcome::Reusable
            };
            if matches!(self.kind, TransactionKind::ReadWrite { .. }) && self.id.is_some() {
                session.mark_read_write();
            }
            debug!("releasing session {} ({:?})", session.name(), outcome);
            self.database.pool.release(session, outcome);
        }
    }
}

/// A multi-use read-only transaction: every read observes the same timestamp.
///
/// The session stays leased until [`Snapshot::end`] is called; snapshots that are dropped without being ended are
/// reported as leaks when the client closes.
pub struct Snapshot {
    core: TransactionCore,
}

impl Snapshot {
    pub(crate) fn new(database: Database, session: Session, bound: TimestampBound) -> Self {
        Self {
            core: TransactionCore::new(database, session, TransactionKind::ReadOnly(bound), None),
        }
    }

    /// The timestamp chosen by the server, known after the first read.
    pub fn read_timestamp(&self) -> Option<SystemTime> {
        self.core.read_timestamp()
    }

    pub fn is_ended(&self) -> bool {
        self.core.is_ended()
    }

    /// Returns the session to the pool. Calling this more than once has no effect.
    pub fn end(&mut self) {
        self.core.end()
    }
}

#[async_trait]
impl ReadContext for Snapshot {
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

/// A read-write transaction, usually obtained through [`TransactionRunner::run`](crate::TransactionRunner::run).
pub struct ReadWriteTransaction {
    core: TransactionCore,
}

impl ReadWriteTransaction {
    /// Reuses the transaction prepared on the session when its lock mode matches; otherwise the transaction
    /// begins inline with its first request.
    pub(crate) fn new(database: Database, mut session: Session, options: &TransactionOptions) -> Self {
        let prepared = match session.take_prepared() {
            Some(prepared) if prepared.optimistic_lock == options.optimistic_lock => Some(prepared.id),
            Some(_) => {
                debug!(
                    "dropping the prepared transaction of session {}, lock mode differs",
                    session.name()
                );
                None
            }
            None => None,
        };
        let mut core = TransactionCore::new(
            database,
            session,
            TransactionKind::ReadWrite {
                optimistic_lock: options.optimistic_lock,
            },
            options.transaction_tag.clone(),
        );
        core.id = prepared;
        Self { core }
    }

    /// The transaction id, known once the transaction has begun.
    pub fn id(&self) -> Option<&[u8]> {
        self.core.id.as_deref()
    }

    pub fn is_ended(&self) -> bool {
        self.core.is_ended()
    }

    /// Applies the buffered mutations and ends the transaction, returning the commit timestamp.
    pub async fn commit(&mut self) -> Result<SystemTime, Error> {
        self.core.commit().await
    }

    /// Fails when the transaction has not begun; ends the transaction when it succeeds.
    pub async fn rollback(&mut self) -> Result<(), Error> {
        self.core.rollback().await
    }

    pub fn end(&mut self) {
        self.core.end()
    }

    pub(crate) fn discard_session(&mut self) {
        self.core.discard_session()
    }
}

#[async_trait]
impl ReadContext for ReadWriteTransaction {
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

#[async_trait]
impl DmlContext for ReadWriteTransaction {
    async fn execute_update(&mut self, statement: &Statement) -> Result<i64, Error> {
        self.core.execute_update(statement).await
    }

    async fn execute_updates(&mut self, statements: &[Statement]) -> Result<Vec<i64>, Error> {
        self.core.execute_updates(statements).await
    }
}

impl MutationContext for ReadWriteTransaction {
    fn buffer(&mut self, mutations: Vec<Mutation>) -> Result<(), Error> {
        self.core.buffer(mutations)
    }
}

/// A partitioned DML transaction: begun explicitly, runs a single statement.
pub(crate) struct PartitionedDml {
    core: TransactionCore,
}

impl PartitionedDml {
    pub(crate) fn new(database: Database, session: Session) -> Self {
        Self {
            core: TransactionCore::new(database, session, TransactionKind::PartitionedDml, None),
        }
    }

    /// Returns a lower bound of the number of modified rows.
    pub(crate) async fn execute(&mut self, statement: &Statement) -> Result<i64, Error> {
        self.core.begin().await?;
        self.core.execute_update(statement).await
    }

    pub(crate) fn discard_session(&mut self) {
        self.core.discard_session()
    }

    pub(crate) fn end(&mut self) {
        self.core.end()
    }
}

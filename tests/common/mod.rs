use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use ctor::ctor;
use futures::stream::{self, StreamExt};
use prost::bytes::Bytes;
use prost_types::value::Kind;
use spanner_core::proto::google::rpc;
use spanner_core::proto::google::spanner::v1 as proto;
use spanner_core::{
    Client, Connection, Error, PartialResultStream, RetryConfig, SessionPoolConfig,
};
use tonic::Status;

use proto::transaction_selector::Selector;

pub const DATABASE: &str = "projects/test-project/instances/test-instance/databases/test-database";

#[ctor]
fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rpc {
    BatchCreateSessions,
    DeleteSession,
    ExecuteSql,
    ExecuteStreamingSql,
    StreamingRead,
    ExecuteBatchDml,
    BeginTransaction,
    Commit,
    Rollback,
    PartitionQuery,
    PartitionRead,
}

/// How a request selected its transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tx {
    None,
    SingleUse,
    Begin,
    Id(Vec<u8>),
}

impl From<Option<&proto::TransactionSelector>> for Tx {
    fn from(selector: Option<&proto::TransactionSelector>) -> Self {
        match selector.and_then(|s| s.selector.as_ref()) {
            None => Tx::None,
            Some(Selector::SingleUse(_)) => Tx::SingleUse,
            Some(Selector::Begin(_)) => Tx::Begin,
            Some(Selector::Id(id)) => Tx::Id(id.to_vec()),
        }
    }
}

/// A request as received by the fake server.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    BatchCreateSessions {
        count: usize,
    },
    DeleteSession {
        session: String,
    },
    ExecuteSql {
        session: String,
        sql: String,
        tx: Tx,
        seqno: i64,
    },
    ExecuteStreamingSql {
        session: String,
        sql: String,
        tx: Tx,
        resume_token: Vec<u8>,
    },
    StreamingRead {
        session: String,
        table: String,
        tx: Tx,
        resume_token: Vec<u8>,
    },
    ExecuteBatchDml {
        session: String,
        statements: Vec<String>,
        tx: Tx,
        seqno: i64,
    },
    BeginTransaction {
        session: String,
    },
    Commit {
        session: String,
        transaction_id: Option<Vec<u8>>,
        mutations: usize,
    },
    Rollback {
        session: String,
        transaction_id: Vec<u8>,
    },
    PartitionQuery {
        session: String,
        sql: String,
        tx: Tx,
        max_partitions: i64,
    },
    PartitionRead {
        session: String,
        table: String,
        index: String,
        tx: Tx,
        max_partitions: i64,
    },
}

impl Call {
    pub fn rpc(&self) -> Rpc {
        match self {
            Call::BatchCreateSessions { .. } => Rpc::BatchCreateSessions,
            Call::DeleteSession { .. } => Rpc::DeleteSession,
            Call::ExecuteSql { .. } => Rpc::ExecuteSql,
            Call::ExecuteStreamingSql { .. } => Rpc::ExecuteStreamingSql,
            Call::StreamingRead { .. } => Rpc::StreamingRead,
            Call::ExecuteBatchDml { .. } => Rpc::ExecuteBatchDml,
            Call::BeginTransaction { .. } => Rpc::BeginTransaction,
            Call::Commit { .. } => Rpc::Commit,
            Call::Rollback { .. } => Rpc::Rollback,
            Call::PartitionQuery { .. } => Rpc::PartitionQuery,
            Call::PartitionRead { .. } => Rpc::PartitionRead,
        }
    }
}

#[derive(Default)]
struct State {
    next_session: usize,
    next_transaction: usize,
    sessions: HashSet<String>,
    deleted: Vec<String>,
    /// Upper bound of sessions returned by a single `BatchCreateSessions`.
    batch_limit: Option<usize>,
    failures: HashMap<Rpc, VecDeque<Status>>,
    /// Chunks streamed for a SQL string or a table name.
    results: HashMap<String, Vec<proto::PartialResultSet>>,
    /// Errors ending the next streams of a SQL string or table name after the given number of chunks.
    interruptions: HashMap<String, VecDeque<(usize, Status)>>,
    update_counts: HashMap<String, i64>,
    statement_failures: HashMap<String, Status>,
    /// Number of partitions returned by the partition RPCs, one when unset.
    partitions: Option<usize>,
    /// Partition tokens of the streaming requests, in the order they were received.
    executed_partitions: Vec<Vec<u8>>,
    calls: Vec<Call>,
}

impl State {
    fn check_session(&self, session: &str) -> Result<(), Error> {
        if self.sessions.contains(session) {
            Ok(())
        } else {
            Err(Status::not_found(format!("Session not found: {}", session)).into())
        }
    }

    fn fail(&mut self, rpc: Rpc) -> Result<(), Error> {
        match self.failures.get_mut(&rpc).and_then(VecDeque::pop_front) {
            Some(status) => Err(status.into()),
            None => Ok(()),
        }
    }

    fn new_transaction(&mut self) -> proto::Transaction {
        self.next_transaction += 1;
        proto::Transaction {
            id: Bytes::from(format!("tx-{}", self.next_transaction)),
            read_timestamp: Some(prost_types::Timestamp {
                seconds: 1_600_000_000 + self.next_transaction as i64,
                nanos: 0,
            }),
        }
    }

    fn begin_inline(&mut self, selector: Option<&proto::TransactionSelector>) -> Option<proto::Transaction> {
        match Tx::from(selector) {
            Tx::Begin => Some(self.new_transaction()),
            _ => None,
        }
    }

    fn update_count(&self, sql: &str) -> i64 {
        self.update_counts.get(sql).copied().unwrap_or(1)
    }

    fn stream(
        &mut self,
        key: &str,
        selector: Option<&proto::TransactionSelector>,
        resume_token: &[u8],
    ) -> PartialResultStream {
        let chunks = self.results.get(key).cloned().unwrap_or_else(|| {
            vec![proto::PartialResultSet {
                metadata: Some(metadata(&[])),
                ..Default::default()
            }]
        });
        let start = if resume_token.is_empty() {
            0
        } else {
            chunks
                .iter()
                .position(|c| c.resume_token.as_ref() == resume_token)
                .map(|idx| idx + 1)
                .unwrap_or(0)
        };
        let mut delivered = chunks[start..].to_vec();
        if delivered.is_empty() {
            delivered.push(proto::PartialResultSet::default());
        }
        if delivered[0].metadata.is_none() {
            delivered[0].metadata = chunks[0].metadata.clone();
        }
        if let Some(transaction) = self.begin_inline(selector) {
            if let Some(metadata) = delivered[0].metadata.as_mut() {
                metadata.transaction = Some(transaction);
            }
        }
        let mut items = delivered.into_iter().map(Ok).collect::<Vec<Result<_, Error>>>();
        if let Some((after, status)) = self
            .interruptions
            .get_mut(key)
            .and_then(VecDeque::pop_front)
        {
            items.truncate(after);
            items.push(Err(status.into()));
        }
        stream::iter(items).boxed()
    }

    fn partition(
        &mut self,
        selector: Option<&proto::TransactionSelector>,
    ) -> Result<proto::PartitionResponse, Error> {
        let transaction = self.begin_inline(selector);
        let partitions = (0..self.partitions.unwrap_or(1))
            .map(|idx| proto::Partition {
                partition_token: Bytes::from(format!("partition-{}", idx)),
            })
            .collect();
        Ok(proto::PartitionResponse {
            partitions,
            transaction,
        })
    }
}

/// An in-memory stand-in for the Cloud Spanner service.
#[derive(Clone, Default)]
pub struct FakeSpanner {
    state: Arc<Mutex<State>>,
}

#[allow(dead_code)]
impl FakeSpanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Fails the next call of `rpc` with `status`.
    pub fn fail(&self, rpc: Rpc, status: Status) {
        self.state().failures.entry(rpc).or_default().push_back(status);
    }

    pub fn limit_batches(&self, limit: usize) {
        self.state().batch_limit = Some(limit);
    }

    /// Streams `chunks` for the SQL string or table name `key`.
    pub fn set_result(&self, key: &str, chunks: Vec<proto::PartialResultSet>) {
        self.state().results.insert(key.to_string(), chunks);
    }

    /// Ends the next stream of `key` with `status` after `after` chunks.
    pub fn interrupt(&self, key: &str, after: usize, status: Status) {
        self.state()
            .interruptions
            .entry(key.to_string())
            .or_default()
            .push_back((after, status));
    }

    /// Number of partitions returned for every partitioned query or read.
    pub fn set_partitions(&self, count: usize) {
        self.state().partitions = Some(count);
    }

    pub fn executed_partitions(&self) -> Vec<Vec<u8>> {
        self.state().executed_partitions.clone()
    }

    pub fn set_update_count(&self, sql: &str, count: i64) {
        self.state().update_counts.insert(sql.to_string(), count);
    }

    /// Fails `sql` with `status` the next time it runs in a batch.
    pub fn fail_statement(&self, sql: &str, status: Status) {
        self.state().statement_failures.insert(sql.to_string(), status);
    }

    /// Makes the server forget every session it created so far.
    pub fn forget_sessions(&self) {
        self.state().sessions.clear();
    }

    pub fn forget_session(&self, name: &str) {
        self.state().sessions.remove(name);
    }

    pub fn live_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn created_sessions(&self) -> usize {
        self.state().next_session
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, rpc: Rpc) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.rpc() == rpc).collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

#[async_trait]
impl Connection for FakeSpanner {
    async fn batch_create_sessions(
        &mut self,
        request: proto::BatchCreateSessionsRequest,
    ) -> Result<proto::BatchCreateSessionsResponse, Error> {
        let mut state = self.state();
        state.calls.push(Call::BatchCreateSessions {
            count: request.session_count as usize,
        });
        state.fail(Rpc::BatchCreateSessions)?;
        let count = match state.batch_limit {
            Some(limit) => limit.min(request.session_count as usize),
            None => request.session_count as usize,
        };
        let labels = request
            .session_template
            .map(|template| template.labels)
            .unwrap_or_default();
        let mut session = Vec::with_capacity(count);
        for _ in 0..count {
            state.next_session += 1;
            let name = format!("{}/sessions/s{}", request.database, state.next_session);
            state.sessions.insert(name.clone());
            session.push(proto::Session {
                name,
                labels: labels.clone(),
                ..Default::default()
            });
        }
        Ok(proto::BatchCreateSessionsResponse { session })
    }

    async fn delete_session(&mut self, request: proto::DeleteSessionRequest) -> Result<(), Error> {
        let mut state = self.state();
        state.calls.push(Call::DeleteSession {
            session: request.name.clone(),
        });
        state.fail(Rpc::DeleteSession)?;
        state.check_session(&request.name)?;
        state.sessions.remove(&request.name);
        state.deleted.push(request.name);
        Ok(())
    }

    async fn execute_sql(&mut self, request: proto::ExecuteSqlRequest) -> Result<proto::ResultSet, Error> {
        let mut state = self.state();
        state.calls.push(Call::ExecuteSql {
            session: request.session.clone(),
            sql: request.sql.clone(),
            tx: Tx::from(request.transaction.as_ref()),
            seqno: request.seqno,
        });
        state.check_session(&request.session)?;
        state.fail(Rpc::ExecuteSql)?;
        let transaction = state.begin_inline(request.transaction.as_ref());
        if request.sql == "SELECT 1" {
            return Ok(proto::ResultSet {
                metadata: Some(metadata(&[("", proto::TypeCode::Int64)])),
                rows: vec![prost_types::ListValue {
                    values: vec![int(1)],
                }],
                stats: None,
            });
        }
        Ok(proto::ResultSet {
            metadata: Some(proto::ResultSetMetadata {
                transaction,
                ..metadata(&[])
            }),
            rows: Vec::new(),
            stats: Some(row_count(state.update_count(&request.sql))),
        })
    }

    async fn execute_streaming_sql(
        &mut self,
        request: proto::ExecuteSqlRequest,
    ) -> Result<PartialResultStream, Error> {
        let mut state = self.state();
        state.calls.push(Call::ExecuteStreamingSql {
            session: request.session.clone(),
            sql: request.sql.clone(),
            tx: Tx::from(request.transaction.as_ref()),
            resume_token: request.resume_token.to_vec(),
        });
        state.check_session(&request.session)?;
        state.fail(Rpc::ExecuteStreamingSql)?;
        if !request.partition_token.is_empty() {
            state.executed_partitions.push(request.partition_token.to_vec());
        }
        Ok(state.stream(&request.sql, request.transaction.as_ref(), &request.resume_token))
    }

    async fn streaming_read(&mut self, request: proto::ReadRequest) -> Result<PartialResultStream, Error> {
        let mut state = self.state();
        state.calls.push(Call::StreamingRead {
            session: request.session.clone(),
            table: request.table.clone(),
            tx: Tx::from(request.transaction.as_ref()),
            resume_token: request.resume_token.to_vec(),
        });
        state.check_session(&request.session)?;
        state.fail(Rpc::StreamingRead)?;
        if !request.partition_token.is_empty() {
            state.executed_partitions.push(request.partition_token.to_vec());
        }
        Ok(state.stream(&request.table, request.transaction.as_ref(), &request.resume_token))
    }

    async fn execute_batch_dml(
        &mut self,
        request: proto::ExecuteBatchDmlRequest,
    ) -> Result<proto::ExecuteBatchDmlResponse, Error> {
        let mut state = self.state();
        state.calls.push(Call::ExecuteBatchDml {
            session: request.session.clone(),
            statements: request.statements.iter().map(|s| s.sql.clone()).collect(),
            tx: Tx::from(request.transaction.as_ref()),
            seqno: request.seqno,
        });
        state.check_session(&request.session)?;
        state.fail(Rpc::ExecuteBatchDml)?;
        let mut transaction = state.begin_inline(request.transaction.as_ref());
        let mut result_sets = Vec::new();
        let mut status = rpc::Status::default();
        for statement in &request.statements {
            if let Some(failure) = state.statement_failures.remove(&statement.sql) {
                status = rpc::Status {
                    code: failure.code() as i32,
                    message: failure.message().to_string(),
                    details: Vec::new(),
                };
                break;
            }
            result_sets.push(proto::ResultSet {
                metadata: Some(proto::ResultSetMetadata {
                    transaction: transaction.take(),
                    ..metadata(&[])
                }),
                rows: Vec::new(),
                stats: Some(row_count(state.update_count(&statement.sql))),
            });
        }
        Ok(proto::ExecuteBatchDmlResponse {
            result_sets,
            status: Some(status),
        })
    }

    async fn begin_transaction(
        &mut self,
        request: proto::BeginTransactionRequest,
    ) -> Result<proto::Transaction, Error> {
        let mut state = self.state();
        state.calls.push(Call::BeginTransaction {
            session: request.session.clone(),
        });
        state.check_session(&request.session)?;
        state.fail(Rpc::BeginTransaction)?;
        Ok(state.new_transaction())
    }

    async fn commit(&mut self, request: proto::CommitRequest) -> Result<proto::CommitResponse, Error> {
        use proto::commit_request::Transaction;
        let mut state = self.state();
        state.calls.push(Call::Commit {
            session: request.session.clone(),
            transaction_id: match &request.transaction {
                Some(Transaction::TransactionId(id)) => Some(id.to_vec()),
                _ => None,
            },
            mutations: request.mutations.len(),
        });
        state.check_session(&request.session)?;
        state.fail(Rpc::Commit)?;
        Ok(proto::CommitResponse {
            commit_timestamp: Some(prost_types::Timestamp {
                seconds: 1_700_000_000,
                nanos: 0,
            }),
            ..Default::default()
        })
    }

    async fn rollback(&mut self, request: proto::RollbackRequest) -> Result<(), Error> {
        let mut state = self.state();
        state.calls.push(Call::Rollback {
            session: request.session.clone(),
            transaction_id: request.transaction_id.to_vec(),
        });
        state.check_session(&request.session)?;
        state.fail(Rpc::Rollback)
    }

    async fn partition_query(
        &mut self,
        request: proto::PartitionQueryRequest,
    ) -> Result<proto::PartitionResponse, Error> {
        let mut state = self.state();
        state.calls.push(Call::PartitionQuery {
            session: request.session.clone(),
            sql: request.sql.clone(),
            tx: Tx::from(request.transaction.as_ref()),
            max_partitions: request
                .partition_options
                .as_ref()
                .map(|o| o.max_partitions)
                .unwrap_or_default(),
        });
        state.check_session(&request.session)?;
        state.fail(Rpc::PartitionQuery)?;
        state.partition(request.transaction.as_ref())
    }

    async fn partition_read(
        &mut self,
        request: proto::PartitionReadRequest,
    ) -> Result<proto::PartitionResponse, Error> {
        let mut state = self.state();
        state.calls.push(Call::PartitionRead {
            session: request.session.clone(),
            table: request.table.clone(),
            index: request.index.clone(),
            tx: Tx::from(request.transaction.as_ref()),
            max_partitions: request
                .partition_options
                .as_ref()
                .map(|o| o.max_partitions)
                .unwrap_or_default(),
        });
        state.check_session(&request.session)?;
        state.fail(Rpc::PartitionRead)?;
        state.partition(request.transaction.as_ref())
    }
}

#[allow(dead_code)]
pub fn metadata(columns: &[(&str, proto::TypeCode)]) -> proto::ResultSetMetadata {
    proto::ResultSetMetadata {
        row_type: Some(proto::StructType {
            fields: columns
                .iter()
                .map(|(name, code)| proto::struct_type::Field {
                    name: name.to_string(),
                    r#type: Some(proto::Type {
                        code: *code as i32,
                        ..Default::default()
                    }),
                })
                .collect(),
        }),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn row_count(count: i64) -> proto::ResultSetStats {
    proto::ResultSetStats {
        row_count: Some(proto::result_set_stats::RowCount::RowCountExact(count)),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn string(value: &str) -> prost_types::Value {
    prost_types::Value {
        kind: Some(Kind::StringValue(value.to_string())),
    }
}

#[allow(dead_code)]
pub fn int(value: i64) -> prost_types::Value {
    string(&value.to_string())
}

/// A chunk carrying `values`, without metadata nor resume token.
#[allow(dead_code)]
pub fn chunk(values: Vec<prost_types::Value>) -> proto::PartialResultSet {
    proto::PartialResultSet {
        values,
        ..Default::default()
    }
}

/// A status asking the client to retry after `delay`.
#[allow(dead_code)]
pub fn aborted_with_delay(delay: Duration) -> Status {
    use prost::Message;
    let info = rpc::RetryInfo {
        retry_delay: Some(prost_types::Duration {
            seconds: delay.as_secs() as i64,
            nanos: delay.subsec_nanos() as i32,
        }),
    };
    let mut status = Status::aborted("transaction was aborted");
    status.metadata_mut().insert_bin(
        "google.rpc.retryinfo-bin",
        tonic::metadata::MetadataValue::from_bytes(&info.encode_to_vec()),
    );
    status
}

#[allow(dead_code)]
pub fn pool_config(min: usize, max: usize) -> SessionPoolConfig {
    SessionPoolConfig::builder()
        .min(min)
        .max(max)
        .inc_step(1)
        .build()
        .unwrap()
}

#[allow(dead_code)]
pub fn retry_config() -> RetryConfig {
    RetryConfig {
        jitter: Duration::ZERO,
        ..Default::default()
    }
}

#[allow(dead_code)]
pub async fn new_client(fake: &FakeSpanner, pool: SessionPoolConfig) -> Client {
    Client::config()
        .database(DATABASE.parse().unwrap())
        .session_pool(pool)
        .retry(retry_config())
        .connect(fake.clone())
        .await
        .unwrap()
}

/// Waits for background tasks of the pool to bring `condition` about.
#[allow(dead_code)]
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

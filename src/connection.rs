use async_trait::async_trait;
use dyn_clone::DynClone;
use futures::stream::BoxStream;

use crate::proto::google::spanner::v1 as proto;
use crate::Error;

/// The chunks of a streamed query or read, in the order the server produced them.
pub type PartialResultStream = BoxStream<'static, Result<proto::PartialResultSet, Error>>;

/// The transport used to reach Cloud Spanner.
///
/// Implementations forward each request to the corresponding RPC of the `google.spanner.v1.Spanner`
/// service and report failures as [`Error::Status`] so that the status code and metadata (e.g.: retry delays)
/// reach the session pool and transaction runner untouched.
///
/// Connections are cloned for every concurrent use; clones are expected to share the underlying channel.
#[async_trait]
pub trait Connection
where
    Self: DynClone + Send + Sync,
{
    async fn batch_create_sessions(
        &mut self,
        request: proto::BatchCreateSessionsRequest,
    ) -> Result<proto::BatchCreateSessionsResponse, Error>;

    async fn delete_session(&mut self, request: proto::DeleteSessionRequest) -> Result<(), Error>;

    async fn execute_sql(&mut self, request: proto::ExecuteSqlRequest) -> Result<proto::ResultSet, Error>;

    async fn execute_streaming_sql(
        &mut self,
        request: proto::ExecuteSqlRequest,
    ) -> Result<PartialResultStream, Error>;

    async fn streaming_read(&mut self, request: proto::ReadRequest) -> Result<PartialResultStream, Error>;

    async fn execute_batch_dml(
        &mut self,
        request: proto::ExecuteBatchDmlRequest,
    ) -> Result<proto::ExecuteBatchDmlResponse, Error>;

    async fn begin_transaction(
        &mut self,
        request: proto::BeginTransactionRequest,
    ) -> Result<proto::Transaction, Error>;

    async fn commit(&mut self, request: proto::CommitRequest) -> Result<proto::CommitResponse, Error>;

    async fn rollback(&mut self, request: proto::RollbackRequest) -> Result<(), Error>;

    async fn partition_query(
        &mut self,
        request: proto::PartitionQueryRequest,
    ) -> Result<proto::PartitionResponse, Error>;

    async fn partition_read(
        &mut self,
        request: proto::PartitionReadRequest,
    ) -> Result<proto::PartitionResponse, Error>;
}

dyn_clone::clone_trait_object!(Connection);

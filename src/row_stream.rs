use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, warn};
use prost::bytes::Bytes;
use prost_types::value::Kind;
use prost_types::{ListValue, Value as SpannerValue};

use crate::connection::PartialResultStream;
use crate::proto::google::spanner::v1 as proto;
use crate::requests;
use crate::result_set::row_type;
use crate::{
    Connection, Error, ReleaseOutcome, ResultSet, ResultSetStats, RetryConfig, Row, Session,
    SessionPool, StreamConfig, StructType, StructValue,
};

/// The streaming request a [`RowStream`] reissues when it resumes.
#[derive(Debug, Clone)]
pub(crate) enum StreamRequest {
    Sql(proto::ExecuteSqlRequest),
    Read(proto::ReadRequest),
}

impl StreamRequest {
    fn set_resume_token(&mut self, token: Bytes) {
        match self {
            StreamRequest::Sql(request) => request.resume_token = token,
            StreamRequest::Read(request) => request.resume_token = token,
        }
    }

    fn set_transaction(&mut self, selector: proto::TransactionSelector) {
        match self {
            StreamRequest::Sql(request) => request.transaction = Some(selector),
            StreamRequest::Read(request) => request.transaction = Some(selector),
        }
    }

    fn set_session(&mut self, session: &str) {
        match self {
            StreamRequest::Sql(request) => request.session = session.to_string(),
            StreamRequest::Read(request) => request.session = session.to_string(),
        }
    }

    async fn open(&self, connection: &mut Box<dyn Connection>) -> Result<PartialResultStream, Error> {
        match self {
            StreamRequest::Sql(request) => connection.execute_streaming_sql(request.clone()).await,
            StreamRequest::Read(request) => connection.streaming_read(request.clone()).await,
        }
    }
}

/// A session owned by a single-use stream, released when the stream ends or is dropped.
pub(crate) struct StreamLease {
    pool: SessionPool,
    session: Option<Session>,
    outcome: ReleaseOutcome,
}

impl StreamLease {
    pub(crate) fn new(pool: SessionPool, session: Session) -> Self {
        Self {
            pool,
            session: Some(session),
            outcome: ReleaseOutcome::Reusable,
        }
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session, self.outcome);
        }
    }
}

/// The decoding state as it stood when the last resume token was received.
#[derive(Default)]
struct Checkpoint {
    pending: Vec<SpannerValue>,
    chunked: Option<SpannerValue>,
}

/// Rows of a streamed query or read, pulled from the server as they are consumed.
///
/// Values split across chunks are merged back together and, when the stream is interrupted by a transient error,
/// the request is reissued with the last resume token received. Rows are only handed out once a resume token covers
/// them (or once `max_buffered_rows` of them are waiting), so resuming never duplicates nor loses rows.
pub struct RowStream {
    connection: Box<dyn Connection>,
    request: StreamRequest,
    config: StreamConfig,
    retry: RetryConfig,
    lease: Option<StreamLease>,
    /// Raised when the server reports the session as gone, so that the owning transaction does not reuse it.
    session_lost: Option<Arc<AtomicBool>>,
    source: Option<PartialResultStream>,
    metadata: Option<proto::ResultSetMetadata>,
    row_type: Option<Arc<StructType>>,
    stats: Option<ResultSetStats>,
    pending: Vec<SpannerValue>,
    chunked: Option<SpannerValue>,
    checkpoint: Checkpoint,
    buffered: VecDeque<Row>,
    ready: VecDeque<Row>,
    resumable: bool,
    attempts: usize,
    yielded: usize,
    done: bool,
}

impl RowStream {
    pub(crate) fn new(
        connection: Box<dyn Connection>,
        request: StreamRequest,
        config: StreamConfig,
        retry: RetryConfig,
        lease: Option<StreamLease>,
    ) -> Self {
        Self {
            connection,
            request,
            config,
            retry,
            lease,
            session_lost: None,
            source: None,
            metadata: None,
            row_type: None,
            stats: None,
            pending: Vec::new(),
            chunked: None,
            checkpoint: Checkpoint::default(),
            buffered: VecDeque::new(),
            ready: VecDeque::new(),
            resumable: true,
            attempts: 0,
            yielded: 0,
            done: false,
        }
    }

    pub(crate) fn track_session(mut self, session_lost: Arc<AtomicBool>) -> Self {
        self.session_lost = Some(session_lost);
        self
    }

    /// The type of the rows, known once the first chunk was received.
    pub fn row_type(&self) -> Option<&StructType> {
        self.row_type.as_deref()
    }

    /// Statistics sent with the last chunk, available once the stream is exhausted.
    pub fn stats(&self) -> Option<&ResultSetStats> {
        self.stats.as_ref()
    }

    /// The transaction begun by this request, if it carried an inline begin.
    pub(crate) fn transaction(&self) -> Option<&proto::Transaction> {
        self.metadata.as_ref().and_then(|m| m.transaction.as_ref())
    }

    /// Pulls chunks until the metadata is known, surfacing errors of the initial request.
    pub(crate) async fn prefetch(&mut self) -> Result<(), Error> {
        while self.metadata.is_none() && !self.done {
            self.advance().await?;
        }
        Ok(())
    }

    /// The next row, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Result<Option<Row>, Error> {
        loop {
            if let Some(row) = self.ready.pop_front() {
                self.yielded += 1;
                return Ok(Some(row));
            }
            if self.done {
                return Ok(None);
            }
            self.advance().await?;
        }
    }

    /// Consumes the remaining rows into a [`ResultSet`].
    pub async fn collect(mut self) -> Result<ResultSet, Error> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        let row_type = self
            .row_type
            .as_deref()
            .cloned()
            .unwrap_or_default();
        Ok(ResultSet::new(row_type, rows, self.stats.take()))
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Row, Error>> {
        stream::unfold(self, |mut rows| async move {
            match rows.next().await {
                Ok(Some(row)) => Some((Ok(row), rows)),
                Ok(None) => None,
                Err(err) => Some((Err(err), rows)),
            }
        })
        .boxed()
    }

    async fn advance(&mut self) -> Result<(), Error> {
        match self.pull().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.done = true;
                self.source = None;
                self.ready.clear();
                self.buffered.clear();
                if err.is_session_not_found() {
                    if let Some(lease) = self.lease.as_mut() {
                        lease.outcome = ReleaseOutcome::NotFound;
                    }
                    if let Some(session_lost) = &self.session_lost {
                        session_lost.store(true, Ordering::SeqCst);
                    }
                }
                self.lease = None;
                Err(err)
            }
        }
    }

    /// Processes a single chunk, or recovers from the error that interrupted the stream.
    async fn pull(&mut self) -> Result<(), Error> {
        if self.source.is_none() {
            match self.request.open(&mut self.connection).await {
                Ok(source) => self.source = Some(source),
                Err(err) => return self.recover(err).await,
            }
        }
        let item = match self.source.as_mut() {
            Some(source) => source.next().await,
            None => return Ok(()),
        };
        match item {
            Some(Ok(chunk)) => self.process(chunk),
            Some(Err(err)) => self.recover(err).await,
            None => self.finish(),
        }
    }

    fn process(&mut self, chunk: proto::PartialResultSet) -> Result<(), Error> {
        if self.metadata.is_none() {
            let metadata = chunk.metadata.ok_or_else(|| {
                Error::Codec("first chunk of a result set has no metadata".to_string())
            })?;
            self.row_type = Some(Arc::new(row_type(Some(&metadata))?));
            if let Some(transaction) = &metadata.transaction {
                self.request
                    .set_transaction(requests::with_id(&transaction.id));
            }
            self.metadata = Some(metadata);
        }
        if let Some(stats) = chunk.stats {
            self.stats = Some(stats.into());
        }

        let mut values = chunk.values.into_iter();
        let mut first = values.next();
        if let Some(head) = self.chunked.take() {
            first = match first {
                Some(tail) => Some(merge(head, tail)?),
                None => Some(head),
            };
        }
        let mut values = first.into_iter().chain(values).collect::<Vec<_>>();
        if chunk.chunked_value {
            self.chunked = values.pop();
        }
        self.push_values(values)?;

        if !chunk.resume_token.is_empty() {
            self.ready.extend(self.buffered.drain(..));
            self.request.set_resume_token(chunk.resume_token);
            self.checkpoint = Checkpoint {
                pending: self.pending.clone(),
                chunked: self.chunked.clone(),
            };
            self.resumable = true;
            self.attempts = 0;
        } else if self.buffered.len() > self.config.max_buffered_rows {
            debug!(
                "{} rows received without a resume token, stream can no longer resume",
                self.buffered.len()
            );
            self.ready.extend(self.buffered.drain(..));
            self.resumable = false;
        }
        Ok(())
    }

    fn push_values(&mut self, values: Vec<SpannerValue>) -> Result<(), Error> {
        let row_type = match &self.row_type {
            Some(row_type) if !row_type.is_empty() => row_type.clone(),
            _ if values.is_empty() => return Ok(()),
            _ => return Err(Error::Codec("values received for an empty row type".to_string())),
        };
        for value in values {
            self.pending.push(value);
            if self.pending.len() == row_type.len() {
                let values = std::mem::take(&mut self.pending);
                let columns = StructValue::decode(&row_type, ListValue { values })?;
                self.buffered.push_back(Row::new(row_type.clone(), columns));
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.source = None;
        if self.chunked.is_some() || !self.pending.is_empty() {
            return Err(Error::Codec("result set ended in the middle of a row".to_string()));
        }
        self.ready.extend(self.buffered.drain(..));
        self.done = true;
        self.lease = None;
        Ok(())
    }

    async fn recover(&mut self, err: Error) -> Result<(), Error> {
        self.source = None;
        if err.is_session_not_found() && self.can_restart() {
            return self.restart(err).await;
        }
        if !err.is_transient() || !self.resumable {
            return Err(err);
        }
        if self.attempts >= self.config.max_resume_attempts {
            warn!("giving up on stream after {} attempt(s): {}", self.attempts, err);
            return Err(Error::StreamNotResuming(self.attempts));
        }
        let delay = self.retry.backoff(self.attempts as u32);
        self.attempts += 1;
        warn!(
            "resuming stream in {:?} (attempt {}): {}",
            delay, self.attempts, err
        );
        let checkpoint = &self.checkpoint;
        self.pending = checkpoint.pending.clone();
        self.chunked = checkpoint.chunked.clone();
        self.buffered.clear();
        tokio::time::sleep(delay).await;
        Ok(())
    }

    /// Single-use streams that have not handed out any row may start over on a new session.
    fn can_restart(&self) -> bool {
        self.lease.is_some()
            && self.yielded == 0
            && self.ready.is_empty()
            && self.attempts < self.config.max_resume_attempts
    }

    async fn restart(&mut self, err: Error) -> Result<(), Error> {
        let pool = match self.lease.as_mut() {
            Some(lease) => {
                lease.outcome = ReleaseOutcome::NotFound;
                lease.pool.clone()
            }
            None => return Err(err),
        };
        self.lease = None;
        self.attempts += 1;
        debug!("restarting stream on a new session: {}", err);
        let session = pool.acquire_read(None).await?;
        self.request.set_session(session.name());
        self.request.set_resume_token(Bytes::new());
        self.lease = Some(StreamLease::new(pool, session));
        self.metadata = None;
        self.row_type = None;
        self.stats = None;
        self.pending.clear();
        self.chunked = None;
        self.checkpoint = Checkpoint::default();
        self.buffered.clear();
        self.resumable = true;
        Ok(())
    }
}

fn is_mergeable(value: &SpannerValue) -> bool {
    matches!(
        value.kind,
        Some(Kind::StringValue(_)) | Some(Kind::ListValue(_))
    )
}

/// Merges a value split across two chunks.
pub(crate) fn merge(head: SpannerValue, tail: SpannerValue) -> Result<SpannerValue, Error> {
    match (head.kind, tail.kind) {
        (Some(Kind::StringValue(mut head)), Some(Kind::StringValue(tail))) => {
            head.push_str(&tail);
            Ok(SpannerValue {
                kind: Some(Kind::StringValue(head)),
            })
        }
        (Some(Kind::ListValue(mut head)), Some(Kind::ListValue(tail))) => {
            let mut tail = tail.values.into_iter();
            match (head.values.pop(), tail.next()) {
                (Some(last), Some(first)) if is_mergeable(&last) => {
                    head.values.push(merge(last, first)?);
                }
                (last, first) => {
                    head.values.extend(last);
                    head.values.extend(first);
                }
            }
            head.values.extend(tail);
            Ok(SpannerValue {
                kind: Some(Kind::ListValue(head)),
            })
        }
        (head, tail) => Err(Error::Codec(format!(
            "cannot merge chunked values {:?} and {:?}",
            head, tail
        ))),
    }
}

use std::time::Duration;

use prost::Message;
use tonic::Code;

use crate::proto::google::rpc::RetryInfo;

const RETRY_INFO_KEY: &str = "google.rpc.retryinfo-bin";

// Messages of `INTERNAL` statuses produced by connection resets rather than by the server.
const TRANSIENT_INTERNAL_MESSAGES: [&str; 4] = [
    "Received unexpected EOS on DATA frame from server",
    "RST_STREAM",
    "HTTP/2 error code: INTERNAL_ERROR",
    "Connection closed with unknown cause",
];

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("spanner client error: {0}")]
    Client(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("codec error: {0}")]
    Codec(String),

    #[error("unexpected gRPC status: {0}")]
    Status(#[from] tonic::Status),

    #[error("no session available in the pool\n{context}")]
    SessionPoolExhausted { context: String },

    #[error("{} session leak(s) detected\n{}", .0.len(), .0.join("\n"))]
    SessionLeak(Vec<String>),

    #[error("deadline exceeded: {message}")]
    DeadlineExceeded {
        message: String,
        #[source]
        last: Option<Box<Error>>,
    },

    #[error("session pool is closed")]
    PoolClosed,

    #[error("batch DML failed after {} successful statement(s): {status}", .row_counts.len())]
    BatchUpdate {
        row_counts: Vec<i64>,
        status: tonic::Status,
    },

    #[error("transaction has already ended")]
    TransactionEnded,

    #[error("stream did not resume after {0} attempt(s)")]
    StreamNotResuming(usize),
}

impl Error {
    pub(crate) fn deadline(message: &str, last: Option<Error>) -> Self {
        Error::DeadlineExceeded {
            message: message.to_string(),
            last: last.map(Box::new),
        }
    }

    /// The status code carried by this error, if it originated from (or maps to) an RPC status.
    pub fn code(&self) -> Option<Code> {
        match self {
            Error::Status(status) => Some(status.code()),
            Error::BatchUpdate { status, .. } => Some(status.code()),
            Error::DeadlineExceeded { .. } => Some(Code::DeadlineExceeded),
            _ => None,
        }
    }

    fn message(&self) -> Option<&str> {
        match self {
            Error::Status(status) => Some(status.message()),
            Error::BatchUpdate { status, .. } => Some(status.message()),
            _ => None,
        }
    }

    /// Returns true when the server aborted the transaction this error was raised in.
    pub fn is_aborted(&self) -> bool {
        self.code() == Some(Code::Aborted)
    }

    /// Returns true when the server no longer knows the session the request was sent on.
    pub fn is_session_not_found(&self) -> bool {
        self.code() == Some(Code::NotFound)
            && self
                .message()
                .map(|message| message.contains("Session not found"))
                .unwrap_or(false)
    }

    /// Returns true for errors that are safe to retry at the RPC or stream level.
    pub fn is_transient(&self) -> bool {
        match self.code() {
            Some(Code::Unavailable) => true,
            Some(Code::Internal) => self
                .message()
                .map(|message| {
                    TRANSIENT_INTERNAL_MESSAGES
                        .iter()
                        .any(|transient| message.contains(transient))
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    /// The delay the server asked clients to wait before retrying, if any.
    pub fn retry_delay(&self) -> Option<Duration> {
        let status = match self {
            Error::Status(status) => status,
            Error::BatchUpdate { status, .. } => status,
            _ => return None,
        };
        let bytes = status.metadata().get_bin(RETRY_INFO_KEY)?.to_bytes().ok()?;
        let delay = RetryInfo::decode(bytes).ok()?.retry_delay?;
        if delay.seconds < 0 || delay.nanos < 0 {
            return None;
        }
        Some(Duration::new(delay.seconds as u64, delay.nanos as u32))
    }
}

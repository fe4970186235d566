use prost::bytes::Bytes;
use tokio::time::{Duration, Instant};

use crate::proto::google::spanner::v1 as proto;

/// The server forgets sessions that have not been used for this long.
pub(crate) const SESSION_EXPIRY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    ReadOnly,
    /// A read-write transaction was begun on this session at least once.
    ReadWrite,
}

/// A server-side session, owned either by the pool's idle inventory or by a single lease.
#[derive(Debug)]
pub struct Session {
    name: String,
    created: Instant,
    last_used: Instant,
    kind: SessionKind,
    /// A read-write transaction begun ahead of time; consumed by the next write lease.
    prepared: Option<PreparedTransaction>,
    pub(crate) lease: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct PreparedTransaction {
    pub(crate) id: Bytes,
    pub(crate) optimistic_lock: bool,
}

impl Session {
    pub(crate) fn new(name: String) -> Self {
        let now = Instant::now();
        Self {
            name,
            created: now,
            last_used: now,
            kind: SessionKind::ReadOnly,
            prepared: None,
            lease: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.idle_for() >= SESSION_EXPIRY
    }

    /// Records activity (use or keep-alive ping) on the session.
    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn mark_read_write(&mut self) {
        self.kind = SessionKind::ReadWrite;
    }

    pub(crate) fn prepare(&mut self, transaction: proto::Transaction, optimistic_lock: bool) {
        self.kind = SessionKind::ReadWrite;
        self.prepared = Some(PreparedTransaction {
            id: transaction.id,
            optimistic_lock,
        });
    }

    pub(crate) fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    pub(crate) fn take_prepared(&mut self) -> Option<PreparedTransaction> {
        self.prepared.take()
    }
}

impl From<proto::Session> for Session {
    fn from(value: proto::Session) -> Self {
        Session::new(value.name)
    }
}

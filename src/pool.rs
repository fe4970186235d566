use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::requests;
use crate::{Connection, Error, Session, SessionKind, SessionPoolConfig, Statement, TimestampBound};

/// How a leased session is handed back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The session can be used again.
    Reusable,
    /// The server reported the session as not found; it is discarded and replaced.
    NotFound,
}

/// A snapshot of the pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle_read: usize,
    pub idle_write: usize,
    /// Idle sessions holding a begun read-write transaction, included in `idle_write`.
    pub prepared: usize,
    pub leased: usize,
    /// Sessions requested from the server and not yet received.
    pub pending: usize,
    /// Sessions temporarily taken out of the idle inventory to be pinged or prepared.
    pub maintenance: usize,
    pub waiters: usize,
}

impl PoolStatus {
    /// Number of sessions owned by the pool, idle or leased.
    pub fn size(&self) -> usize {
        self.idle_read + self.idle_write + self.leased + self.maintenance
    }
}

/// Where and when a session was leased, reported when it is never released.
struct LeaseTrace {
    session: String,
    leased_at: Instant,
    location: &'static Location<'static>,
}

impl LeaseTrace {
    fn describe(&self) -> String {
        format!(
            "session {} leased {:?} ago at {}",
            self.session,
            self.leased_at.elapsed(),
            self.location
        )
    }
}

struct Waiter {
    tx: oneshot::Sender<Result<Session, Error>>,
    kind: SessionKind,
    location: &'static Location<'static>,
}

#[derive(Default)]
struct PoolState {
    open: bool,
    /// Most recently released first.
    read_only: VecDeque<Session>,
    read_write: VecDeque<Session>,
    leased: usize,
    pending: usize,
    batches: usize,
    maintenance: usize,
    preparing: usize,
    next_lease: u64,
    traces: HashMap<u64, LeaseTrace>,
    waiters: VecDeque<Waiter>,
    housekeeping: Option<JoinHandle<()>>,
}

impl PoolState {
    fn size(&self) -> usize {
        self.read_only.len() + self.read_write.len() + self.leased + self.maintenance
    }

    fn live_waiters(&self) -> usize {
        self.waiters.iter().filter(|w| !w.tx.is_closed()).count()
    }

    fn prepared(&self) -> usize {
        self.read_write.iter().filter(|s| s.is_prepared()).count() + self.preparing
    }

    fn write_target(&self, config: &SessionPoolConfig) -> usize {
        (config.min as f64 * config.write_sessions).floor() as usize
    }

    fn lease(&mut self, mut session: Session, location: &'static Location<'static>) -> Session {
        self.next_lease += 1;
        let id = self.next_lease;
        self.traces.insert(
            id,
            LeaseTrace {
                session: session.name().to_string(),
                leased_at: Instant::now(),
                location,
            },
        );
        self.leased += 1;
        session.lease = Some(id);
        session
    }

    fn unlease(&mut self, session: &mut Session) {
        if let Some(id) = session.lease.take() {
            if self.traces.remove(&id).is_some() {
                self.leased -= 1;
            }
        }
    }

    /// Takes the most recently used idle session, preferring the requested kind.
    /// Expired sessions found along the way are returned separately.
    fn borrow(&mut self, kind: SessionKind) -> (Option<Session>, Vec<Session>) {
        let mut expired = Vec::new();
        loop {
            let (preferred, fallback) = match kind {
                SessionKind::ReadOnly => (&mut self.read_only, &mut self.read_write),
                SessionKind::ReadWrite => (&mut self.read_write, &mut self.read_only),
            };
            match preferred.pop_front().or_else(|| fallback.pop_front()) {
                Some(session) if session.is_expired() => expired.push(session),
                Some(mut session) => {
                    drop_prepared(&mut session, kind);
                    return (Some(session), expired);
                }
                None => return (None, expired),
            }
        }
    }

    /// Gives the session to the oldest live waiter, or returns it when nobody is waiting.
    fn hand_off(&mut self, mut session: Session) -> Option<Session> {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.tx.is_closed() {
                continue;
            }
            drop_prepared(&mut session, waiter.kind);
            let leased = self.lease(session, waiter.location);
            match waiter.tx.send(Ok(leased)) {
                Ok(()) => return None,
                Err(Ok(mut returned)) => {
                    self.unlease(&mut returned);
                    session = returned;
                }
                Err(Err(_)) => return None,
            }
        }
        Some(session)
    }

    fn check_in(&mut self, session: Session) {
        if let Some(session) = self.hand_off(session) {
            match session.kind() {
                SessionKind::ReadOnly => self.read_only.push_front(session),
                SessionKind::ReadWrite => self.read_write.push_front(session),
            }
        }
    }

    /// Reserves the next creation batch when waiters outnumber the sessions already on their way.
    fn next_batch(&mut self, config: &SessionPoolConfig) -> Option<usize> {
        if self.live_waiters() <= self.pending || self.batches >= config.concurrency {
            return None;
        }
        let room = config.max.saturating_sub(self.size() + self.pending);
        let count = config.inc_step.min(room);
        if count == 0 {
            return None;
        }
        self.pending += count;
        self.batches += 1;
        Some(count)
    }

    /// Reserves a single session replacing one that was discarded.
    fn replacement(&mut self, config: &SessionPoolConfig) -> Option<usize> {
        if !self.open || self.size() + self.pending >= config.max {
            return None;
        }
        self.pending += 1;
        self.batches += 1;
        Some(1)
    }

    fn take_unprepared(&mut self, config: &SessionPoolConfig) -> Vec<Session> {
        let needed = self.write_target(config).saturating_sub(self.prepared());
        let mut sessions = Vec::with_capacity(needed);
        while sessions.len() < needed {
            let next = match self.read_write.iter().rposition(|s| !s.is_prepared()) {
                Some(idx) => self.read_write.remove(idx),
                None => self.read_only.pop_back(),
            };
            match next {
                Some(session) => sessions.push(session),
                None => break,
            }
        }
        self.maintenance += sessions.len();
        self.preparing += sessions.len();
        sessions
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            idle_read: self.read_only.len(),
            idle_write: self.read_write.len(),
            prepared: self.read_write.iter().filter(|s| s.is_prepared()).count(),
            leased: self.leased,
            pending: self.pending,
            maintenance: self.maintenance,
            waiters: self.live_waiters(),
        }
    }

    fn leaks(&self) -> Vec<String> {
        self.traces.values().map(LeaseTrace::describe).collect()
    }

    fn diagnostics(&self) -> String {
        let mut context = format!("{:?}", self.status());
        for lease in self.leaks() {
            context.push('\n');
            context.push_str(&lease);
        }
        context
    }
}

struct PoolInner {
    database: String,
    connection: Box<dyn Connection>,
    config: SessionPoolConfig,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = state.housekeeping.take() {
            handle.abort();
        }
    }
}

/// Removes the waiter's channel when the acquiring future completes or is dropped;
/// a session delivered in the meantime goes back to the pool.
struct Waiting<'a> {
    pool: &'a SessionPool,
    rx: oneshot::Receiver<Result<Session, Error>>,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(Ok(session)) = self.rx.try_recv() {
            self.pool.release(session, ReleaseOutcome::Reusable);
        }
    }
}

/// A bounded pool of sessions shared by every transaction of a [`Client`](crate::Client).
///
/// Idle sessions are split between sessions that have only been used for reads and sessions on which
/// a read-write transaction was begun. Leases are handed out most recently released first, waiters are
/// served in FIFO order and new sessions are created in batches of `inc_step`.
///
/// A background task evicts sessions idle for longer than `max_idle` (down to `min`) and pings sessions idle
/// for longer than `keep_alive`.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    /// Creates the pool and starts its housekeeping; must be called within a tokio runtime.
    /// The pool is empty until [`SessionPool::fill`] runs or sessions are acquired.
    pub fn new(database: &str, connection: Box<dyn Connection>, config: SessionPoolConfig) -> Self {
        let pool = SessionPool {
            inner: Arc::new(PoolInner {
                database: database.to_string(),
                connection,
                config,
                state: Mutex::new(PoolState {
                    open: true,
                    ..Default::default()
                }),
            }),
        };
        let handle = pool.start_housekeeping();
        pool.inner.state().housekeeping = Some(handle);
        pool
    }

    pub fn config(&self) -> &SessionPoolConfig {
        &self.inner.config
    }

    pub fn status(&self) -> PoolStatus {
        self.inner.state().status()
    }

    /// Leases a session for reading, preferring sessions that were never used for writes.
    ///
    /// The caller's location is recorded and reported if the session is never released.
    #[track_caller]
    pub fn acquire_read(
        &self,
        deadline: Option<Instant>,
    ) -> impl Future<Output = Result<Session, Error>> + Send + '_ {
        self.acquire(SessionKind::ReadOnly, deadline, Location::caller())
    }

    /// Leases a session for a read-write transaction, preferring prepared sessions.
    /// The returned session may be read-only, in which case the transaction begins inline.
    #[track_caller]
    pub fn acquire_write(
        &self,
        deadline: Option<Instant>,
    ) -> impl Future<Output = Result<Session, Error>> + Send + '_ {
        self.acquire(SessionKind::ReadWrite, deadline, Location::caller())
    }

    async fn acquire(
        &self,
        kind: SessionKind,
        deadline: Option<Instant>,
        location: &'static Location<'static>,
    ) -> Result<Session, Error> {
        let config = &self.inner.config;
        let deadline = match (deadline, config.acquire_timeout) {
            (Some(deadline), Some(timeout)) => Some(deadline.min(Instant::now() + timeout)),
            (deadline, timeout) => deadline.or_else(|| timeout.map(|t| Instant::now() + t)),
        };

        let (rx, expired, batch) = {
            let mut state = self.inner.state();
            if !state.open {
                return Err(Error::PoolClosed);
            }
            let (session, expired) = state.borrow(kind);
            if let Some(session) = session {
                let session = state.lease(session, location);
                drop(state);
                self.discard_expired(expired);
                return Ok(session);
            }
            if config.fail && state.size() + state.pending >= config.max {
                let context = state.diagnostics();
                drop(state);
                self.discard_expired(expired);
                return Err(Error::SessionPoolExhausted { context });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { tx, kind, location });
            let batch = state.next_batch(config);
            (rx, expired, batch)
        };
        self.discard_expired(expired);
        if let Some(count) = batch {
            self.spawn_create(count);
        }

        let mut waiting = Waiting { pool: self, rx };
        let received = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, &mut waiting.rx).await {
                Ok(received) => received,
                Err(_) => {
                    waiting.rx.close();
                    match waiting.rx.try_recv() {
                        Ok(received) => Ok(received),
                        Err(_) => {
                            return Err(Error::deadline("timed out waiting for a session", None))
                        }
                    }
                }
            },
            None => (&mut waiting.rx).await,
        };
        received.map_err(|_| Error::PoolClosed)?
    }

    /// Returns a leased session to the pool.
    pub fn release(&self, mut session: Session, outcome: ReleaseOutcome) {
        let config = &self.inner.config;
        let mut state = self.inner.state();
        state.unlease(&mut session);
        match outcome {
            ReleaseOutcome::NotFound => {
                info!("session {} is gone, replacing it", session.name());
                let replacement = state.replacement(config);
                drop(state);
                if let Some(count) = replacement {
                    self.spawn_create(count);
                }
            }
            ReleaseOutcome::Reusable if !state.open => {
                drop(state);
                self.spawn_delete(vec![session]);
            }
            ReleaseOutcome::Reusable => {
                session.touch();
                let prepare = session.kind() == SessionKind::ReadWrite
                    && !session.is_prepared()
                    && state.live_waiters() == 0
                    && state.prepared() < state.write_target(config);
                if prepare {
                    state.maintenance += 1;
                    state.preparing += 1;
                    drop(state);
                    self.spawn_prepare(vec![session]);
                } else {
                    state.check_in(session);
                }
            }
        }
    }

    /// Creates sessions until the pool holds `min`, then prepares the configured fraction for writes.
    pub async fn fill(&self) -> Result<(), Error> {
        let config = &self.inner.config;
        let count = {
            let mut state = self.inner.state();
            if !state.open {
                return Ok(());
            }
            let total = state.size() + state.pending;
            let count = config
                .min
                .saturating_sub(total)
                .min(config.max.saturating_sub(total));
            if count > 0 {
                state.pending += count;
                state.batches += 1;
            }
            count
        };
        if count > 0 {
            self.create_sessions(count).await?;
        }
        let sessions = self.inner.state().take_unprepared(config);
        self.prepare_sessions(sessions).await;
        Ok(())
    }

    /// Deletes sessions unused for longer than `max_idle`, coldest first, without going below `min`.
    pub async fn evict_idle(&self) {
        let config = &self.inner.config;
        let evicted = {
            let mut guard = self.inner.state();
            let state = &mut *guard;
            let evictable = state.size().saturating_sub(config.min);
            let mut candidates = state
                .read_only
                .iter()
                .chain(state.read_write.iter())
                .filter(|s| s.idle_for() >= config.max_idle)
                .map(|s| (s.idle_for(), s.name().to_string()))
                .collect::<Vec<_>>();
            candidates.sort_by(|a, b| b.0.cmp(&a.0));
            let names = candidates
                .into_iter()
                .take(evictable)
                .map(|(_, name)| name)
                .collect::<HashSet<String>>();
            let mut evicted = Vec::new();
            for idle in [&mut state.read_only, &mut state.read_write] {
                let (gone, kept): (Vec<Session>, Vec<Session>) =
                    idle.drain(..).partition(|s| names.contains(s.name()));
                *idle = kept.into();
                evicted.extend(gone);
            }
            evicted
        };
        if !evicted.is_empty() {
            info!("evicting {} idle session(s)", evicted.len());
            join_all(evicted.into_iter().map(|s| self.delete(s))).await;
        }
        if let Err(err) = self.fill().await {
            warn!("failed to refill the session pool: {}", err);
        }
    }

    /// Pings sessions unused for longer than `keep_alive` so the server keeps them.
    pub async fn ping_idle(&self) {
        let config = &self.inner.config;
        let (due, expired) = {
            let mut guard = self.inner.state();
            let state = &mut *guard;
            let mut due = Vec::new();
            let mut expired = Vec::new();
            for idle in [&mut state.read_only, &mut state.read_write] {
                let (stale, kept): (Vec<Session>, Vec<Session>) = idle
                    .drain(..)
                    .partition(|s| s.idle_for() >= config.keep_alive);
                *idle = kept.into();
                for session in stale {
                    if session.is_expired() {
                        expired.push(session);
                    } else {
                        due.push(session);
                    }
                }
            }
            state.maintenance += due.len();
            (due, expired)
        };
        self.discard_expired(expired);
        if !due.is_empty() {
            debug!("pinging {} idle session(s)", due.len());
            join_all(due.into_iter().map(|s| self.ping(s))).await;
        }
        if let Err(err) = self.fill().await {
            warn!("failed to refill the session pool: {}", err);
        }
    }

    /// Closes the pool: waiters fail, idle sessions are deleted and sessions still leased are reported as leaks.
    /// Leased sessions released afterwards are deleted.
    pub async fn close(&self) -> Result<(), Error> {
        let (idle, waiters, leaks, housekeeping) = {
            let mut state = self.inner.state();
            state.open = false;
            let mut idle = state.read_only.drain(..).collect::<Vec<_>>();
            idle.extend(state.read_write.drain(..));
            let waiters = state.waiters.drain(..).collect::<Vec<_>>();
            (idle, waiters, state.leaks(), state.housekeeping.take())
        };
        if let Some(handle) = housekeeping {
            handle.abort();
        }
        for waiter in waiters {
            let _ = waiter.tx.send(Err(Error::PoolClosed));
        }
        info!("closing session pool, deleting {} idle session(s)", idle.len());
        join_all(idle.into_iter().map(|s| self.delete(s))).await;
        if leaks.is_empty() {
            Ok(())
        } else {
            warn!("{} session(s) were not released", leaks.len());
            Err(Error::SessionLeak(leaks))
        }
    }

    fn start_housekeeping(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let evict_every = self.inner.config.max_idle.max(Duration::from_secs(1));
        let ping_every = self.inner.config.keep_alive.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let start = Instant::now();
            let mut evict = tokio::time::interval_at(start + evict_every, evict_every);
            let mut ping = tokio::time::interval_at(start + ping_every, ping_every);
            loop {
                let evicting = tokio::select! {
                    _ = evict.tick() => true,
                    _ = ping.tick() => false,
                };
                let pool = match weak.upgrade() {
                    Some(inner) => SessionPool { inner },
                    None => break,
                };
                if evicting {
                    pool.evict_idle().await;
                } else {
                    pool.ping_idle().await;
                }
            }
        })
    }

    fn spawn_create(&self, count: usize) {
        let pool = self.clone();
        tokio::spawn(async move {
            if pool.create_sessions(count).await.is_ok() {
                let sessions = pool.inner.state().take_unprepared(&pool.inner.config);
                pool.prepare_sessions(sessions).await;
            }
        });
    }

    /// Creates `count` sessions already reserved as pending, possibly over several requests.
    async fn create_sessions(&self, count: usize) -> Result<(), Error> {
        let config = &self.inner.config;
        let mut connection = self.inner.connection.clone();
        let mut remaining = count;
        let result = loop {
            if remaining == 0 {
                break Ok(());
            }
            let request =
                requests::batch_create_sessions(&self.inner.database, remaining, &config.labels);
            match connection.batch_create_sessions(request).await {
                Ok(response) if response.session.is_empty() => {
                    break Err(Error::Client("no session was created".to_string()))
                }
                Ok(response) => {
                    let created = response
                        .session
                        .into_iter()
                        .take(remaining)
                        .map(Session::from)
                        .collect::<Vec<_>>();
                    remaining -= created.len();
                    debug!("created {} session(s)", created.len());
                    self.add_created(created);
                }
                Err(err) => break Err(err),
            }
        };

        let next = {
            let mut state = self.inner.state();
            state.batches = state.batches.saturating_sub(1);
            match &result {
                Ok(()) if state.open => state.next_batch(config),
                Ok(()) => None,
                Err(err) => {
                    warn!("failed to create {} session(s): {}", remaining, err);
                    state.pending -= remaining;
                    let unserved = state.live_waiters().saturating_sub(state.pending);
                    let mut failed = 0;
                    while failed < unserved.min(remaining) {
                        match state.waiters.pop_front() {
                            Some(waiter) if waiter.tx.is_closed() => {}
                            Some(waiter) => {
                                let _ = waiter.tx.send(Err(duplicate(err)));
                                failed += 1;
                            }
                            None => break,
                        }
                    }
                    // the waiters left behind still need sessions
                    if state.open {
                        state.next_batch(config)
                    } else {
                        None
                    }
                }
            }
        };
        if let Some(count) = next {
            self.spawn_create(count);
        }
        result
    }

    fn add_created(&self, sessions: Vec<Session>) {
        let mut closed = Vec::new();
        {
            let mut state = self.inner.state();
            for session in sessions {
                state.pending -= 1;
                if state.open {
                    state.check_in(session);
                } else {
                    closed.push(session);
                }
            }
        }
        self.spawn_delete(closed);
    }

    fn spawn_prepare(&self, sessions: Vec<Session>) {
        let pool = self.clone();
        tokio::spawn(async move { pool.prepare_sessions(sessions).await });
    }

    async fn prepare_sessions(&self, sessions: Vec<Session>) {
        if !sessions.is_empty() {
            debug!("preparing {} session(s) for writes", sessions.len());
            join_all(sessions.into_iter().map(|s| self.prepare(s))).await;
        }
    }

    /// Begins a read-write transaction on a session counted as in maintenance.
    async fn prepare(&self, mut session: Session) {
        let mut connection = self.inner.connection.clone();
        let request = requests::begin_transaction(
            session.name(),
            requests::read_write_options(false),
            None,
        );
        let outcome = match connection.begin_transaction(request).await {
            Ok(transaction) => {
                session.prepare(transaction, false);
                ReleaseOutcome::Reusable
            }
            Err(err) if err.is_session_not_found() => ReleaseOutcome::NotFound,
            Err(err) => {
                warn!("failed to prepare session {}: {}", session.name(), err);
                session.mark_read_write();
                ReleaseOutcome::Reusable
            }
        };
        self.end_maintenance(session, outcome, true);
    }

    async fn ping(&self, mut session: Session) {
        let mut connection = self.inner.connection.clone();
        let request = requests::execute_sql(
            session.name(),
            requests::single_use(requests::read_only_options(&TimestampBound::Strong)),
            &Statement::new("SELECT 1"),
            None,
            None,
        );
        let outcome = match connection.execute_sql(request).await {
            Ok(_) => {
                session.touch();
                ReleaseOutcome::Reusable
            }
            Err(err) if err.is_session_not_found() => ReleaseOutcome::NotFound,
            Err(err) => {
                warn!("failed to ping session {}: {}", session.name(), err);
                ReleaseOutcome::Reusable
            }
        };
        self.end_maintenance(session, outcome, false);
    }

    fn end_maintenance(&self, session: Session, outcome: ReleaseOutcome, preparing: bool) {
        let config = &self.inner.config;
        let mut state = self.inner.state();
        state.maintenance -= 1;
        if preparing {
            state.preparing -= 1;
        }
        match outcome {
            ReleaseOutcome::NotFound => {
                info!("session {} is gone, replacing it", session.name());
                let replacement = state.replacement(config);
                drop(state);
                if let Some(count) = replacement {
                    self.spawn_create(count);
                }
            }
            ReleaseOutcome::Reusable if state.open => state.check_in(session),
            ReleaseOutcome::Reusable => {
                drop(state);
                self.spawn_delete(vec![session]);
            }
        }
    }

    /// Deletes expired sessions and creates their replacements.
    fn discard_expired(&self, expired: Vec<Session>) {
        if expired.is_empty() {
            return;
        }
        info!("discarding {} expired session(s)", expired.len());
        let pool = self.clone();
        tokio::spawn(async move {
            join_all(expired.into_iter().map(|s| pool.delete(s))).await;
            if let Err(err) = pool.fill().await {
                warn!("failed to refill the session pool: {}", err);
            }
        });
    }

    fn spawn_delete(&self, sessions: Vec<Session>) {
        if sessions.is_empty() {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            join_all(sessions.into_iter().map(|s| pool.delete(s))).await;
        });
    }

    async fn delete(&self, session: Session) {
        let mut connection = self.inner.connection.clone();
        match connection
            .delete_session(requests::delete_session(session.name()))
            .await
        {
            Ok(()) => debug!("deleted session {} after {:?}", session.name(), session.age()),
            Err(err) => debug!("failed to delete session {}: {}", session.name(), err),
        }
    }
}

/// Sessions leased for reads no longer hold the transaction prepared for writes: any other transaction begun on
/// the session invalidates it.
fn drop_prepared(session: &mut Session, kind: SessionKind) {
    if kind == SessionKind::ReadOnly && session.take_prepared().is_some() {
        debug!(
            "dropping the prepared transaction of session {}, leased for reads",
            session.name()
        );
    }
}

/// Copies an error that must be reported to several waiters.
fn duplicate(err: &Error) -> Error {
    match err {
        Error::Status(status) => Error::Status(tonic::Status::with_details_and_metadata(
            status.code(),
            status.message(),
            prost::bytes::Bytes::copy_from_slice(status.details()),
            status.metadata().clone(),
        )),
        other => Error::Client(other.to_string()),
    }
}

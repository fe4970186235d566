use std::collections::HashMap;
use std::time::Duration;

use derive_builder::Builder;
use rand::Rng;

use crate::{Client, Connection, DatabaseId, Error};

const DEFAULT_MIN_SESSIONS: usize = 25;
const DEFAULT_MAX_SESSIONS: usize = 100;
const DEFAULT_INC_STEP: usize = 25;
const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(10 * 60);
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30 * 60);

/// Configuration of the session pool.
///
/// ```
/// # use spanner_core::SessionPoolConfig;
/// let config = SessionPoolConfig::builder()
///     .min(2)
///     .max(4)
///     .inc_step(1)
///     .build()
///     .unwrap();
/// assert_eq!(config.max, 4);
/// ```
#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(
    pattern = "owned",
    build_fn(validate = "Self::validate", error = "crate::Error")
)]
pub struct SessionPoolConfig {
    /// Number of sessions the pool creates at startup and maintains afterwards.
    #[builder(default = "DEFAULT_MIN_SESSIONS")]
    pub min: usize,
    /// Upper bound of sessions, idle or leased.
    #[builder(default = "DEFAULT_MAX_SESSIONS")]
    pub max: usize,
    /// Number of sessions created by a single batch when the pool grows.
    #[builder(default = "DEFAULT_INC_STEP")]
    pub inc_step: usize,
    /// Maximum number of session creation batches in flight.
    #[builder(default = "DEFAULT_CONCURRENCY")]
    pub concurrency: usize,
    /// When true, acquiring from an exhausted pool fails immediately instead of waiting.
    #[builder(default)]
    pub fail: bool,
    /// Sessions unused for this long are evicted, down to `min`.
    #[builder(default = "DEFAULT_MAX_IDLE")]
    pub max_idle: Duration,
    /// Idle sessions unused for this long are pinged.
    #[builder(default = "DEFAULT_KEEP_ALIVE")]
    pub keep_alive: Duration,
    /// Bound on the time spent waiting for a session, in addition to the caller's deadline.
    #[builder(default, setter(strip_option))]
    pub acquire_timeout: Option<Duration>,
    /// Labels applied to every session created by the pool.
    #[builder(default)]
    pub labels: HashMap<String, String>,
    /// Fraction of `min` kept ready with a begun read-write transaction, between 0 and 1.
    #[builder(default)]
    pub write_sessions: f64,
}

impl SessionPoolConfig {
    pub fn builder() -> SessionPoolConfigBuilder {
        SessionPoolConfigBuilder::default()
    }
}

impl SessionPoolConfigBuilder {
    fn validate(&self) -> Result<(), Error> {
        let min = self.min.unwrap_or(DEFAULT_MIN_SESSIONS);
        let max = self.max.unwrap_or(DEFAULT_MAX_SESSIONS);
        if max == 0 {
            return Err(Error::Config("max sessions must be positive".to_string()));
        }
        if min > max {
            return Err(Error::Config(format!(
                "min sessions ({}) must not exceed max sessions ({})",
                min, max
            )));
        }
        if self.inc_step == Some(0) {
            return Err(Error::Config("inc_step must be positive".to_string()));
        }
        if self.concurrency == Some(0) {
            return Err(Error::Config("concurrency must be positive".to_string()));
        }
        match self.write_sessions {
            Some(writes) if !(0.0..=1.0).contains(&writes) => Err(Error::Config(format!(
                "write_sessions must be between 0.0 and 1.0, got {}",
                writes
            ))),
            _ => Ok(()),
        }
    }
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_SESSIONS,
            max: DEFAULT_MAX_SESSIONS,
            inc_step: DEFAULT_INC_STEP,
            concurrency: DEFAULT_CONCURRENCY,
            fail: false,
            max_idle: DEFAULT_MAX_IDLE,
            keep_alive: DEFAULT_KEEP_ALIVE,
            acquire_timeout: None,
            labels: HashMap::new(),
            write_sessions: 0.0,
        }
    }
}

impl From<derive_builder::UninitializedFieldError> for Error {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Backoff policy of retried transactions and retry budget of individual RPCs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to every backoff.
    pub jitter: Duration,
    /// Number of attempts of a single RPC failing with `UNAVAILABLE`, including the first one.
    pub max_rpc_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(32),
            jitter: Duration::from_secs(1),
            max_rpc_attempts: 3,
        }
    }
}

impl RetryConfig {
    /// The delay before the retry following `attempt` failed attempts (starting at 0).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_secs_f64(exponential.min(self.max_delay.as_secs_f64()));
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..self.jitter)
        };
        delay + jitter
    }
}

/// Limits of the streaming result decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Number of times a stream may be resumed after a transient error before giving up.
    pub max_resume_attempts: usize,
    /// Number of rows held back while waiting for a resume token.
    /// Past this, rows are handed out and the stream cannot resume until the next token.
    pub max_buffered_rows: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_resume_attempts: 20,
            max_buffered_rows: 1024,
        }
    }
}

/// Configuration of a [`Client`].
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Config {
    pub(crate) database: Option<DatabaseId>,
    pub(crate) session_pool: SessionPoolConfig,
    pub(crate) retry: RetryConfig,
    pub(crate) stream: StreamConfig,
}

impl Config {
    pub fn database(mut self, database: DatabaseId) -> Self {
        self.database = Some(database);
        self
    }

    pub fn session_pool(mut self, session_pool: SessionPoolConfig) -> Self {
        self.session_pool = session_pool;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Creates the client and fills its session pool through the provided connection.
    pub async fn connect<C>(self, connection: C) -> Result<Client, Error>
    where
        C: Connection + 'static,
    {
        Client::connect(self, Box::new(connection)).await
    }
}

//! Engine configuration.
//!
//! All values are process-wide and fixed at startup. Each component takes its
//! own config struct; [`EngineConfig`] groups them and [`ConfigFile`] loads
//! them from `config.ini`.

mod file;

use std::time::Duration;

use thiserror::Error;

use crate::scheduler::RetryPolicy;

pub use file::{config_file_path, ConfigFile, LogConfig, StorageConfig, UpstreamConfig};

/// Default upstream requests allowed per sliding minute.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 30;

/// Default upstream requests allowed per sliding 24 hours.
pub const DEFAULT_REQUESTS_PER_DAY: u32 = 4_000;

/// Default number of upstream calls in flight at once.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

/// Default timeout for one upstream call.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 8;

/// Longest a caller will wait for a rate window slot before being rejected.
pub const DEFAULT_MAX_QUEUE_WAIT_SECS: u64 = 90;

/// Default attempts per upstream call (initial attempt included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default first backoff delay.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Default backoff cap.
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 8;

/// Default identifiers per upstream batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default pause between batches of one sync.
pub const DEFAULT_INTER_BATCH_DELAY_MS: u64 = 500;

/// Default interval between polls of the selected manufacturer.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default age after which an active aircraft is considered gone (2 hours).
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 2 * 60 * 60;

/// Default sweep interval (5 minutes).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5 * 60;

/// Default compaction frequency: one sweep in this many.
pub const DEFAULT_COMPACTION_ONE_IN: u32 = 5;

/// Default fleet cache freshness.
pub const DEFAULT_CACHE_FRESH_TTL_SECS: u64 = 5 * 60;

/// Default fleet cache hard expiry.
pub const DEFAULT_CACHE_EXPIRY_TTL_SECS: u64 = 60 * 60;

/// Default fleet cache capacity (manufacturers).
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 1_024;

/// Default window during which a settled result is replayed to repeat callers.
pub const DEFAULT_COALESCE_GRACE_MS: u64 = 2_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: ini::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {section}.{key}: '{value}'")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Rate-limited scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    pub max_queue_wait: Duration,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            requests_per_day: DEFAULT_REQUESTS_PER_DAY,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_queue_wait: Duration::from_secs(DEFAULT_MAX_QUEUE_WAIT_SECS),
            retry: RetryPolicy::exponential(
                DEFAULT_MAX_ATTEMPTS,
                Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
                Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            ),
        }
    }
}

impl SchedulerConfig {
    pub fn with_requests_per_minute(mut self, n: u32) -> Self {
        self.requests_per_minute = n;
        self
    }

    pub fn with_requests_per_day(mut self, n: u32) -> Self {
        self.requests_per_day = n;
        self
    }

    pub fn with_max_concurrent_requests(mut self, n: usize) -> Self {
        self.max_concurrent_requests = n;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_queue_wait(mut self, wait: Duration) -> Self {
        self.max_queue_wait = wait;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// TTL cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub fresh_ttl: Duration,
    pub expiry_ttl: Duration,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_ttl: Duration::from_secs(DEFAULT_CACHE_FRESH_TTL_SECS),
            expiry_ttl: Duration::from_secs(DEFAULT_CACHE_EXPIRY_TTL_SECS),
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub fn with_ttls(mut self, fresh: Duration, expiry: Duration) -> Self {
        self.fresh_ttl = fresh;
        self.expiry_ttl = expiry;
        self
    }

    pub fn with_max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }
}

/// Batch fetch orchestrator settings.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub poll_interval: Duration,
    /// Grace window for coalesced syncs and batch fetches.
    pub coalesce_grace: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inter_batch_delay: Duration::from_millis(DEFAULT_INTER_BATCH_DELAY_MS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            coalesce_grace: Duration::from_millis(DEFAULT_COALESCE_GRACE_MS),
        }
    }
}

impl TrackerConfig {
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    pub fn with_inter_batch_delay(mut self, delay: Duration) -> Self {
        self.inter_batch_delay = delay;
        self
    }

    pub fn with_coalesce_grace(mut self, grace: Duration) -> Self {
        self.coalesce_grace = grace;
        self
    }
}

/// Staleness sweeper settings.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub stale_threshold: Duration,
    pub interval: Duration,
    /// Compact on one sweep in `n` on average; 0 never, 1 always.
    pub compaction_one_in: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(DEFAULT_STALE_THRESHOLD_SECS),
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            compaction_one_in: DEFAULT_COMPACTION_ONE_IN,
        }
    }
}

impl SweeperConfig {
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_compaction_one_in(mut self, n: u32) -> Self {
        self.compaction_one_in = n;
        self
    }
}

/// All engine settings.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub tracker: TrackerConfig,
    pub sweeper: SweeperConfig,
}

impl EngineConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.requests_per_minute == 0 || self.scheduler.requests_per_day == 0 {
            return Err(ConfigError::Invalid(
                "request ceilings must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.requests_per_minute > self.scheduler.requests_per_day {
            return Err(ConfigError::Invalid(
                "requests_per_minute cannot exceed requests_per_day".to_string(),
            ));
        }
        if self.scheduler.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_requests must be greater than zero".to_string(),
            ));
        }
        if self.scheduler.retry.max_attempts() == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.tracker.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.cache.fresh_ttl >= self.cache.expiry_ttl {
            return Err(ConfigError::Invalid(format!(
                "cache fresh TTL ({:?}) must be shorter than expiry TTL ({:?})",
                self.cache.fresh_ttl, self.cache.expiry_ttl
            )));
        }
        if self.sweeper.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

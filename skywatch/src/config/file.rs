//! `config.ini` loading.
//!
//! ```ini
//! [upstream]
//! base_url = https://opensky-network.org/api
//! requests_per_minute = 30
//!
//! [tracking]
//! batch_size = 100
//!
//! [sweeper]
//! stale_threshold_secs = 7200
//! ```
//!
//! Keys that are absent keep their defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;

use super::{ConfigError, EngineConfig};
use crate::scheduler::RetryPolicy;

/// Default upstream API root.
pub const DEFAULT_UPSTREAM_URL: &str = "https://opensky-network.org/api";

/// Default database file name inside the data directory.
pub const DEFAULT_DATABASE_FILE: &str = "skywatch.db";

/// Path of the user configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skywatch")
        .join("config.ini")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skywatch")
}

/// Upstream position API settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            username: None,
            password: None,
        }
    }
}

/// Durable storage settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join(DEFAULT_DATABASE_FILE),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    /// Directory for a daily-rolling log file; stderr only when `None`.
    pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// Everything read from `config.ini`.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub engine: EngineConfig,
    pub upstream: UpstreamConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl ConfigFile {
    /// Load from the default location; a missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Parse from INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Read {
            path: "<string>".to_string(),
            source: ini::Error::Parse(e),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let defaults = EngineConfig::default();

        // [upstream]
        if let Some(url) = get(ini, "upstream", "base_url") {
            config.upstream.base_url = url.trim_end_matches('/').to_string();
        }
        config.upstream.username = get(ini, "upstream", "username").map(str::to_string);
        config.upstream.password = get(ini, "upstream", "password").map(str::to_string);

        let scheduler = &mut config.engine.scheduler;
        scheduler.requests_per_minute = parse_or(
            ini,
            "upstream",
            "requests_per_minute",
            defaults.scheduler.requests_per_minute,
        )?;
        scheduler.requests_per_day = parse_or(
            ini,
            "upstream",
            "requests_per_day",
            defaults.scheduler.requests_per_day,
        )?;
        scheduler.max_concurrent_requests = parse_or(
            ini,
            "upstream",
            "max_concurrent",
            defaults.scheduler.max_concurrent_requests,
        )?;
        scheduler.request_timeout = secs_or(
            ini,
            "upstream",
            "timeout_secs",
            defaults.scheduler.request_timeout,
        )?;
        scheduler.max_queue_wait = secs_or(
            ini,
            "upstream",
            "max_queue_wait_secs",
            defaults.scheduler.max_queue_wait,
        )?;

        let (def_attempts, def_base, def_cap) = match defaults.scheduler.retry {
            RetryPolicy::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                ..
            } => (max_attempts, initial_delay, max_delay),
            ref other => (other.max_attempts(), Duration::ZERO, Duration::ZERO),
        };
        let attempts = parse_or(ini, "upstream", "max_attempts", def_attempts)?;
        let base = millis_or(ini, "upstream", "backoff_base_ms", def_base)?;
        let cap = secs_or(ini, "upstream", "backoff_max_secs", def_cap)?;
        scheduler.retry = RetryPolicy::exponential(attempts, base, cap);

        // [tracking]
        let tracker = &mut config.engine.tracker;
        tracker.batch_size = parse_or(ini, "tracking", "batch_size", defaults.tracker.batch_size)?;
        tracker.inter_batch_delay = millis_or(
            ini,
            "tracking",
            "inter_batch_delay_ms",
            defaults.tracker.inter_batch_delay,
        )?;
        tracker.poll_interval = secs_or(
            ini,
            "tracking",
            "poll_interval_secs",
            defaults.tracker.poll_interval,
        )?;
        tracker.coalesce_grace = millis_or(
            ini,
            "tracking",
            "coalesce_grace_ms",
            defaults.tracker.coalesce_grace,
        )?;

        // [cache]
        let cache = &mut config.engine.cache;
        cache.fresh_ttl = secs_or(ini, "cache", "fresh_ttl_secs", defaults.cache.fresh_ttl)?;
        cache.expiry_ttl = secs_or(ini, "cache", "expiry_ttl_secs", defaults.cache.expiry_ttl)?;
        cache.max_entries = parse_or(ini, "cache", "max_entries", defaults.cache.max_entries)?;

        // [sweeper]
        let sweeper = &mut config.engine.sweeper;
        sweeper.stale_threshold = secs_or(
            ini,
            "sweeper",
            "stale_threshold_secs",
            defaults.sweeper.stale_threshold,
        )?;
        sweeper.interval = secs_or(ini, "sweeper", "interval_secs", defaults.sweeper.interval)?;
        sweeper.compaction_one_in = parse_or(
            ini,
            "sweeper",
            "compaction_one_in",
            defaults.sweeper.compaction_one_in,
        )?;

        // [storage]
        if let Some(path) = get(ini, "storage", "database_path") {
            config.storage.database_path = PathBuf::from(path);
        }

        // [logging]
        if let Some(level) = get(ini, "logging", "level") {
            config.log.level = level.to_string();
        }
        config.log.directory = get(ini, "logging", "directory").map(PathBuf::from);

        config.engine.validate()?;
        Ok(config)
    }

    /// Render the effective settings as INI.
    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        let s = &self.engine.scheduler;
        ini.with_section(Some("upstream"))
            .set("base_url", self.upstream.base_url.as_str())
            .set("requests_per_minute", s.requests_per_minute.to_string())
            .set("requests_per_day", s.requests_per_day.to_string())
            .set("max_concurrent", s.max_concurrent_requests.to_string())
            .set("timeout_secs", s.request_timeout.as_secs().to_string())
            .set("max_queue_wait_secs", s.max_queue_wait.as_secs().to_string())
            .set("max_attempts", s.retry.max_attempts().to_string());
        if let RetryPolicy::ExponentialBackoff {
            initial_delay,
            max_delay,
            ..
        } = &s.retry
        {
            ini.with_section(Some("upstream"))
                .set("backoff_base_ms", initial_delay.as_millis().to_string())
                .set("backoff_max_secs", max_delay.as_secs().to_string());
        }
        if let Some(user) = &self.upstream.username {
            ini.with_section(Some("upstream")).set("username", user.as_str());
        }

        let t = &self.engine.tracker;
        ini.with_section(Some("tracking"))
            .set("batch_size", t.batch_size.to_string())
            .set(
                "inter_batch_delay_ms",
                t.inter_batch_delay.as_millis().to_string(),
            )
            .set("poll_interval_secs", t.poll_interval.as_secs().to_string())
            .set("coalesce_grace_ms", t.coalesce_grace.as_millis().to_string());

        let c = &self.engine.cache;
        ini.with_section(Some("cache"))
            .set("fresh_ttl_secs", c.fresh_ttl.as_secs().to_string())
            .set("expiry_ttl_secs", c.expiry_ttl.as_secs().to_string())
            .set("max_entries", c.max_entries.to_string());

        let w = &self.engine.sweeper;
        ini.with_section(Some("sweeper"))
            .set("stale_threshold_secs", w.stale_threshold.as_secs().to_string())
            .set("interval_secs", w.interval.as_secs().to_string())
            .set("compaction_one_in", w.compaction_one_in.to_string());

        ini.with_section(Some("storage")).set(
            "database_path",
            self.storage.database_path.display().to_string(),
        );

        ini.with_section(Some("logging"))
            .set("level", self.log.level.as_str());
        if let Some(dir) = &self.log.directory {
            ini.with_section(Some("logging"))
                .set("directory", dir.display().to_string());
        }
        ini
    }

    /// Write the effective settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        self.to_ini().write_to_file(path).map_err(write_err)
    }
}

fn get<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    ini.section(Some(section))
        .and_then(|props| props.get(key))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_or<T: FromStr>(ini: &Ini, section: &str, key: &str, default: T) -> Result<T, ConfigError> {
    match get(ini, section, key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn secs_or(ini: &Ini, section: &str, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_or(ini, section, key, default.as_secs()).map(Duration::from_secs)
}

fn millis_or(
    ini: &Ini,
    section: &str,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(ini, section, key, default.as_millis() as u64).map(Duration::from_millis)
}

//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, DatabaseOverride, LoggingOverrides, MigrateArgs, ReplayArgs, ServeArgs,
    ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "murmur";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u64 = 8;
const DEFAULT_RECENT_POSTS_LIMIT: u64 = 50;
const DEFAULT_CACHE_MAX_KEYS: u64 = 100_000;
const DEFAULT_FANOUT_CONCURRENCY: u64 = 4;
const DEFAULT_FANOUT_MAX_ATTEMPTS: u64 = 10;
const DEFAULT_FANOUT_POLL_INTERVAL_MS: u64 = 50;
const DEFAULT_FANOUT_SWEEP_INTERVAL_MS: u64 = 5_000;
const DEFAULT_FANOUT_PENDING_GRACE_MS: u64 = 30_000;
const DEFAULT_FANOUT_SWEEP_BATCH: u64 = 500;
const DEFAULT_FEED_PAGE_SIZE: u64 = 20;
const DEFAULT_FEED_MAX_PAGE_SIZE: u64 = 100;
const DEFAULT_AUTHOR_FETCH_TIMEOUT_MS: u64 = 250;
const DEFAULT_MAX_CONCURRENT_FETCHES: u64 = 32;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub fanout: FanoutSettings,
    pub feed: FeedSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Per-author bound on the recent-posts list.
    pub recent_posts_limit: NonZeroUsize,
    pub max_keys: NonZeroUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutBackend {
    /// Durable apalis jobs in PostgreSQL.
    Postgres,
    /// In-process queue; events are lost on restart.
    Memory,
}

impl FromStr for FanoutBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend `{other}` (expected postgres or memory)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FanoutSettings {
    pub backend: FanoutBackend,
    pub concurrency: NonZeroUsize,
    pub max_attempts: NonZeroU32,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    /// Age a publication must reach before the sweeper re-enqueues it.
    pub pending_grace: Duration,
    pub sweep_batch: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub default_page_size: NonZeroU32,
    pub max_page_size: NonZeroU32,
    pub author_fetch_timeout_ms: NonZeroU64,
    pub max_concurrent_fetches: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("MURMUR").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        Some(Command::Replay(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    fanout: RawFanoutSettings,
    feed: RawFeedSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(backend) = overrides.fanout_backend.as_ref() {
            self.fanout.backend = Some(backend.clone());
        }
        if let Some(concurrency) = overrides.fanout_concurrency {
            self.fanout.concurrency = Some(concurrency);
        }
        self.apply_database_override(&overrides.database);
        self.apply_logging_overrides(&overrides.logging);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.format = Some(if json { "json" } else { "compact" }.to_string());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            fanout,
            feed,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            fanout: build_fanout_settings(fanout)?,
            feed: build_feed_settings(feed)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.host", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = match logging.format.as_deref().map(str::trim) {
        None | Some("compact") => LogFormat::Compact,
        Some("json") => LogFormat::Json,
        Some(other) => {
            return Err(LoadError::invalid(
                "logging.format",
                format!("unknown format `{other}` (expected compact or json)"),
            ));
        }
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let recent_posts_limit = non_zero_usize(
        cache
            .recent_posts_limit
            .unwrap_or(DEFAULT_RECENT_POSTS_LIMIT),
        "cache.recent_posts_limit",
    )?;
    let max_keys = non_zero_usize(
        cache.max_keys.unwrap_or(DEFAULT_CACHE_MAX_KEYS),
        "cache.max_keys",
    )?;

    Ok(CacheSettings {
        recent_posts_limit,
        max_keys,
    })
}

fn build_fanout_settings(fanout: RawFanoutSettings) -> Result<FanoutSettings, LoadError> {
    let backend = match fanout.backend {
        Some(value) => FanoutBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("fanout.backend", reason))?,
        None => FanoutBackend::Postgres,
    };
    let concurrency = non_zero_usize(
        fanout.concurrency.unwrap_or(DEFAULT_FANOUT_CONCURRENCY),
        "fanout.concurrency",
    )?;
    let max_attempts = non_zero_u32(
        fanout.max_attempts.unwrap_or(DEFAULT_FANOUT_MAX_ATTEMPTS),
        "fanout.max_attempts",
    )?;
    let poll_ms = fanout
        .poll_interval_ms
        .unwrap_or(DEFAULT_FANOUT_POLL_INTERVAL_MS);
    if poll_ms == 0 {
        return Err(LoadError::invalid(
            "fanout.poll_interval_ms",
            "must be greater than zero",
        ));
    }

    let sweep_interval_ms = NonZeroU64::new(
        fanout
            .sweep_interval_ms
            .unwrap_or(DEFAULT_FANOUT_SWEEP_INTERVAL_MS),
    )
    .ok_or_else(|| LoadError::invalid("fanout.sweep_interval_ms", "must be greater than zero"))?;
    let sweep_batch = non_zero_u32(
        fanout.sweep_batch.unwrap_or(DEFAULT_FANOUT_SWEEP_BATCH),
        "fanout.sweep_batch",
    )?;

    Ok(FanoutSettings {
        backend,
        concurrency,
        max_attempts,
        poll_interval: Duration::from_millis(poll_ms),
        sweep_interval: Duration::from_millis(sweep_interval_ms.get()),
        pending_grace: Duration::from_millis(
            fanout
                .pending_grace_ms
                .unwrap_or(DEFAULT_FANOUT_PENDING_GRACE_MS),
        ),
        sweep_batch,
    })
}

fn build_feed_settings(feed: RawFeedSettings) -> Result<FeedSettings, LoadError> {
    let default_page_size = non_zero_u32(
        feed.default_page_size.unwrap_or(DEFAULT_FEED_PAGE_SIZE),
        "feed.default_page_size",
    )?;
    let max_page_size = non_zero_u32(
        feed.max_page_size.unwrap_or(DEFAULT_FEED_MAX_PAGE_SIZE),
        "feed.max_page_size",
    )?;
    if default_page_size > max_page_size {
        return Err(LoadError::invalid(
            "feed.default_page_size",
            format!("must not exceed feed.max_page_size ({max_page_size})"),
        ));
    }

    let author_fetch_timeout_ms = NonZeroU64::new(
        feed.author_fetch_timeout_ms
            .unwrap_or(DEFAULT_AUTHOR_FETCH_TIMEOUT_MS),
    )
    .ok_or_else(|| {
        LoadError::invalid("feed.author_fetch_timeout_ms", "must be greater than zero")
    })?;
    let max_concurrent_fetches = non_zero_usize(
        feed.max_concurrent_fetches
            .unwrap_or(DEFAULT_MAX_CONCURRENT_FETCHES),
        "feed.max_concurrent_fetches",
    )?;

    Ok(FeedSettings {
        default_page_size,
        max_page_size,
        author_fetch_timeout_ms,
        max_concurrent_fetches,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    recent_posts_limit: Option<u64>,
    max_keys: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFanoutSettings {
    backend: Option<String>,
    concurrency: Option<u64>,
    max_attempts: Option<u64>,
    poll_interval_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
    pending_grace_ms: Option<u64>,
    sweep_batch: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedSettings {
    default_page_size: Option<u64>,
    max_page_size: Option<u64>,
    author_fetch_timeout_ms: Option<u64>,
    max_concurrent_fetches: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

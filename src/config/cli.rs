use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const DEFAULT_REPLAY_LIMIT: u32 = 10_000;

/// Command-line arguments for the murmur binary.
#[derive(Debug, Parser)]
#[command(name = "murmur", version, about = "Social feed fan-out and read-merge service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MURMUR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the HTTP API and run fan-out consumers in-process.
    Serve(Box<ServeArgs>),
    /// Apply the database schema and job tables.
    Migrate(MigrateArgs),
    /// Re-enqueue fan-out events for publications stored since a point in time.
    Replay(ReplayArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown budget.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the fan-out queue backend (postgres|memory).
    #[arg(long = "fanout-backend", value_name = "BACKEND")]
    pub fanout_backend: Option<String>,

    /// Override the fan-out worker concurrency.
    #[arg(long = "fanout-concurrency", value_name = "COUNT")]
    pub fanout_concurrency: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Clone)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Replay publications at or after this RFC 3339 timestamp.
    #[arg(long, value_name = "RFC3339", value_parser = parse_rfc3339)]
    pub since: OffsetDateTime,

    /// Maximum number of publications to replay.
    #[arg(long, default_value_t = DEFAULT_REPLAY_LIMIT)]
    pub limit: u32,
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|err| format!("invalid timestamp: {err}"))
}

//! CLI argument parsing, validation, and startup helpers.

use std::time::Duration;

use crate::ServerConfig;
use crate::auth::ReplayPolicy;
use crate::db::Database;
use crate::hub::WsTimeouts;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "carecrm=info,tower_http=info";

/// Environment name that disables `.env` loading.
pub const PRODUCTION_ENV: &str = "production";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "carecrm",
    about = "CRM backend with token auth, live notifications and reminders"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Deployment environment. `.env` is not loaded in production
    #[arg(long = "env", env = "ENV", default_value = "development")]
    pub environment: String,

    /// Path to SQLite database file (":memory:" for a throwaway database)
    #[arg(short, long, env = "DB_NAME", default_value = "carecrm.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Access token lifetime in hours
    #[arg(long, env = "JWT_ACCESS_TTL", default_value = "24",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub jwt_access_ttl: u64,

    /// Refresh token lifetime in days
    #[arg(long, env = "JWT_REFRESH_TTL", default_value = "7",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub jwt_refresh_ttl: u64,

    /// Seconds between expired refresh token purges
    #[arg(long, env = "REAPER_INTERVAL_SECS", default_value = "3600",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub reaper_interval_secs: u64,

    /// Seconds between due reminder scans
    #[arg(long, env = "REMINDER_INTERVAL_SECS", default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub reminder_interval_secs: u64,

    /// What to do when a rotated refresh token is presented again
    #[arg(long, env = "REFRESH_REPLAY_POLICY", value_enum, default_value = "reject")]
    pub replay_policy: ReplayPolicy,

    /// Log output format
    #[arg(short, long, env = "LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Whether `.env` should be loaded for the given `ENV` value.
pub fn should_load_dotenv(environment: Option<&str>) -> bool {
    environment != Some(PRODUCTION_ENV)
}

/// Initialize logging based on the specified format. `RUST_LOG` overrides
/// [`DEFAULT_LOG_FILTER`].
pub fn init_logging(format: &LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    validate_jwt_secret(&secret).then_some(secret)
}

fn validate_jwt_secret(secret: &str) -> bool {
    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return false;
    }
    true
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt_secret: String) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        access_ttl: Duration::from_secs(args.jwt_access_ttl * 60 * 60),
        refresh_ttl: Duration::from_secs(args.jwt_refresh_ttl * 24 * 60 * 60),
        replay_policy: args.replay_policy,
        reaper_interval: Duration::from_secs(args.reaper_interval_secs),
        reminder_interval: Duration::from_secs(args.reminder_interval_secs),
        ws_timeouts: WsTimeouts::default(),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

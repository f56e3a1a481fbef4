//! Logging setup shared by the binaries, plus the lifecycle events they emit.
//!
//! Settings come from `CREDIT_FEATURES_LOG_*` variables. Events go to stderr so
//! a CSV written to stdout stays clean.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

const ENV_PREFIX: &str = "CREDIT_FEATURES_LOG_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else if raw.trim().eq_ignore_ascii_case("pretty") {
            Ok(Self::Pretty)
        } else {
            Err(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Resolves `LEVEL`, `FORMAT` and `TARGET` through `lookup`. Blank or
    /// unrecognised values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Self {
            level: var("LEVEL").unwrap_or(defaults.level),
            format: var("FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.format),
            include_target: var("TARGET")
                .and_then(|v| switch(&v))
                .unwrap_or(defaults.include_target),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    LoggingConfig::from_lookup(|key| env::var(key).ok())
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_writer(std::io::stderr)
        .with_ansi(config.format == LogFormat::Pretty);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(component: &'static str, config: &LoggingConfig) {
    info!(
        component,
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "feature_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        route = "/features"
    );
}

pub fn log_contract_loaded(source: &str, feature_count: usize, fingerprint: &str) {
    info!(
        component = "contract",
        event = "contract.loaded",
        source,
        feature_count,
        fingerprint
    );
}

pub fn log_features_written(destination: &str, rows: u64, features: usize) {
    info!(
        component = "build_features",
        event = "features.written",
        destination,
        rows,
        features
    );
}

fn switch(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

//! Logging flags shared by both binaries and the subscriber they install.
//!
//! Every flag falls back to a `VDS_LOG_*` variable so scheduled runs can be
//! configured without touching the command line.

use std::path::Path;

use chrono::NaiveDate;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, ValueEnum};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct LogOptions {
    /// Filter directive, e.g. `info` or `vds_rollup=debug`
    #[arg(long = "log-level", env = "VDS_LOG_LEVEL", default_value = "info")]
    pub level: String,

    #[arg(
        long = "log-format",
        env = "VDS_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Pretty
    )]
    pub format: LogFormat,

    /// Include the event target (module path) in every line
    #[arg(
        long = "log-target",
        env = "VDS_LOG_TARGET",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value = "true"
    )]
    pub include_target: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the process-wide subscriber. An unparsable level falls back to
/// `info` and is reported once logging is up.
pub fn init_logging(options: &LogOptions) -> Result<(), LoggingInitError> {
    let (filter, rejected) = match EnvFilter::try_new(&options.level) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new("info"), Some(err.to_string())),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(options.include_target);

    match options.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(builder.json().with_ansi(false).finish())?
        }
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    if let Some(reason) = rejected {
        warn!(
            component = "observability",
            event = "logging.level.rejected",
            level = %options.level,
            reason = %reason
        );
    }
    Ok(())
}

pub fn log_app_start(command: &str, options: &LogOptions) {
    info!(
        component = command,
        event = "app.start",
        version = env!("CARGO_PKG_VERSION"),
        log_level = %options.level,
        log_format = ?options.format
    );
}

pub fn log_range_selected(command: &str, start: NaiveDate, end: NaiveDate, root: &Path) {
    info!(
        component = command,
        event = "range.selected",
        start = %start.format("%Y%m%d"),
        end = %end.format("%Y%m%d"),
        days = (end - start).num_days() + 1,
        root = %root.display()
    );
}

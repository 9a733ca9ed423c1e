//! Global `tracing` subscriber for Strata binaries
//!
//! Events go to stdout unless `LOG_DIR` is set, in which case they are
//! written to a daily rolling file there. Library code only emits events
//! through the `tracing` macros with structured fields:
//!
//! ```rust,ignore
//! info!(entity = %spec.name, run_id = %ctx.run_id, inserted = report.inserted, "Merge committed");
//! ```

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, fmt::writer::BoxMakeWriter, layer::Layered, layer::SubscriberExt,
    util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

type FilteredRegistry = Layered<EnvFilter, Registry>;

/// Minimum level of emitted events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow!("Invalid log level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: LogLevel,
    /// JSON lines instead of human-readable text
    pub json: bool,
    /// Write to a daily rolling file in this directory instead of stdout
    pub log_dir: Option<PathBuf>,
    /// File name prefix, e.g. `strata-ingest` -> `strata-ingest.2026-02-17`
    pub log_file_prefix: String,
    /// Extra comma-separated directives such as `sqlx=warn`
    pub filter_directives: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            log_dir: None,
            log_file_prefix: "strata".to_string(),
            filter_directives: "sqlx=warn,hyper=warn,reqwest=warn".to_string(),
        }
    }
}

impl LogConfig {
    /// `LOG_LEVEL`, `LOG_FORMAT` (`text` or `json`), `LOG_DIR`,
    /// `LOG_FILE_PREFIX` and `LOG_FILTER`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(level) = get("LOG_LEVEL") {
            config.level = level.parse()?;
        }
        if let Some(format) = get("LOG_FORMAT") {
            config.json = match format.to_lowercase().as_str() {
                "text" => false,
                "json" => true,
                _ => return Err(anyhow!("Invalid log format: {}", format)),
            };
        }
        config.log_dir = get("LOG_DIR").filter(|d| !d.is_empty()).map(PathBuf::from);
        if let Some(prefix) = get("LOG_FILE_PREFIX") {
            config.log_file_prefix = prefix;
        }
        if let Some(filter) = get("LOG_FILTER") {
            config.filter_directives = filter;
        }

        // Surface bad directives here rather than at subscriber install
        config.env_filter()?;
        Ok(config)
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::from_default_env().add_directive(Level::from(self.level).into());

        for directive in self.filter_directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            filter = filter.add_directive(
                directive
                    .parse()
                    .with_context(|| format!("Failed to parse filter directive '{}'", directive))?,
            );
        }

        Ok(filter)
    }
}

/// Install the global subscriber described by `config`.
///
/// With file output the returned guard must be held until exit; dropping
/// it flushes the background writer.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = config.env_filter()?;

    let (writer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, &config.log_file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        },
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(config.log_dir.is_none());
    let layer: Box<dyn Layer<FilteredRegistry> + Send + Sync> =
        if config.json { layer.json().boxed() } else { layer.boxed() };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

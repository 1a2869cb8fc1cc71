//! Structured logging with pretty/compact/JSON console output and file rotation

use std::io;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{FileLoggingConfig, LogFormat, LoggingConfig, RotationStrategy};
use crate::error::{ObservabilityError, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Guard that must be held to keep the async file writer running
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    guard: Option<WorkerGuard>,
}

impl LogGuard {
    fn new(guard: Option<WorkerGuard>) -> Self {
        Self { guard }
    }

    /// Whether a file writer is attached
    #[must_use]
    pub fn writes_file(&self) -> bool {
        self.guard.is_some()
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured level and directives.
/// Console output goes to stderr; file output, if configured, is JSON.
///
/// # Errors
///
/// Fails if the filter directives are invalid, the log directory cannot be
/// created, or a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_from(&config.default_filter())?,
    };

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];

    let guard = match &config.file {
        Some(file_config) => {
            let (writer, guard) = create_file_writer(file_config)?;
            layers.push(file_layer(config, writer));
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ObservabilityError::Init(e.to_string()))?;

    Ok(LogGuard::new(guard))
}

fn filter_from(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).map_err(|e| ObservabilityError::InvalidFilter {
        directives: directives.to_string(),
        reason: e.to_string(),
    })
}

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    match config.format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn file_layer(config: &LoggingConfig, writer: NonBlocking) -> BoxedLayer {
    fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json()
        .boxed()
}

fn create_file_writer(config: &FileLoggingConfig) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(&config.directory)?;

    let appender = match config.rotation {
        RotationStrategy::Daily => tracing_appender::rolling::daily(&config.directory, &config.prefix),
        RotationStrategy::Hourly => {
            tracing_appender::rolling::hourly(&config.directory, &config.prefix)
        }
        RotationStrategy::Never => tracing_appender::rolling::never(&config.directory, &config.prefix),
    };

    Ok(tracing_appender::non_blocking(appender))
}

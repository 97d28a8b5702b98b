//! Logging setup shared by every crmsync binary.
//!
//! ```ignore
//! use crmsync_core::tracing::{init_tracing, TracingConfig};
//!
//! // One-shot command, human readable
//! init_tracing(TracingConfig::for_cli(false, false))?;
//!
//! // Long-running renewal loop shipping JSON to a collector
//! init_tracing(TracingConfig::for_service())?;
//! ```
//!
//! `RUST_LOG` always overrides the configured level.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    /// A global subscriber was already installed.
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    /// The filter directive could not be parsed.
    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    /// Multi-line, human readable.
    Pretty,
    /// Single line per event.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for the `crmsync` targets when `RUST_LOG` is unset.
    pub default_level: Level,
    /// Line layout.
    pub output_format: TracingOutputFormat,
    /// Emit file and line of each event.
    pub include_location: bool,
    /// Emit span open/close events (useful to time delta runs).
    pub include_span_events: bool,
    /// Explicit filter directive; wins over `default_level` and `RUST_LOG`.
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            output_format: TracingOutputFormat::Compact,
            include_location: false,
            include_span_events: false,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    /// Settings for an interactive command.
    #[must_use]
    pub fn for_cli(debug: bool, json: bool) -> Self {
        Self {
            default_level: if debug { Level::DEBUG } else { Level::WARN },
            output_format: if json {
                TracingOutputFormat::Json
            } else {
                TracingOutputFormat::Compact
            },
            include_location: debug,
            ..Self::default()
        }
    }

    /// Settings for a long-running process.
    #[must_use]
    pub fn for_service() -> Self {
        Self {
            default_level: Level::INFO,
            output_format: TracingOutputFormat::Json,
            include_location: true,
            include_span_events: true,
            env_filter: None,
        }
    }

    /// Set the default log level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Set an explicit filter directive.
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn build_filter(&self) -> Result<EnvFilter, TracingError> {
        match self.env_filter {
            Some(ref directive) => Ok(EnvFilter::try_new(directive)?),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("crmsync={}", self.default_level)))),
        }
    }
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = config.build_filter()?;
    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(span_events);

    let layer = match config.output_format {
        TracingOutputFormat::Pretty => layer.pretty().boxed(),
        TracingOutputFormat::Compact => layer.compact().boxed(),
        TracingOutputFormat::Json => layer.json().boxed(),
    };

    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(filter).with(layer))?;
    Ok(())
}

//! Logging initialization
//!
//! Sets up a `tracing` subscriber with an `EnvFilter` (honouring `RUST_LOG`)
//! and either human-readable or JSON structured output.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,istio_authz=info,istio_common=info";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),

    /// Unrecognized log format string
    #[error("unknown log format '{0}' (expected 'text' or 'json')")]
    UnknownFormat(String),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }
}

/// Configuration for logging initialization
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Output format
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset
    pub default_filter: Option<String>,
}

/// Initialize the global tracing subscriber
///
/// # Example
///
/// ```ignore
/// use istio_common::telemetry::{init_logging, LogFormat, TelemetryConfig};
///
/// init_logging(TelemetryConfig { format: LogFormat::Json, ..Default::default() })?;
/// ```
pub fn init_logging(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let fallback = config.default_filter.as_deref().unwrap_or(DEFAULT_FILTER);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    result.map_err(|e: tracing_subscriber::util::TryInitError| {
        TelemetryError::SubscriberInit(e.to_string())
    })
}

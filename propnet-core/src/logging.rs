//! Logging setup for propnet
//!
//! Libraries in this workspace only emit `tracing` events. Binaries and tests
//! pick how those events are rendered with [`init_logging`].

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output for development
    Development,
    /// Verbose diagnostics with source locations
    Debug,
}

impl LoggingMode {
    /// Parse a mode name as used in `PROPNET_LOG_MODE`
    pub fn from_name(name: &str) -> Option<LoggingMode> {
        match name.trim().to_ascii_lowercase().as_str() {
            "silent" => Some(LoggingMode::Silent),
            "development" | "dev" => Some(LoggingMode::Development),
            "debug" => Some(LoggingMode::Debug),
            _ => None,
        }
    }
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Install a global subscriber for `mode`
///
/// ```rust,ignore
/// propnet_core::logging::init_logging(LoggingMode::Development)?;
/// ```
///
/// `PROPNET_LOG_LEVEL` overrides the filter (e.g. `propnet_resource=trace`),
/// falling back to `RUST_LOG` and then to the mode's own level.
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let installed = match mode {
        LoggingMode::Silent => return Ok(()),
        LoggingMode::Development => Registry::default()
            .with(fmt::layer().compact().with_target(false))
            .with(env_filter("info")?)
            .try_init(),
        LoggingMode::Debug => Registry::default()
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(env_filter("debug")?)
            .try_init(),
    };

    installed.map_err(|e| LoggingError::TracingInit(e.to_string()))
}

/// Initialize logging from `PROPNET_LOG_MODE`
///
/// Accepts `silent`, `development` or `debug`. Unset means silent; any other
/// value is an error.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var("PROPNET_LOG_MODE") {
        Ok(name) => LoggingMode::from_name(&name)
            .ok_or_else(|| LoggingError::InvalidEnv(format!("PROPNET_LOG_MODE={name}")))?,
        Err(_) => LoggingMode::Silent,
    };

    init_logging(mode)
}

fn env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var("PROPNET_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_level.to_string());

    EnvFilter::try_new(&directives)
        .map_err(|e| LoggingError::InvalidEnv(format!("{directives}: {e}")))
}

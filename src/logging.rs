//! Structured logging with tracing.
//!
//! `AUDIT_BUS_LOG` (an `EnvFilter` directive) overrides the configured level.
//! Audit lines from [`crate::listeners::LoggingListener`] use the `audit`
//! target, so they can be routed separately, e.g. `AUDIT_BUS_LOG=audit=info,warn`.

use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::{ConfigError, Error};

/// Environment variable holding a filter directive.
pub const LOG_ENV: &str = "AUDIT_BUS_LOG";

/// Parse a filter directive such as `info` or `audit_bus=debug,audit=info`.
pub fn parse_filter(directive: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(directive)
        .map_err(|err| ConfigError::Invalid(format!("invalid log level {:?}: {}", directive, err)))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => parse_filter(&config.level)?,
    };

    let registry = Registry::default().with(filter);
    let installed = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init()
    };
    installed.map_err(|err| Error::Logging(err.to_string()))?;

    debug!(level = %config.level, json = config.json, "logging initialized");
    Ok(())
}

//! Configuration.
//!
//! Sources are merged in order, later ones overriding earlier ones:
//! 1. [`Config::default`]
//! 2. an optional TOML file
//! 3. environment variables prefixed `AUDIT_BUS_`, with `__` separating
//!    nested keys (e.g. `AUDIT_BUS_BROKER__ADDRESS_PREFIX=audit`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::filter::{parse_key, FilterConfig};
use crate::listeners::KNOWN_LISTENERS;

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "AUDIT_BUS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub filter: FilterConfig,
    /// Names of the listeners to attach, each getting its own queue.
    pub listeners: Vec<String>,
    pub external_bus: ExternalBusConfig,
    pub webhook: WebhookConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            filter: FilterConfig::default(),
            listeners: vec!["LoggingListener".into(), "ActivationListener".into()],
            external_bus: ExternalBusConfig::default(),
            webhook: WebhookConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Internal broker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// When disabled, events are discarded and no receivers are started.
    pub enabled: bool,
    /// Prefix for the publish address and every listener queue.
    pub address_prefix: String,
    /// Payloads larger than this many bytes are flagged as large messages.
    pub large_message_size: usize,
    /// Health-check interval for the broker status monitor.
    pub monitor_interval_ms: u64,
    /// How long a receiver waits for a message before checking for shutdown.
    pub receive_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address_prefix: "event".into(),
            large_message_size: 100 * 1024,
            monitor_interval_ms: 5_000,
            receive_timeout_ms: 1_000,
        }
    }
}

impl BrokerConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// External message bus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalBusConfig {
    pub enabled: bool,
    /// Health-check interval for the external bus status monitor.
    pub monitor_interval_ms: u64,
    /// `TYPE-TARGET` keys to forward; empty forwards everything.
    pub forward: Vec<String>,
}

impl Default for ExternalBusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            monitor_interval_ms: 10_000,
            forward: Vec::new(),
        }
    }
}

impl ExternalBusConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    /// HMAC-SHA512 key for the signature header.
    pub secret: String,
    pub timeout_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: String::new(),
            timeout_ms: 10_000,
        }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `audit_bus=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Loads [`Config`] from defaults, a TOML file and the environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn figment(&self) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(path) = &self.config_path {
            if path.exists() {
                debug!(path = %path.display(), "loading configuration file");
                figment = figment.merge(Toml::file(path));
            } else {
                warn!(path = %path.display(), "configuration file not found, using defaults");
            }
        }

        figment.merge(Env::prefixed(&format!("{}_", self.env_prefix)).split("__"))
    }

    pub fn load(&self) -> Result<Config, ConfigError> {
        let config: Config = self.figment().extract()?;
        validate(&config)?;
        Ok(config)
    }
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let broker = &config.broker;
    if broker.address_prefix.trim().is_empty() {
        return Err(ConfigError::Invalid("broker.address_prefix cannot be empty".into()));
    }
    if broker.monitor_interval_ms == 0 {
        return Err(ConfigError::Invalid("broker.monitor_interval_ms cannot be 0".into()));
    }
    if broker.receive_timeout_ms == 0 {
        return Err(ConfigError::Invalid("broker.receive_timeout_ms cannot be 0".into()));
    }

    if config.external_bus.enabled && config.external_bus.monitor_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "external_bus.monitor_interval_ms cannot be 0 when the external bus is enabled".into(),
        ));
    }
    check_keys("external_bus.forward", &config.external_bus.forward)?;
    check_keys("filter.include", &config.filter.include)?;
    check_keys("filter.exclude", &config.filter.exclude)?;

    for name in &config.listeners {
        if !KNOWN_LISTENERS.contains(&name.as_str()) {
            return Err(ConfigError::Invalid(format!("unknown listener {:?}", name)));
        }
    }
    if config.listeners.iter().any(|l| l == "WebhookListener") && config.webhook.url.is_none() {
        return Err(ConfigError::Invalid(
            "webhook.url is required when WebhookListener is enabled".into(),
        ));
    }
    if config.listeners.iter().any(|l| l == "BusForwardingListener") && !config.external_bus.enabled {
        return Err(ConfigError::Invalid(
            "BusForwardingListener requires external_bus.enabled".into(),
        ));
    }

    crate::logging::parse_filter(&config.logging.level)?;

    Ok(())
}

/// Every `TYPE-TARGET` key in `entries` must parse; entries may be comma
/// separated.
fn check_keys(field: &str, entries: &[String]) -> Result<(), ConfigError> {
    let keys = entries
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|key| !key.is_empty());
    for key in keys {
        if parse_key(key).is_none() {
            return Err(ConfigError::Invalid(format!("{}: malformed key {:?}", field, key)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        validate(&config).unwrap();
        assert_eq!(config.broker.address_prefix, "event");
        assert_eq!(config.broker.large_message_size, 102_400);
        assert!(!config.filter.enabled);
    }

    #[test]
    fn file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "audit-bus.toml",
                r#"
                listeners = ["LoggingListener"]

                [broker]
                address_prefix = "audit"
                monitor_interval_ms = 250

                [filter]
                enabled = true
                policy = "DO_NOT_FILTER"
                exclude = ["MODIFIED-CONSUMER"]
                "#,
            )?;
            jail.set_env("AUDIT_BUS_BROKER__LARGE_MESSAGE_SIZE", "2048");
            jail.set_env("AUDIT_BUS_LOGGING__LEVEL", "debug");

            let config = ConfigLoader::new()
                .with_config_path("audit-bus.toml")
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.broker.address_prefix, "audit");
            assert_eq!(config.broker.monitor_interval_ms, 250);
            assert_eq!(config.broker.large_message_size, 2048);
            assert_eq!(config.listeners, vec!["LoggingListener".to_string()]);
            assert!(config.filter.enabled);
            assert_eq!(config.filter.exclude, vec!["MODIFIED-CONSUMER".to_string()]);
            assert_eq!(config.logging.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::new()
                .with_config_path("nope.toml")
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_listener() {
        let config = Config {
            listeners: vec!["NoSuchListener".into()],
            ..Config::default()
        };
        assert_matches!(validate(&config), Err(ConfigError::Invalid(msg)) if msg.contains("NoSuchListener"));
    }

    #[test]
    fn webhook_listener_needs_url() {
        let config = Config {
            listeners: vec!["WebhookListener".into()],
            ..Config::default()
        };
        assert_matches!(validate(&config), Err(ConfigError::Invalid(_)));
    }

    #[test]
    fn forwarding_needs_external_bus() {
        let mut config = Config {
            listeners: vec!["BusForwardingListener".into()],
            ..Config::default()
        };
        assert_matches!(validate(&config), Err(ConfigError::Invalid(_)));

        config.external_bus.enabled = true;
        validate(&config).unwrap();
    }

    #[test]
    fn rejects_malformed_forward_key() {
        let mut config = Config::default();
        config.external_bus.forward = vec!["CREATED-POOL, DELETED-POOL".into()];
        validate(&config).unwrap();

        config.external_bus.forward = vec!["CREATED".into()];
        assert_matches!(validate(&config), Err(ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_filter_keys() {
        let mut config = Config::default();
        config.filter.exclude = vec!["MODIFIED-CONSUMER,DELETED-OWNER".into()];
        validate(&config).unwrap();

        config.filter.exclude = vec!["CREATED-CONSUMR".into()];
        assert_matches!(
            validate(&config),
            Err(ConfigError::Invalid(msg)) if msg.contains("filter.exclude")
        );

        config.filter.exclude.clear();
        config.filter.include = vec!["CREATED-POOL, EXPLODED-POOL".into()];
        assert_matches!(
            validate(&config),
            Err(ConfigError::Invalid(msg)) if msg.contains("filter.include")
        );
    }

    #[test]
    fn rejects_zero_intervals() {
        let mut config = Config::default();
        config.broker.monitor_interval_ms = 0;
        assert_matches!(validate(&config), Err(ConfigError::Invalid(_)));
    }
}

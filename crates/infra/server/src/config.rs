//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use freightline_assignments::AssignmentConfig;
use freightline_webhooks::{BackoffPolicy, ExponentialBackoff, ScheduledBackoff, WebhookConfig};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "FREIGHTLINE_CONFIG";

/// Whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FreightlineConfig {
    pub server: ServerConfig,
    pub webhooks: WebhookSettings,
    pub assignments: AssignmentSettings,
    /// Carriers in preference order, used to pick reassignment candidates.
    pub carriers: Vec<CarrierConfig>,
}

/// Server-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            host: "0.0.0.0".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Backoff kinds selectable from the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Scheduled,
    Exponential,
}

/// `[webhooks]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub max_retries: u32,
    pub backoff: BackoffKind,
    /// Delays for `scheduled` backoff, in seconds.
    pub backoff_secs: Vec<u64>,
    /// Base delay for `exponential` backoff, in seconds.
    pub exponential_base_secs: u64,
    /// Cap for `exponential` backoff, in seconds.
    pub exponential_max_secs: u64,
    pub request_timeout_secs: u64,
    pub response_body_limit: usize,
    pub deactivation_threshold: u32,
    pub user_agent: String,
    pub claim_lease_secs: u64,
    pub sweep_batch_size: usize,
    pub sweep_interval_secs: u64,
    pub in_process_timers: bool,
    pub retention_days: u32,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        let defaults = WebhookConfig::default();
        Self {
            max_retries: defaults.max_retries,
            backoff: BackoffKind::Scheduled,
            backoff_secs: vec![1, 5, 15],
            exponential_base_secs: 60,
            exponential_max_secs: 3600,
            request_timeout_secs: defaults.request_timeout.as_secs(),
            response_body_limit: defaults.response_body_limit,
            deactivation_threshold: defaults.deactivation_threshold,
            user_agent: defaults.user_agent,
            claim_lease_secs: defaults.claim_lease.as_secs(),
            sweep_batch_size: defaults.sweep_batch_size,
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
            in_process_timers: defaults.in_process_timers,
            retention_days: defaults.retention_days,
        }
    }
}

impl WebhookSettings {
    /// Converts to the library configuration.
    pub fn to_config(&self) -> WebhookConfig {
        let backoff = match self.backoff {
            BackoffKind::Scheduled => {
                BackoffPolicy::Scheduled(ScheduledBackoff::from_secs(self.backoff_secs.iter().copied()))
            }
            BackoffKind::Exponential => BackoffPolicy::Exponential(
                ExponentialBackoff::new()
                    .base(Duration::from_secs(self.exponential_base_secs))
                    .max_delay(Duration::from_secs(self.exponential_max_secs)),
            ),
        };

        WebhookConfig::new()
            .max_retries(self.max_retries)
            .backoff(backoff)
            .request_timeout(Duration::from_secs(self.request_timeout_secs))
            .response_body_limit(self.response_body_limit)
            .deactivation_threshold(self.deactivation_threshold)
            .user_agent(self.user_agent.clone())
            .claim_lease(Duration::from_secs(self.claim_lease_secs))
            .sweep_batch_size(self.sweep_batch_size)
            .sweep_interval(Duration::from_secs(self.sweep_interval_secs))
            .in_process_timers(self.in_process_timers)
            .retention_days(self.retention_days)
    }
}

/// `[assignments]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentSettings {
    pub timeout_secs: u64,
    pub warning_offsets_secs: Vec<u64>,
    pub max_reassignments: u32,
    pub auto_reassign_default: bool,
    pub sweep_interval_secs: u64,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        let defaults = AssignmentConfig::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            warning_offsets_secs: defaults.warning_offsets.iter().map(Duration::as_secs).collect(),
            max_reassignments: defaults.max_reassignments,
            auto_reassign_default: defaults.auto_reassign_default,
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
        }
    }
}

impl AssignmentSettings {
    /// Converts to the library configuration.
    pub fn to_config(&self) -> AssignmentConfig {
        AssignmentConfig::new()
            .timeout(Duration::from_secs(self.timeout_secs))
            .warning_offsets(self.warning_offsets_secs.iter().copied().map(Duration::from_secs))
            .max_reassignments(self.max_reassignments)
            .auto_reassign_default(self.auto_reassign_default)
            .sweep_interval(Duration::from_secs(self.sweep_interval_secs))
    }
}

/// `[[carriers]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Loads configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<FreightlineConfig, ConfigError> {
    let content =
        std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::IoError(e.to_string()))?;
    parse_config(&content)
}

/// Parses configuration from TOML text.
pub fn parse_config(content: &str) -> Result<FreightlineConfig, ConfigError> {
    let config: FreightlineConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Resolves the config path from the first argument or `FREIGHTLINE_CONFIG`.
///
/// No path means defaults.
pub fn load_from_env(args: impl IntoIterator<Item = String>) -> Result<FreightlineConfig, ConfigError> {
    let path = args
        .into_iter()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());
    match path {
        Some(path) => load_config(path),
        None => Ok(FreightlineConfig::default()),
    }
}

impl FreightlineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.webhooks.max_retries == 0 {
            return Err(ConfigError::Invalid("webhooks.max_retries must be at least 1".into()));
        }
        if self.webhooks.sweep_interval_secs == 0 || self.assignments.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep intervals must be positive".into()));
        }
        if self.assignments.timeout_secs == 0 {
            return Err(ConfigError::Invalid("assignments.timeout_secs must be positive".into()));
        }
        if self.carriers.iter().any(|c| c.id.trim().is_empty()) {
            return Err(ConfigError::Invalid("carrier id must not be empty".into()));
        }
        self.webhooks
            .to_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Carrier IDs in preference order.
    pub fn carrier_ids(&self) -> Vec<String> {
        self.carriers.iter().map(|c| c.id.clone()).collect()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert!(config.carriers.is_empty());

        let webhooks = config.webhooks.to_config();
        assert_eq!(webhooks.max_retries, 3);
        assert_eq!(webhooks.request_timeout, Duration::from_secs(30));
        assert_eq!(webhooks.deactivation_threshold, 10);
        assert_eq!(webhooks.backoff, BackoffPolicy::default());

        let assignments = config.assignments.to_config();
        assert_eq!(assignments.timeout, Duration::from_secs(7 * 3600));
        assert_eq!(
            assignments.warning_offsets,
            vec![Duration::from_secs(3600), Duration::from_secs(1800)]
        );
        assert_eq!(assignments.max_reassignments, 3);
    }

    #[test]
    fn test_full_file() {
        let config = parse_config(
            r#"
            [server]
            port = 9090
            log_level = "debug"

            [webhooks]
            backoff = "exponential"
            exponential_base_secs = 30
            deactivation_threshold = 5

            [assignments]
            timeout_secs = 3600
            warning_offsets_secs = [600]

            [[carriers]]
            id = "car_a"
            name = "Atlas Freight"

            [[carriers]]
            id = "car_b"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.carrier_ids(), vec!["car_a", "car_b"]);

        let webhooks = config.webhooks.to_config();
        assert_eq!(webhooks.deactivation_threshold, 5);
        assert!(matches!(
            webhooks.backoff,
            BackoffPolicy::Exponential(ExponentialBackoff { base, .. }) if base == Duration::from_secs(30)
        ));
        assert_eq!(config.assignments.to_config().timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            parse_config("[webhooks]\nmax_retries = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse_config("[server]\nport = \"eighty\""),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_rejects_lease_shorter_than_timeout() {
        assert!(matches!(
            parse_config("[webhooks]\nrequest_timeout_secs = 90"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(parse_config("[webhooks]\nrequest_timeout_secs = 90\nclaim_lease_secs = 120").is_ok());
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    // Dispatch
    pub min_send_spacing_secs: u64,

    // Session
    pub pairing_token_ttl_secs: u64, // advisory only
    pub event_channel_capacity: usize,

    // Logging
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_send_spacing_secs: 3,
            pairing_token_ttl_secs: 60,
            event_channel_capacity: 64,
            log_level: "info".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {}", path.display(), e)))?;

        let config: GatewayConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. `PGW_*` names win over the
    /// unprefixed ones.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |primary: &str, fallback: Option<&str>| {
            lookup(primary).or_else(|| fallback.and_then(|k| lookup(k)))
        };

        if let Some(secs) = get("PGW_MESSAGE_DELAY_SECONDS", Some("MESSAGE_DELAY_SECONDS")) {
            config.min_send_spacing_secs = parse_number("MESSAGE_DELAY_SECONDS", &secs)?;
        }
        if let Some(ttl) = get("PGW_PAIRING_TOKEN_TTL_SECS", None) {
            config.pairing_token_ttl_secs = parse_number("PGW_PAIRING_TOKEN_TTL_SECS", &ttl)?;
        }
        if let Some(cap) = get("PGW_EVENT_CHANNEL_CAPACITY", None) {
            config.event_channel_capacity = parse_number("PGW_EVENT_CHANNEL_CAPACITY", &cap)?;
        }
        if let Some(level) = get("PGW_LOG_LEVEL", Some("LOG_LEVEL")) {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "log_level must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn min_send_spacing(&self) -> Duration {
        Duration::from_secs(self.min_send_spacing_secs)
    }

    pub fn pairing_token_ttl(&self) -> Duration {
        Duration::from_secs(self.pairing_token_ttl_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ParseError(format!("{key}: expected a number, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.min_send_spacing(), Duration::from_secs(3));
        assert_eq!(config.pairing_token_ttl(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_prefixed_wins_over_legacy() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("MESSAGE_DELAY_SECONDS", "5"),
            ("PGW_MESSAGE_DELAY_SECONDS", "7"),
            ("LOG_LEVEL", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.min_send_spacing_secs, 7);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_env_legacy_names() {
        let config = GatewayConfig::from_lookup(lookup(&[("MESSAGE_DELAY_SECONDS", "4")])).unwrap();
        assert_eq!(config.min_send_spacing_secs, 4);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let err = GatewayConfig::from_lookup(lookup(&[("PGW_MESSAGE_DELAY_SECONDS", "three")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = GatewayConfig::from_lookup(lookup(&[("PGW_EVENT_CHANNEL_CAPACITY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_from_toml_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "min_send_spacing_secs = 10").unwrap();
        let config = GatewayConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.min_send_spacing_secs, 10);
        assert_eq!(config.pairing_token_ttl_secs, 60);
    }

    #[test]
    fn test_from_toml_missing_file() {
        let err = GatewayConfig::from_toml("/nonexistent/pgw.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}

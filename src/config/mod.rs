//! Configuration loading for the webhook gateway.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `HOOKGATE_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{CryptoError, CryptoKey};

const ENV_PREFIX: &str = "HOOKGATE_";

/// Application configuration derived from `HOOKGATE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    /// Raw AES-256 key bytes protecting registration secrets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default = "default_webhook_max_body_bytes")]
    pub webhook_max_body_bytes: usize,
    /// Explicit diagnostic logging switch. Unset means enabled only when no
    /// crypto key is configured, since captured bodies are stored unencrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_logging_enabled: Option<bool>,
    #[serde(default = "default_webhook_log_retention_hours")]
    pub webhook_log_retention_hours: u64,
    #[serde(default = "default_webhook_log_purge_interval_seconds")]
    pub webhook_log_purge_interval_seconds: u64,
}

/// Purger settings that can change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionSettings {
    pub retention: Duration,
    pub interval: Duration,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(default_webhook_log_retention_hours() * 3600),
            interval: Duration::from_secs(default_webhook_log_purge_interval_seconds()),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            crypto_key: None,
            webhook_max_body_bytes: default_webhook_max_body_bytes(),
            webhook_logging_enabled: None,
            webhook_log_retention_hours: default_webhook_log_retention_hours(),
            webhook_log_purge_interval_seconds: default_webhook_log_purge_interval_seconds(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        config.database_url = redact_database_url(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// The registration secret key, if one is configured.
    pub fn crypto_key(&self) -> Result<Option<CryptoKey>, CryptoError> {
        self.crypto_key.clone().map(CryptoKey::new).transpose()
    }

    /// Whether inbound deliveries are captured to `webhook_logs`.
    pub fn webhook_logging_enabled(&self) -> bool {
        self.webhook_logging_enabled
            .unwrap_or(self.crypto_key.is_none())
    }

    pub fn retention_settings(&self) -> RetentionSettings {
        RetentionSettings {
            retention: Duration::from_secs(self.webhook_log_retention_hours.saturating_mul(3600)),
            interval: Duration::from_secs(self.webhook_log_purge_interval_seconds),
        }
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref key) = self.crypto_key
            && key.len() != 32
        {
            return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
        }

        if !matches!(self.profile.as_str(), "local" | "test") && self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if self.webhook_log_retention_hours == 0 {
            return Err(ConfigError::InvalidRetention {
                value: self.webhook_log_retention_hours,
            });
        }
        if self.webhook_log_purge_interval_seconds == 0 {
            return Err(ConfigError::InvalidPurgeInterval {
                value: self.webhook_log_purge_interval_seconds,
            });
        }
        if self.webhook_max_body_bytes == 0 {
            return Err(ConfigError::InvalidMaxBodyBytes);
        }

        Ok(())
    }
}

fn redact_database_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("[REDACTED]"));
            parsed.to_string()
        }
        _ => raw.to_string(),
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://hookgate@localhost:5432/hookgate".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_webhook_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_webhook_log_retention_hours() -> u64 {
    72
}

fn default_webhook_log_purge_interval_seconds() -> u64 {
    3600 // 1 hour
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error(
        "no operator tokens configured; set HOOKGATE_OPERATOR_TOKEN or HOOKGATE_OPERATOR_TOKENS"
    )]
    MissingOperatorTokens,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("webhook log retention must be at least one hour, got {value}")]
    InvalidRetention { value: u64 },
    #[error("webhook log purge interval must be positive, got {value}")]
    InvalidPurgeInterval { value: u64 },
    #[error("webhook max body size must be positive")]
    InvalidMaxBodyBytes,
}

/// Loads configuration using layered `.env` files and `HOOKGATE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration. Later layers win: `.env`,
    /// `.env.local`, `.env.{profile}`, `.env.{profile}.local`, process env.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_string(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_string(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take_string(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take_string(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_string(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections = take_parsed(&mut layered, "DB_MAX_CONNECTIONS")?
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")?
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // Comma-separated list wins over the single token form.
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = take_string(&mut layered, "OPERATOR_TOKEN") {
            vec![token.trim().to_string()]
        } else {
            Vec::new()
        };

        let crypto_key = match take_string(&mut layered, "CRYPTO_KEY") {
            Some(encoded) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(encoded.trim()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let webhook_max_body_bytes = take_parsed(&mut layered, "WEBHOOK_MAX_BODY_BYTES")?
            .unwrap_or_else(default_webhook_max_body_bytes);
        let webhook_logging_enabled = take_parsed(&mut layered, "WEBHOOK_LOGGING_ENABLED")?;
        let webhook_log_retention_hours = take_parsed(&mut layered, "WEBHOOK_LOG_RETENTION_HOURS")?
            .unwrap_or_else(default_webhook_log_retention_hours);
        let webhook_log_purge_interval_seconds =
            take_parsed(&mut layered, "WEBHOOK_LOG_PURGE_INTERVAL_SECONDS")?
                .unwrap_or_else(default_webhook_log_purge_interval_seconds);

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            crypto_key,
            webhook_max_body_bytes,
            webhook_logging_enabled,
            webhook_log_retention_hours,
            webhook_log_purge_interval_seconds,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_string(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values.remove(key).filter(|v| !v.trim().is_empty())
}

/// Unlike string keys, a numeric or boolean key that is present but does not
/// parse is an error rather than a silent fallback to the default.
fn take_parsed<T: std::str::FromStr>(
    values: &mut BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match take_string(values, key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_profile_requires_operator_tokens() {
        let config = AppConfig {
            profile: "prod".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingOperatorTokens)
        ));

        let config = AppConfig {
            profile: "local".to_string(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn crypto_key_length_is_checked() {
        let config = AppConfig {
            crypto_key: Some(vec![1u8; 16]),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCryptoKeyLength { length: 16 })
        ));
    }

    #[test]
    fn logging_defaults_to_enabled_only_without_crypto_key() {
        let mut config = AppConfig::default();
        assert!(config.webhook_logging_enabled());

        config.crypto_key = Some(vec![1u8; 32]);
        assert!(!config.webhook_logging_enabled());

        config.webhook_logging_enabled = Some(true);
        assert!(config.webhook_logging_enabled());
    }

    #[test]
    fn zero_retention_is_rejected() {
        let config = AppConfig {
            webhook_log_retention_hours: 0,
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRetention { value: 0 })
        ));
    }

    #[test]
    fn redaction_hides_secrets() {
        let config = AppConfig {
            operator_tokens: vec!["super-secret".to_string()],
            crypto_key: Some(vec![9u8; 32]),
            database_url: "postgresql://app:hunter2@db:5432/hookgate".to_string(),
            ..AppConfig::default()
        };
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("hunter2"));
        assert!(json.contains("[REDACTED]"));
    }

    #[test]
    fn retention_settings_convert_units() {
        let config = AppConfig {
            webhook_log_retention_hours: 4,
            webhook_log_purge_interval_seconds: 30,
            ..AppConfig::default()
        };
        let settings = config.retention_settings();
        assert_eq!(settings.retention, Duration::from_secs(4 * 3600));
        assert_eq!(settings.interval, Duration::from_secs(30));
    }
}

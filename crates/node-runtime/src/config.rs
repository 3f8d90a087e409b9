//! Processor configuration.
//!
//! Values come from a JSON file given as the last CLI argument, overridden
//! by environment variables of the same (uppercased) name. The master
//! validates once at startup and hands the worker the validated result
//! through the [`crate::CONFIG_ENV`] environment variable.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Errors produced while loading or validating configuration.
///
/// Messages never embed the offending value: a malformed private key or
/// password must not leak into logs through an error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or parsed.
    #[error("Cannot load config file {path}: {reason}")]
    File {
        /// Path that failed to load.
        path: String,
        /// Why it failed.
        reason: String,
    },

    /// An environment variable did not parse as the expected type.
    #[error("Environment variable {key} is not a valid {expected}")]
    BadEnv {
        /// Variable name.
        key: &'static str,
        /// Expected type.
        expected: &'static str,
    },

    /// A value failed range or format validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Process-wide configuration, validated once in the supervisor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(missing_docs)]
pub struct ProcessorConfig {
    pub dbuser: String,
    pub dbname: String,
    pub dbhost: String,
    pub dbport: u16,
    pub dbpassword: String,
    pub private_key: String,
    pub sign_prefix: String,
    pub log_level: u8,
    pub log_format: String,
    pub block_interval: u64,
    pub min_block_interval: u64,
    pub transactions_per_block: u32,
    pub max_block_size: usize,
    pub max_memory: u64,
    pub exclude_rejected: bool,
    pub sentry_url: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            dbuser: "processor".into(),
            dbname: "blockchain".into(),
            dbhost: "localhost".into(),
            dbport: 5432,
            dbpassword: String::new(),
            private_key: String::new(),
            sign_prefix: String::new(),
            log_level: 0,
            log_format: String::new(),
            block_interval: 60,
            min_block_interval: 5,
            transactions_per_block: 500,
            max_block_size: 1_000_000,
            max_memory: 1024,
            exclude_rejected: false,
            sentry_url: String::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &HashMap<String, String>,
    key: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::BadEnv { key, expected }),
    }
}

fn parse_bool_env(
    env: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    match env.get(key).map(String::as_str) {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(_) => Err(ConfigError::BadEnv {
            key,
            expected: "boolean",
        }),
    }
}

impl ProcessorConfig {
    /// Load from an optional JSON file, then apply environment overrides
    /// and validate.
    pub fn load(
        file: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                serde_json::from_str(&text).map_err(|e| ConfigError::File {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables onto the current values.
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<(), ConfigError> {
        if let Some(v) = env.get("DBUSER") {
            self.dbuser = v.clone();
        }
        if let Some(v) = env.get("DBNAME") {
            self.dbname = v.clone();
        }
        if let Some(v) = env.get("DBHOST") {
            self.dbhost = v.clone();
        }
        if let Some(v) = parse_env(env, "DBPORT", "port number")? {
            self.dbport = v;
        }
        if let Some(v) = env.get("DBPASSWORD") {
            self.dbpassword = v.clone();
        }
        if let Some(v) = env.get("PRIVATE_KEY") {
            self.private_key = v.clone();
        }
        if let Some(v) = env.get("SIGN_PREFIX") {
            self.sign_prefix = v.clone();
        }
        if let Some(v) = parse_env(env, "LOG_LEVEL", "integer 0..=5")? {
            self.log_level = v;
        }
        if let Some(v) = env.get("LOG_FORMAT") {
            self.log_format = v.clone();
        }
        if let Some(v) = parse_env(env, "BLOCK_INTERVAL", "integer (seconds)")? {
            self.block_interval = v;
        }
        if let Some(v) = parse_env(env, "MIN_BLOCK_INTERVAL", "integer (seconds)")? {
            self.min_block_interval = v;
        }
        if let Some(v) = parse_env(env, "TRANSACTIONS_PER_BLOCK", "integer")? {
            self.transactions_per_block = v;
        }
        if let Some(v) = parse_env(env, "MAX_BLOCK_SIZE", "integer (bytes)")? {
            self.max_block_size = v;
        }
        if let Some(v) = parse_env(env, "MAX_MEMORY", "integer (MiB)")? {
            self.max_memory = v;
        }
        if let Some(v) = parse_bool_env(env, "EXCLUDE_REJECTED")? {
            self.exclude_rejected = v;
        }
        if let Some(v) = env.get("SENTRY_URL") {
            self.sentry_url = v.clone();
        }
        Ok(())
    }

    /// Range and format checks; run once in the master.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dbpassword.is_empty() {
            return Err(ConfigError::Invalid("DBPASSWORD is required".into()));
        }
        if shared_crypto::wif_decode(&self.private_key).is_err() {
            return Err(ConfigError::Invalid(
                "PRIVATE_KEY is not a valid compressed WIF key".into(),
            ));
        }
        if self.sign_prefix.is_empty() || self.sign_prefix.len() > 255 {
            return Err(ConfigError::Invalid(
                "SIGN_PREFIX must be 1..=255 UTF-8 bytes".into(),
            ));
        }
        if self.log_level > 5 {
            return Err(ConfigError::Invalid("LOG_LEVEL must be 0..=5".into()));
        }
        if !matches!(self.log_format.as_str(), "" | "compact" | "json") {
            return Err(ConfigError::Invalid(
                "LOG_FORMAT must be empty, 'compact' or 'json'".into(),
            ));
        }
        if self.max_memory < 128 {
            return Err(ConfigError::Invalid(
                "MAX_MEMORY must be at least 128 MiB".into(),
            ));
        }
        if !self.sentry_url.is_empty() && !self.sentry_url.starts_with("http") {
            return Err(ConfigError::Invalid("SENTRY_URL must be a URL".into()));
        }
        self.mining_config()
            .validate()
            .map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// The mining-loop slice of this configuration.
    pub fn mining_config(&self) -> ql_03_block_mining::MiningConfig {
        ql_03_block_mining::MiningConfig {
            block_interval_secs: self.block_interval,
            min_block_interval_secs: self.min_block_interval,
            transactions_per_block: self.transactions_per_block,
            max_block_size: self.max_block_size,
            exclude_rejected: self.exclude_rejected,
            ..ql_03_block_mining::MiningConfig::default()
        }
    }

    /// Store connection options for the single processor connection.
    pub fn pg_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.dbhost)
            .port(self.dbport)
            .username(&self.dbuser)
            .password(&self.dbpassword)
            .database(&self.dbname)
            .application_name("quill-processor")
    }

    /// Map the numeric log level onto a tracing filter.
    pub fn level_filter(&self) -> LevelFilter {
        match self.log_level {
            0 => LevelFilter::TRACE,
            1 => LevelFilter::DEBUG,
            2 => LevelFilter::INFO,
            3 => LevelFilter::WARN,
            4 => LevelFilter::ERROR,
            _ => LevelFilter::OFF,
        }
    }

    /// The secrets that must never reach a log sink.
    pub fn secrets(&self) -> Vec<String> {
        [&self.private_key, &self.dbpassword, &self.sentry_url]
            .into_iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::wif_encode;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn valid_env() -> HashMap<String, String> {
        env(&[
            ("DBPASSWORD", "secret"),
            ("PRIVATE_KEY", &wif_encode(&[0x42u8; 32])),
            ("SIGN_PREFIX", "testchain"),
        ])
    }

    #[test]
    fn test_defaults_with_required_env() {
        let config = ProcessorConfig::load(None, &valid_env()).unwrap();
        assert_eq!(config.dbuser, "processor");
        assert_eq!(config.dbport, 5432);
        assert_eq!(config.block_interval, 60);
        assert_eq!(config.min_block_interval, 5);
        assert_eq!(config.transactions_per_block, 500);
        assert!(!config.exclude_rejected);
    }

    #[test]
    fn test_missing_password_rejected() {
        let mut e = valid_env();
        e.remove("DBPASSWORD");
        assert!(ProcessorConfig::load(None, &e).is_err());
    }

    #[test]
    fn test_bad_private_key_rejected() {
        let mut e = valid_env();
        e.insert("PRIVATE_KEY".into(), "garbage".into());
        let err = ProcessorConfig::load(None, &e).unwrap_err();
        // The key material itself must not appear in the error.
        assert!(!err.to_string().contains("garbage"));
    }

    #[test]
    fn test_env_overrides_and_parsing() {
        let mut e = valid_env();
        e.insert("BLOCK_INTERVAL".into(), "30".into());
        e.insert("MIN_BLOCK_INTERVAL".into(), "2".into());
        e.insert("EXCLUDE_REJECTED".into(), "true".into());
        let config = ProcessorConfig::load(None, &e).unwrap();
        assert_eq!(config.block_interval, 30);
        assert_eq!(config.min_block_interval, 2);
        assert!(config.exclude_rejected);

        e.insert("DBPORT".into(), "not a port".into());
        assert!(matches!(
            ProcessorConfig::load(None, &e),
            Err(ConfigError::BadEnv { key: "DBPORT", .. })
        ));
    }

    #[test]
    fn test_interval_ordering_enforced() {
        let mut e = valid_env();
        e.insert("MIN_BLOCK_INTERVAL".into(), "90".into());
        assert!(ProcessorConfig::load(None, &e).is_err());
    }

    #[test]
    fn test_sign_prefix_length() {
        let mut e = valid_env();
        e.insert("SIGN_PREFIX".into(), "x".repeat(256));
        assert!(ProcessorConfig::load(None, &e).is_err());
    }

    #[test]
    fn test_level_filter_mapping() {
        let mut config = ProcessorConfig::default();
        config.log_level = 0;
        assert_eq!(config.level_filter(), LevelFilter::TRACE);
        config.log_level = 2;
        assert_eq!(config.level_filter(), LevelFilter::INFO);
        config.log_level = 5;
        assert_eq!(config.level_filter(), LevelFilter::OFF);
    }

    #[test]
    fn test_secrets_listed_for_redaction() {
        let config = ProcessorConfig::load(None, &valid_env()).unwrap();
        let secrets = config.secrets();
        assert!(secrets.contains(&"secret".to_string()));
        assert_eq!(secrets.len(), 2); // empty sentry url is not a secret
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = ProcessorConfig::load(None, &valid_env()).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let restored: ProcessorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.dbuser, config.dbuser);
        assert_eq!(restored.private_key, config.private_key);
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::u2f::crypto::MIN_NONCE_LEN;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Parse(#[from] basic_toml::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// How the attestation certificate in a registration response is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttestationPolicy {
    /// Verify the attestation signature with the certificate key and keep the certificate
    #[default]
    Verify,
    /// Keep the certificate without verifying the signature
    TrustOnFirstUse,
    /// Neither verify nor keep the certificate
    Ignore,
}

/// How a zero counter is treated on a registration that has never
/// authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CounterPolicy {
    /// Accept `received == 0` while the stored counter is still 0
    #[default]
    AllowInauguralZero,
    /// Always require `received > stored`
    Strict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct U2fSettings {
    /// Application id, e.g. `https://example.test` (no trailing '/')
    pub app_id: String,
    /// Origins a client data `origin` may match. Empty means just `app_id`.
    pub trusted_facets: Vec<String>,
    pub challenge_timeout_seconds: u64,
    pub nonce_length: usize,
    pub attestation_policy: AttestationPolicy,
    pub counter_policy: CounterPolicy,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for U2fSettings {
    fn default() -> Self {
        Self {
            app_id: "https://localhost".to_string(),
            trusted_facets: Vec::new(),
            challenge_timeout_seconds: 60,
            nonce_length: 32,
            attestation_policy: AttestationPolicy::default(),
            counter_policy: CounterPolicy::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl U2fSettings {
    /// Settings for an application id that trusts only its own origin
    #[must_use]
    pub fn for_app_id(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            ..Self::default()
        }
    }

    /// Load settings from configuration files and environment variables
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Settings.toml in `U2F_CONFIG_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    /// - The resulting settings fail validation
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        settings.initialize_logging();
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML document
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` if the document is not valid settings TOML
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(basic_toml::from_str(content)?)
    }

    fn load_base_settings() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        let default_config_path = Path::new("Settings.toml");
        if default_config_path.exists() {
            settings = Self::from_toml(&fs::read_to_string(default_config_path)?)?;
            log::debug!("Loaded base settings from {}", default_config_path.display());
        }

        if let Ok(config_dir) = std::env::var("U2F_CONFIG_DIR") {
            let config_path = Path::new(&config_dir).join("Settings.toml");
            if config_path.exists() {
                settings = Self::from_toml(&fs::read_to_string(&config_path)?)?;
                log::debug!("Overriding settings from {}", config_path.display());
            } else {
                log::debug!(
                    "U2F_CONFIG_DIR set but no Settings.toml found at: {}",
                    config_path.display()
                );
            }
        }

        Ok(settings)
    }

    fn apply_env_overrides(settings: &mut Self) {
        if let Ok(app_id) = std::env::var("U2F_APP_ID") {
            settings.app_id = app_id;
        }
        if let Ok(facets) = std::env::var("U2F_TRUSTED_FACETS") {
            settings.trusted_facets = facets
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Ok(value) = std::env::var("U2F_CHALLENGE_TIMEOUT_SECONDS") {
            if let Ok(seconds) = value.parse::<u64>() {
                settings.challenge_timeout_seconds = seconds;
            }
        }
        if let Ok(value) = std::env::var("U2F_NONCE_LENGTH") {
            if let Ok(length) = value.parse::<usize>() {
                settings.nonce_length = length;
            }
        }
        if let Ok(value) = std::env::var("U2F_ATTESTATION_POLICY") {
            match value.as_str() {
                "verify" => settings.attestation_policy = AttestationPolicy::Verify,
                "trust_on_first_use" => {
                    settings.attestation_policy = AttestationPolicy::TrustOnFirstUse;
                }
                "ignore" => settings.attestation_policy = AttestationPolicy::Ignore,
                other => log::warn!("Ignoring unknown U2F_ATTESTATION_POLICY {other:?}"),
            }
        }
        if let Ok(value) = std::env::var("U2F_COUNTER_POLICY") {
            match value.as_str() {
                "allow_inaugural_zero" => {
                    settings.counter_policy = CounterPolicy::AllowInauguralZero;
                }
                "strict" => settings.counter_policy = CounterPolicy::Strict,
                other => log::warn!("Ignoring unknown U2F_COUNTER_POLICY {other:?}"),
            }
        }
        if let Ok(level) = std::env::var("U2F_LOG_LEVEL") {
            settings.logging.level = level;
        }
    }

    /// Install `env_logger` at the configured level unless `RUST_LOG` says
    /// otherwise. A logger installed earlier is left in place.
    fn initialize_logging(&self) {
        let env = env_logger::Env::default().default_filter_or(self.logging.level.as_str());
        if env_logger::Builder::from_env(env).try_init().is_err() {
            log::debug!("Logger already initialised");
        }
    }

    /// Check the settings are usable by the engine
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if:
    /// - The application id is empty
    /// - The application id is not https:// (except for localhost)
    /// - The nonce length is below 16 bytes
    /// - The challenge timeout is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id.is_empty() {
            return Err(ConfigError::Invalid(
                "Application id cannot be empty".to_string(),
            ));
        }

        if !self.app_id.starts_with("https://") && !self.app_id.starts_with("http://localhost") {
            return Err(ConfigError::Invalid(
                "Application id must be https:// except for localhost".to_string(),
            ));
        }

        if self.app_id.ends_with('/') {
            return Err(ConfigError::Invalid(
                "Application id must not end with '/'".to_string(),
            ));
        }

        if self.nonce_length < MIN_NONCE_LEN {
            return Err(ConfigError::Invalid(format!(
                "Nonce length must be at least {MIN_NONCE_LEN} bytes"
            )));
        }

        if self.challenge_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "Challenge timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Trusted facets as a set, falling back to the application id
    #[must_use]
    pub fn facet_set(&self) -> BTreeSet<String> {
        if self.trusted_facets.is_empty() {
            BTreeSet::from([self.app_id.clone()])
        } else {
            self.trusted_facets.iter().cloned().collect()
        }
    }

    #[must_use]
    pub fn challenge_timeout(&self) -> chrono::Duration {
        i64::try_from(self.challenge_timeout_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

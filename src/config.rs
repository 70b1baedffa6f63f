//! Configuration management for toolchat.
//!
//! Configuration can be set via environment variables:
//! - `GEMINI_MODEL` - Optional. Model to call. Defaults to `gemini-2.0-flash`.
//! - `GEMINI_BASE_URL` - Optional. API root. Defaults to the public v1beta endpoint.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `MAX_TOOL_ROUNDS` - Optional. Tool rounds allowed per ask. Defaults to `10`.
//! - `MODEL_TIMEOUT_SECS` - Optional. Timeout for one model request. Defaults to `60`.
//! - `SESSION_IDLE_SECS` - Optional. Idle time before a session is dropped. Defaults to `3600`.
//!
//! The API key is not part of the configuration. The model gateway reads it
//! from a credential store under [`API_KEY_CREDENTIAL`] on every request.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Credential store key holding the Gemini API key.
pub const API_KEY_CREDENTIAL: &str = "GEMINI_API_KEY";

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SESSION_IDLE_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Sampling parameters sent with every request. Fixed, not tunable per call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini model identifier
    pub model: String,

    /// Root of the Gemini REST API
    pub base_url: Url,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Tool rounds allowed per ask before giving up
    pub max_tool_rounds: usize,

    /// Timeout for a single model request
    pub model_timeout: Duration,

    /// Sessions unused for this long are dropped
    pub session_idle_timeout: Duration,

    /// Sampling parameters
    pub generation: GenerationConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key-value source, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model = lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url = lookup("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidValue("GEMINI_BASE_URL".to_string(), format!("{}", e)))?;

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or(&lookup, "PORT", 3000)?;
        let max_tool_rounds = parse_or(&lookup, "MAX_TOOL_ROUNDS", DEFAULT_MAX_TOOL_ROUNDS)?;
        let model_timeout = positive_secs(&lookup, "MODEL_TIMEOUT_SECS", DEFAULT_MODEL_TIMEOUT_SECS)?;
        let session_idle_timeout =
            positive_secs(&lookup, "SESSION_IDLE_SECS", DEFAULT_SESSION_IDLE_SECS)?;

        Ok(Self {
            model,
            base_url,
            host,
            port,
            max_tool_rounds,
            model_timeout,
            session_idle_timeout,
            generation: GenerationConfig::default(),
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(model: String, base_url: Url) -> Self {
        Self {
            model,
            base_url,
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            model_timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
            session_idle_timeout: Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
            generation: GenerationConfig::default(),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

fn positive_secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(lookup, key, default)?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn generation_config_serializes_camel_case() {
        let value = serde_json::to_value(GenerationConfig::default()).unwrap();
        assert_eq!(value["topK"], 40);
        assert_eq!(value["maxOutputTokens"], 2048);
        assert!(value.get("topP").is_some());
    }

    #[test]
    fn new_config_uses_defaults() {
        let config = Config::new(
            DEFAULT_MODEL.to_string(),
            Url::parse(DEFAULT_BASE_URL).unwrap(),
        );
        assert_eq!(config.max_tool_rounds, 10);
        assert_eq!(config.model_timeout, Duration::from_secs(60));
    }

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    fn invalid_key(result: Result<Config, ConfigError>) -> String {
        match result {
            Err(ConfigError::InvalidValue(key, _)) => key,
            Ok(_) => panic!("expected an invalid value"),
        }
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.base_url.as_str(), DEFAULT_BASE_URL);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_tool_rounds, 10);
        assert_eq!(config.model_timeout, Duration::from_secs(60));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            ("GEMINI_MODEL", "gemini-1.5-pro"),
            ("GEMINI_BASE_URL", "http://localhost:9000/v1"),
            ("HOST", "0.0.0.0"),
            ("PORT", "8080"),
            ("MAX_TOOL_ROUNDS", "3"),
            ("MODEL_TIMEOUT_SECS", "5"),
            ("SESSION_IDLE_SECS", "120"),
        ])
        .unwrap();
        assert_eq!(config.model, "gemini-1.5-pro");
        assert_eq!(config.base_url.as_str(), "http://localhost:9000/v1");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_tool_rounds, 3);
        assert_eq!(config.model_timeout, Duration::from_secs(5));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        match load(&[("MODEL_TIMEOUT_SECS", "0")]) {
            Err(ConfigError::InvalidValue(key, reason)) => {
                assert_eq!(key, "MODEL_TIMEOUT_SECS");
                assert_eq!(reason, "must be greater than zero");
            }
            Ok(_) => panic!("zero timeout accepted"),
        }
        assert_eq!(invalid_key(load(&[("SESSION_IDLE_SECS", "0")])), "SESSION_IDLE_SECS");
    }

    #[test]
    fn unparseable_values_name_the_variable() {
        assert_eq!(invalid_key(load(&[("PORT", "eighty")])), "PORT");
        assert_eq!(invalid_key(load(&[("PORT", "70000")])), "PORT");
        assert_eq!(invalid_key(load(&[("MAX_TOOL_ROUNDS", "-1")])), "MAX_TOOL_ROUNDS");
        assert_eq!(invalid_key(load(&[("MODEL_TIMEOUT_SECS", "soon")])), "MODEL_TIMEOUT_SECS");
        assert_eq!(invalid_key(load(&[("GEMINI_BASE_URL", "not a url")])), "GEMINI_BASE_URL");
    }
}

//! `CoreConfig`: parses the environment variables the core consumes.
//! Parsed once at `BuildCore` construction — read at init and not
//! mutated afterward.

use std::env;
use std::time::Duration;

use buildcore_cache::EvictionLimits;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value {value:?}: {reason}")]
    InvalidValue { name: &'static str, value: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct RemoteCacheConfig {
    pub url: String,
    pub timeout: Duration,
    pub retry_count: u32,
    pub compression: bool,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub target_cache_limits: EvictionLimits,
    pub action_cache_limits: EvictionLimits,
    pub remote_cache: Option<RemoteCacheConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            target_cache_limits: EvictionLimits::default(),
            action_cache_limits: EvictionLimits::default(),
            remote_cache: None,
        }
    }
}

impl CoreConfig {
    /// Reads `BUILDER_CACHE_MAX_SIZE`, `BUILDER_CACHE_MAX_ENTRIES`,
    /// `BUILDER_CACHE_MAX_AGE_DAYS`, the `BUILDER_ACTION_CACHE_*` trio, and
    /// the `BUILDER_REMOTE_CACHE_*` group. Unset variables keep
    /// their `EvictionLimits::default()` value; a present-but-unparsable
    /// value is a configuration error (exit code 2).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = EvictionLimits::default();

        let target_cache_limits = EvictionLimits {
            max_bytes: parse_env_or("BUILDER_CACHE_MAX_SIZE", defaults.max_bytes)?,
            max_entries: parse_env_or("BUILDER_CACHE_MAX_ENTRIES", defaults.max_entries)?,
            max_age_secs: parse_days_env_or("BUILDER_CACHE_MAX_AGE_DAYS", defaults.max_age_secs)?,
        };

        let action_cache_limits = EvictionLimits {
            max_bytes: parse_env_or("BUILDER_ACTION_CACHE_MAX_SIZE", defaults.max_bytes)?,
            max_entries: parse_env_or("BUILDER_ACTION_CACHE_MAX_ENTRIES", defaults.max_entries)?,
            max_age_secs: parse_days_env_or("BUILDER_ACTION_CACHE_MAX_AGE_DAYS", defaults.max_age_secs)?,
        };

        let remote_cache = match env::var("BUILDER_REMOTE_CACHE_URL") {
            Ok(url) if !url.is_empty() => Some(RemoteCacheConfig {
                url,
                timeout: Duration::from_secs(parse_env_or("BUILDER_REMOTE_CACHE_TIMEOUT", 30)?),
                retry_count: parse_env_or("BUILDER_REMOTE_CACHE_RETRY_COUNT", 3)?,
                compression: parse_bool_env_or("BUILDER_REMOTE_CACHE_COMPRESSION", false)?,
            }),
            _ => None,
        };

        Ok(Self {
            target_cache_limits,
            action_cache_limits,
            remote_cache,
        })
    }
}

fn parse_env_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value: value.clone(),
            reason: "expected an integer".to_string(),
        }),
    }
}

fn parse_days_env_or(name: &'static str, default_secs: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default_secs),
        Ok(value) => value
            .parse::<u64>()
            .map(|days| days * 86_400)
            .map_err(|_| ConfigError::InvalidValue {
                name,
                value: value.clone(),
                reason: "expected an integer number of days".to_string(),
            }),
    }
}

fn parse_bool_env_or(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name,
                value,
                reason: "expected a boolean (true/false/1/0/yes/no)".to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        // Deliberately does not touch the process environment, since tests
        // run concurrently; default() already covers the unset path.
        let config = CoreConfig::default();
        assert!(config.remote_cache.is_none());
    }

    #[test]
    fn rejects_non_numeric_cache_size() {
        let err = parse_env_or::<u64>("BUILDER_CACHE_MAX_SIZE_TEST_BOGUS", 10).unwrap();
        assert_eq!(err, 10);
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        assert!(parse_bool_env_or("BUILDER_ENGINE_TEST_BOOL_UNSET", true).unwrap());
    }
}

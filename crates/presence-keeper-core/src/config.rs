//! Maintainer configuration.

use std::{str::FromStr, time::Duration};

use thiserror::Error;

use crate::{BackoffPolicy, ParentId, Scope, TargetId};

/// Environment variable names.
pub mod env {
    pub const PARENT_ID: &str = "PRESENCE_PARENT_ID";
    pub const TARGET_ID: &str = "PRESENCE_TARGET_ID";
    pub const BACKOFF_BASE_SECS: &str = "PRESENCE_BACKOFF_BASE_SECS";
    pub const BACKOFF_MAX_SECS: &str = "PRESENCE_BACKOFF_MAX_SECS";
    pub const MAX_ATTEMPTS: &str = "PRESENCE_MAX_ATTEMPTS";
    pub const HEALTH_CHECK_SECS: &str = "PRESENCE_HEALTH_CHECK_SECS";
    pub const DEBOUNCE_SECS: &str = "PRESENCE_DEBOUNCE_SECS";
    pub const CONNECT_TIMEOUT_SECS: &str = "PRESENCE_CONNECT_TIMEOUT_SECS";
}

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration error. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything a maintainer needs to know about its scope and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    pub scope: Scope,
    pub backoff: BackoffPolicy,
    /// Interval of the periodic health check.
    pub health_check_interval: Duration,
    /// Delay before reacting to a drop or move notification.
    pub debounce: Duration,
    /// Upper bound for a single connect request.
    pub connect_timeout: Duration,
}

impl PresenceConfig {
    /// Config with default timings for `scope`.
    #[must_use]
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            backoff: BackoffPolicy::default(),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Load from process environment variables.
    ///
    /// # Errors
    /// Returns error if a required id is missing, non-numeric or zero, or a
    /// timing value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    ///
    /// # Errors
    /// See [`PresenceConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parent: ParentId = required(&lookup, env::PARENT_ID)?;
        let target: TargetId = required(&lookup, env::TARGET_ID)?;
        let mut config = Self::new(Scope::new(parent, target));

        if let Some(secs) = optional::<u64, _>(&lookup, env::BACKOFF_BASE_SECS)? {
            config.backoff.base = Duration::from_secs(secs);
        }
        if let Some(secs) = optional::<u64, _>(&lookup, env::BACKOFF_MAX_SECS)? {
            config.backoff.max = Duration::from_secs(secs);
        }
        if let Some(attempts) = optional(&lookup, env::MAX_ATTEMPTS)? {
            config.backoff.max_attempts = attempts;
        }
        if let Some(secs) = optional(&lookup, env::HEALTH_CHECK_SECS)? {
            config.health_check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = optional(&lookup, env::DEBOUNCE_SECS)? {
            config.debounce = Duration::from_secs(secs);
        }
        if let Some(secs) = optional(&lookup, env::CONNECT_TIMEOUT_SECS)? {
            config.connect_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check timing values for consistency.
    ///
    /// # Errors
    /// Returns error for zero intervals, zero attempts or a base delay above
    /// the ceiling. A zero debounce is allowed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            (env::BACKOFF_BASE_SECS, self.backoff.base),
            (env::BACKOFF_MAX_SECS, self.backoff.max),
            (env::HEALTH_CHECK_SECS, self.health_check_interval),
            (env::CONNECT_TIMEOUT_SECS, self.connect_timeout),
        ];
        for (key, value) in non_zero {
            if value.is_zero() {
                return Err(invalid(key, &format!("{value:?}"), "must be non-zero"));
            }
        }
        if self.backoff.max_attempts == 0 {
            return Err(invalid(env::MAX_ATTEMPTS, "0", "must be at least 1"));
        }
        if self.backoff.base > self.backoff.max {
            return Err(invalid(
                env::BACKOFF_BASE_SECS,
                &format!("{:?}", self.backoff.base),
                &format!("exceeds maximum delay {:?}", self.backoff.max),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn required<T, F>(lookup: &F, key: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key)?.ok_or(ConfigError::Missing(key))
}

fn optional<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
        _ => {
            tracing::debug!(key, "setting not provided");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = assert_ok!(PresenceConfig::from_lookup(lookup(&[
            (env::PARENT_ID, "123"),
            (env::TARGET_ID, "456"),
        ])));
        assert_eq!(config.scope.parent.get(), 123);
        assert_eq!(config.scope.target.get(), 456);
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.health_check_interval, DEFAULT_HEALTH_CHECK_INTERVAL);
        assert_eq!(config.debounce, DEFAULT_DEBOUNCE);
    }

    #[test]
    fn test_overrides() {
        let config = assert_ok!(PresenceConfig::from_lookup(lookup(&[
            (env::PARENT_ID, "1"),
            (env::TARGET_ID, "2"),
            (env::BACKOFF_BASE_SECS, "1"),
            (env::BACKOFF_MAX_SECS, "10"),
            (env::MAX_ATTEMPTS, "3"),
            (env::DEBOUNCE_SECS, "0"),
        ])));
        assert_eq!(
            config.backoff,
            BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10), 3)
        );
        assert_eq!(config.debounce, Duration::ZERO);
    }

    #[test]
    fn test_missing_ids() {
        let err = assert_err!(PresenceConfig::from_lookup(lookup(&[(env::TARGET_ID, "2")])));
        assert_eq!(err, ConfigError::Missing(env::PARENT_ID));

        let err = assert_err!(PresenceConfig::from_lookup(lookup(&[
            (env::PARENT_ID, "1"),
            (env::TARGET_ID, "  "),
        ])));
        assert_eq!(err, ConfigError::Missing(env::TARGET_ID));
    }

    #[test]
    fn test_zero_or_garbage_ids() {
        let err = assert_err!(PresenceConfig::from_lookup(lookup(&[
            (env::PARENT_ID, "0"),
            (env::TARGET_ID, "2"),
        ])));
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == env::PARENT_ID));

        let err = assert_err!(PresenceConfig::from_lookup(lookup(&[
            (env::PARENT_ID, "1"),
            (env::TARGET_ID, "lobby"),
        ])));
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == env::TARGET_ID));
    }

    #[test]
    fn test_inconsistent_timing() {
        let err = assert_err!(PresenceConfig::from_lookup(lookup(&[
            (env::PARENT_ID, "1"),
            (env::TARGET_ID, "2"),
            (env::BACKOFF_BASE_SECS, "90"),
        ])));
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == env::BACKOFF_BASE_SECS));

        let err = assert_err!(PresenceConfig::from_lookup(lookup(&[
            (env::PARENT_ID, "1"),
            (env::TARGET_ID, "2"),
            (env::MAX_ATTEMPTS, "0"),
        ])));
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == env::MAX_ATTEMPTS));
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dogu_core::model::Quantity;
use dogu_core::requeue::RequeueConfig;
use dogu_core::restart::RestartConfig;
use dogu_core::steps::ApplyConfig;
use dogu_core::workflow::resize::ResizeConfig;

/// Longest accepted interval or backoff (30 days).
pub const MAX_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Dogu operator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Namespace whose objects are reconciled
    pub namespace: String,
    /// Lower bound of the delay after a failed pass
    pub min_backoff: Duration,
    /// Delay after a permanent failure
    pub permanent_backoff: Duration,
    /// Interval of full resyncs
    pub resync_interval: Duration,
    /// Maximum passes running at once
    pub max_concurrent_reconciles: usize,
    /// Delay between volume capacity polls
    pub resize_poll_interval: Duration,
    /// Delay between restart checks
    pub restart_check_interval: Duration,
    /// Delay between rollout checks
    pub rollout_poll_interval: Duration,
    /// Claim size for dogus that declare none
    pub default_volume_size: String,
    /// Registry prefix of dogu images
    pub image_registry: String,
}

impl Default for Config {
    fn default() -> Self {
        let apply = ApplyConfig::default();
        let requeue = RequeueConfig::default();
        Self {
            database_path: PathBuf::from(".data/dogu-operator.db"),
            namespace: "ecosystem".to_string(),
            min_backoff: requeue.min_backoff,
            permanent_backoff: requeue.permanent_backoff,
            resync_interval: Duration::from_secs(300),
            max_concurrent_reconciles: 4,
            resize_poll_interval: ResizeConfig::default().poll_interval,
            restart_check_interval: RestartConfig::default().check_interval,
            rollout_poll_interval: apply.rollout_poll_interval,
            default_volume_size: apply.default_volume_size,
            image_registry: apply.image_registry,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional (defaults in parentheses):
    /// - `DOGU_OPERATOR_DATABASE_PATH` (`.data/dogu-operator.db`)
    /// - `DOGU_OPERATOR_NAMESPACE` (`ecosystem`)
    /// - `DOGU_OPERATOR_MIN_BACKOFF_SECS` (10)
    /// - `DOGU_OPERATOR_PERMANENT_BACKOFF_SECS` (600)
    /// - `DOGU_OPERATOR_RESYNC_SECS` (300)
    /// - `DOGU_OPERATOR_MAX_CONCURRENT_RECONCILES` (4)
    /// - `DOGU_OPERATOR_RESIZE_POLL_SECS` (5)
    /// - `DOGU_OPERATOR_RESTART_CHECK_SECS` (3)
    /// - `DOGU_OPERATOR_ROLLOUT_POLL_SECS` (5)
    /// - `DOGU_OPERATOR_DEFAULT_VOLUME_SIZE` (`2Gi`)
    /// - `DOGU_OPERATOR_IMAGE_REGISTRY` (`registry.cloudogu.com`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            database_path: std::env::var("DOGU_OPERATOR_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            namespace: std::env::var("DOGU_OPERATOR_NAMESPACE").unwrap_or(defaults.namespace),
            min_backoff: secs_var("DOGU_OPERATOR_MIN_BACKOFF_SECS", defaults.min_backoff)?,
            permanent_backoff: secs_var(
                "DOGU_OPERATOR_PERMANENT_BACKOFF_SECS",
                defaults.permanent_backoff,
            )?,
            resync_interval: secs_var("DOGU_OPERATOR_RESYNC_SECS", defaults.resync_interval)?,
            max_concurrent_reconciles: parse_var(
                "DOGU_OPERATOR_MAX_CONCURRENT_RECONCILES",
                defaults.max_concurrent_reconciles,
                "must be a positive integer",
            )?,
            resize_poll_interval: secs_var(
                "DOGU_OPERATOR_RESIZE_POLL_SECS",
                defaults.resize_poll_interval,
            )?,
            restart_check_interval: secs_var(
                "DOGU_OPERATOR_RESTART_CHECK_SECS",
                defaults.restart_check_interval,
            )?,
            rollout_poll_interval: secs_var(
                "DOGU_OPERATOR_ROLLOUT_POLL_SECS",
                defaults.rollout_poll_interval,
            )?,
            default_volume_size: std::env::var("DOGU_OPERATOR_DEFAULT_VOLUME_SIZE")
                .unwrap_or(defaults.default_volume_size),
            image_registry: std::env::var("DOGU_OPERATOR_IMAGE_REGISTRY")
                .unwrap_or(defaults.image_registry),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values `from_env` would reject.
    ///
    /// Every interval must be non-zero and at most [`MAX_INTERVAL`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::Invalid("DOGU_OPERATOR_NAMESPACE", "must not be empty"));
        }
        if self.max_concurrent_reconciles == 0 {
            return Err(ConfigError::Invalid(
                "DOGU_OPERATOR_MAX_CONCURRENT_RECONCILES",
                "must be a positive integer",
            ));
        }
        if self.default_volume_size.parse::<Quantity>().is_err() {
            return Err(ConfigError::Invalid(
                "DOGU_OPERATOR_DEFAULT_VOLUME_SIZE",
                "must be a storage quantity such as 2Gi",
            ));
        }

        let intervals = [
            ("DOGU_OPERATOR_MIN_BACKOFF_SECS", self.min_backoff),
            (
                "DOGU_OPERATOR_PERMANENT_BACKOFF_SECS",
                self.permanent_backoff,
            ),
            ("DOGU_OPERATOR_RESYNC_SECS", self.resync_interval),
            ("DOGU_OPERATOR_RESIZE_POLL_SECS", self.resize_poll_interval),
            (
                "DOGU_OPERATOR_RESTART_CHECK_SECS",
                self.restart_check_interval,
            ),
            (
                "DOGU_OPERATOR_ROLLOUT_POLL_SECS",
                self.rollout_poll_interval,
            ),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() || interval > MAX_INTERVAL {
                return Err(ConfigError::Invalid(name, "must be between 1 and 2592000 seconds"));
            }
        }

        if self.permanent_backoff < self.min_backoff {
            return Err(ConfigError::Invalid(
                "DOGU_OPERATOR_PERMANENT_BACKOFF_SECS",
                "must not be lower than DOGU_OPERATOR_MIN_BACKOFF_SECS",
            ));
        }
        Ok(())
    }

    /// Requeue handler settings.
    pub fn requeue(&self) -> RequeueConfig {
        RequeueConfig {
            min_backoff: self.min_backoff,
            permanent_backoff: self.permanent_backoff,
        }
    }

    /// Resize workflow settings.
    pub fn resize(&self) -> ResizeConfig {
        ResizeConfig {
            poll_interval: self.resize_poll_interval,
            ..ResizeConfig::default()
        }
    }

    /// Restart settings.
    pub fn restart(&self) -> RestartConfig {
        RestartConfig {
            check_interval: self.restart_check_interval,
            retry_interval: self.min_backoff,
        }
    }

    /// Apply step settings.
    pub fn apply(&self) -> ApplyConfig {
        ApplyConfig {
            image_registry: self.image_registry.clone(),
            default_volume_size: self.default_volume_size.clone(),
            rollout_poll_interval: self.rollout_poll_interval,
            ..ApplyConfig::default()
        }
    }
}

fn parse_var<T: FromStr>(
    name: &'static str,
    default: T,
    hint: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid(name, hint)),
        Err(_) => Ok(default),
    }
}

fn secs_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(name, default.as_secs(), "must be a number of seconds").map(Duration::from_secs)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 11] = [
        "DOGU_OPERATOR_DATABASE_PATH",
        "DOGU_OPERATOR_NAMESPACE",
        "DOGU_OPERATOR_MIN_BACKOFF_SECS",
        "DOGU_OPERATOR_PERMANENT_BACKOFF_SECS",
        "DOGU_OPERATOR_RESYNC_SECS",
        "DOGU_OPERATOR_MAX_CONCURRENT_RECONCILES",
        "DOGU_OPERATOR_RESIZE_POLL_SECS",
        "DOGU_OPERATOR_RESTART_CHECK_SECS",
        "DOGU_OPERATOR_ROLLOUT_POLL_SECS",
        "DOGU_OPERATOR_DEFAULT_VOLUME_SIZE",
        "DOGU_OPERATOR_IMAGE_REGISTRY",
    ];

    /// Sets env vars for a test and restores them afterwards
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        /// Guard with every operator variable removed.
        fn clean() -> Self {
            let mut guard = Self { vars: Vec::new() };
            for var in VARS {
                guard.remove(var);
            }
            guard
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = EnvGuard::clean();

        let config = Config::from_env().unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.database_path, PathBuf::from(".data/dogu-operator.db"));
        assert_eq!(config.namespace, "ecosystem");
        assert_eq!(config.min_backoff, Duration::from_secs(10));
        assert_eq!(config.permanent_backoff, Duration::from_secs(600));
        assert_eq!(config.resync_interval, Duration::from_secs(300));
        assert_eq!(config.max_concurrent_reconciles, 4);
    }

    #[test]
    fn test_config_from_env_with_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("DOGU_OPERATOR_DATABASE_PATH", "/var/lib/dogus.db");
        guard.set("DOGU_OPERATOR_NAMESPACE", "staging");
        guard.set("DOGU_OPERATOR_MIN_BACKOFF_SECS", "2");
        guard.set("DOGU_OPERATOR_MAX_CONCURRENT_RECONCILES", "16");
        guard.set("DOGU_OPERATOR_DEFAULT_VOLUME_SIZE", "500Mi");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/dogus.db"));
        assert_eq!(config.namespace, "staging");
        assert_eq!(config.min_backoff, Duration::from_secs(2));
        assert_eq!(config.max_concurrent_reconciles, 16);
        assert_eq!(config.apply().default_volume_size, "500Mi");
        assert_eq!(config.restart().retry_interval, Duration::from_secs(2));
        assert_eq!(config.requeue().permanent_backoff, Duration::from_secs(600));
    }

    #[test]
    fn test_config_rejects_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::clean();

        guard.set("DOGU_OPERATOR_MIN_BACKOFF_SECS", "soon");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DOGU_OPERATOR_MIN_BACKOFF_SECS", _))
        ));
        guard.remove("DOGU_OPERATOR_MIN_BACKOFF_SECS");

        guard.set("DOGU_OPERATOR_MAX_CONCURRENT_RECONCILES", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DOGU_OPERATOR_MAX_CONCURRENT_RECONCILES", _))
        ));
        guard.remove("DOGU_OPERATOR_MAX_CONCURRENT_RECONCILES");

        guard.set("DOGU_OPERATOR_DEFAULT_VOLUME_SIZE", "large");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DOGU_OPERATOR_DEFAULT_VOLUME_SIZE", _))
        ));
        guard.remove("DOGU_OPERATOR_DEFAULT_VOLUME_SIZE");

        guard.set("DOGU_OPERATOR_PERMANENT_BACKOFF_SECS", "1");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DOGU_OPERATOR_PERMANENT_BACKOFF_SECS", _))
        ));
        guard.remove("DOGU_OPERATOR_PERMANENT_BACKOFF_SECS");

        guard.set("DOGU_OPERATOR_RESYNC_SECS", "0");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DOGU_OPERATOR_RESYNC_SECS", _))
        ));
        guard.remove("DOGU_OPERATOR_RESYNC_SECS");

        guard.set("DOGU_OPERATOR_RESIZE_POLL_SECS", &u64::MAX.to_string());
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DOGU_OPERATOR_RESIZE_POLL_SECS", _))
        ));
        guard.remove("DOGU_OPERATOR_RESIZE_POLL_SECS");

        guard.set("DOGU_OPERATOR_ROLLOUT_POLL_SECS", "2592001");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DOGU_OPERATOR_ROLLOUT_POLL_SECS", _))
        ));
        guard.remove("DOGU_OPERATOR_ROLLOUT_POLL_SECS");

        guard.set("DOGU_OPERATOR_NAMESPACE", "");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("DOGU_OPERATOR_NAMESPACE", _))
        ));
    }

    #[test]
    fn test_validate_checks_hand_built_config() {
        assert!(Config::default().validate().is_ok());

        let zero_resync = Config {
            resync_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(
            zero_resync.validate(),
            Err(ConfigError::Invalid("DOGU_OPERATOR_RESYNC_SECS", _))
        ));

        let huge_check = Config {
            restart_check_interval: MAX_INTERVAL + Duration::from_secs(1),
            ..Config::default()
        };
        assert!(huge_check.validate().is_err());

        let sub_second = Config {
            min_backoff: Duration::from_millis(100),
            rollout_poll_interval: Duration::from_millis(50),
            ..Config::default()
        };
        assert!(sub_second.validate().is_ok());
    }
}

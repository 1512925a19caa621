//! Worker pool configuration types.
//!
//! These values are process-wide and fixed once the engine is built. In most
//! cases you should use [`EngineBuilder`](super::builder::EngineBuilder) rather
//! than creating a [`PoolConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `target_workers` | 4 |
//! | `max_workers` | 32 |
//! | `idle_lifetime` | 30 s |
//! | `max_starting` | 4 |
//! | `thread_name_prefix` | `"streamaio-worker"` |
//! | `thread_stack_size` | 0 (platform default) |
//! | `inline_submit` | true |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default number of resident workers kept alive when idle.
pub const DEFAULT_TARGET_WORKERS: usize = 4;
/// Default upper bound on worker threads.
pub const DEFAULT_MAX_WORKERS: usize = 32;
/// Default idle lifetime before an excess worker retires.
pub const DEFAULT_IDLE_LIFETIME: Duration = Duration::from_secs(30);
/// Default number of workers that may be starting at once.
pub const DEFAULT_MAX_STARTING: usize = 4;

const DEFAULT_THREAD_NAME_PREFIX: &str = "streamaio-worker";

/// Errors produced while validating a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A field value failed validation.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// The field that failed validation.
        field: &'static str,
        /// Why the value is invalid.
        reason: String,
    },
    /// A min/max pair is inverted.
    #[error("invalid range for {field}: minimum {min} exceeds maximum {max}")]
    InvalidRange {
        /// The field pair that failed validation.
        field: &'static str,
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Anything else (environment parse failures, unreadable config files).
    #[error("{0}")]
    Custom(String),
}

impl BuildError {
    /// Creates a custom build error.
    #[must_use]
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Worker pool configuration.
#[derive(Clone)]
pub struct PoolConfig {
    /// Workers kept resident while idle. Workers above this count retire
    /// after `idle_lifetime` without work.
    pub target_workers: usize,
    /// Hard upper bound on worker threads (resident + starting).
    pub max_workers: usize,
    /// How long an idle worker waits for work before considering retirement.
    pub idle_lifetime: Duration,
    /// How many workers may be in the starting state at once.
    pub max_starting: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
    /// Stack size per worker thread (0 = platform default).
    pub thread_stack_size: usize,
    /// Service a ready channel on the submitting thread instead of queueing.
    pub inline_submit: bool,
    /// Callback executed when a worker thread starts.
    pub on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Callback executed when a worker thread stops.
    pub on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl PoolConfig {
    /// Normalize values that have an obvious safe replacement.
    pub fn normalize(&mut self) {
        if self.max_starting == 0 {
            self.max_starting = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }

    /// Reject configurations the pool cannot honor.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_workers == 0 {
            return Err(BuildError::InvalidValue {
                field: "max_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_workers < self.target_workers {
            return Err(BuildError::InvalidRange {
                field: "target_workers/max_workers",
                min: self.target_workers,
                max: self.max_workers,
            });
        }
        if self.idle_lifetime.is_zero() {
            return Err(BuildError::InvalidValue {
                field: "idle_lifetime",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_workers: DEFAULT_TARGET_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            idle_lifetime: DEFAULT_IDLE_LIFETIME,
            max_starting: DEFAULT_MAX_STARTING,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            thread_stack_size: 0,
            inline_submit: true,
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("target_workers", &self.target_workers)
            .field("max_workers", &self.max_workers)
            .field("idle_lifetime", &self.idle_lifetime)
            .field("max_starting", &self.max_starting)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("inline_submit", &self.inline_submit)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn default_config_sane() {
        init_test("default_config_sane");
        let config = PoolConfig::default();
        crate::assert_with_log!(
            config.target_workers == 4,
            "target_workers",
            4,
            config.target_workers
        );
        crate::assert_with_log!(
            config.max_workers == 32,
            "max_workers",
            32,
            config.max_workers
        );
        crate::assert_with_log!(
            config.idle_lifetime == Duration::from_secs(30),
            "idle_lifetime",
            Duration::from_secs(30),
            config.idle_lifetime
        );
        assert!(config.validate().is_ok());
        crate::test_complete!("default_config_sane");
    }

    #[test]
    fn max_below_target_rejected() {
        init_test("max_below_target_rejected");
        let config = PoolConfig {
            target_workers: 8,
            max_workers: 2,
            ..PoolConfig::default()
        };
        let err = config.validate().unwrap_err();
        crate::assert_with_log!(
            matches!(err, BuildError::InvalidRange { min: 8, max: 2, .. }),
            "range error",
            "InvalidRange",
            err
        );
        crate::test_complete!("max_below_target_rejected");
    }

    #[test]
    fn zero_max_and_zero_lifetime_rejected() {
        init_test("zero_max_and_zero_lifetime_rejected");
        let zero_max = PoolConfig {
            target_workers: 0,
            max_workers: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(
            zero_max.validate(),
            Err(BuildError::InvalidValue {
                field: "max_workers",
                ..
            })
        ));

        let zero_life = PoolConfig {
            idle_lifetime: Duration::ZERO,
            ..PoolConfig::default()
        };
        assert!(matches!(
            zero_life.validate(),
            Err(BuildError::InvalidValue {
                field: "idle_lifetime",
                ..
            })
        ));
        crate::test_complete!("zero_max_and_zero_lifetime_rejected");
    }

    #[test]
    fn normalize_fills_blanks() {
        init_test("normalize_fills_blanks");
        let mut config = PoolConfig {
            max_starting: 0,
            thread_name_prefix: String::new(),
            ..PoolConfig::default()
        };
        config.normalize();
        assert_eq!(config.max_starting, 1);
        assert_eq!(config.thread_name_prefix, "streamaio-worker");
        crate::test_complete!("normalize_fills_blanks");
    }

    #[test]
    fn debug_hides_callbacks() {
        init_test("debug_hides_callbacks");
        let config = PoolConfig {
            on_thread_start: Some(Arc::new(|| {})),
            ..PoolConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(dbg.contains("on_thread_start: true"));
        assert!(dbg.contains("on_thread_stop: false"));
        crate::test_complete!("debug_hides_callbacks");
    }
}

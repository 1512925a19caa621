//! Environment variable and config file support for [`EngineBuilder`](super::builder::EngineBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`max_workers(8)`)
//! 2. **Environment variables**: values from `STREAMAIO_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`PoolConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `STREAMAIO_TARGET_WORKERS` | `usize` | `target_workers` |
//! | `STREAMAIO_MAX_WORKERS` | `usize` | `max_workers` |
//! | `STREAMAIO_IDLE_LIFETIME_MS` | `u64` | `idle_lifetime` |
//! | `STREAMAIO_MAX_STARTING` | `usize` | `max_starting` |
//! | `STREAMAIO_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `STREAMAIO_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `STREAMAIO_INLINE_SUBMIT` | `bool` | `inline_submit` |

use std::time::Duration;

use crate::runtime::config::{BuildError, PoolConfig};

/// Environment variable name for the resident worker target.
pub const ENV_TARGET_WORKERS: &str = "STREAMAIO_TARGET_WORKERS";
/// Environment variable name for the worker ceiling.
pub const ENV_MAX_WORKERS: &str = "STREAMAIO_MAX_WORKERS";
/// Environment variable name for the idle lifetime in milliseconds.
pub const ENV_IDLE_LIFETIME_MS: &str = "STREAMAIO_IDLE_LIFETIME_MS";
/// Environment variable name for the starting-worker throttle.
pub const ENV_MAX_STARTING: &str = "STREAMAIO_MAX_STARTING";
/// Environment variable name for the worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "STREAMAIO_THREAD_NAME_PREFIX";
/// Environment variable name for the worker stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "STREAMAIO_THREAD_STACK_SIZE";
/// Environment variable name for the inline-submit toggle.
pub const ENV_INLINE_SUBMIT: &str = "STREAMAIO_INLINE_SUBMIT";

/// Apply environment variable overrides to a [`PoolConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut PoolConfig) -> Result<(), BuildError> {
    if let Some(val) = read_env(ENV_TARGET_WORKERS) {
        config.target_workers = parse_usize(ENV_TARGET_WORKERS, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_WORKERS) {
        config.max_workers = parse_usize(ENV_MAX_WORKERS, &val)?;
    }
    if let Some(val) = read_env(ENV_IDLE_LIFETIME_MS) {
        config.idle_lifetime = Duration::from_millis(parse_u64(ENV_IDLE_LIFETIME_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_MAX_STARTING) {
        config.max_starting = parse_usize(ENV_MAX_STARTING, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_INLINE_SUBMIT) {
        config.inline_submit = parse_bool(ENV_INLINE_SUBMIT, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, BuildError> {
    val.trim().parse::<usize>().map_err(|e| {
        BuildError::custom(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, BuildError> {
    val.trim().parse::<u64>().map_err(|e| {
        BuildError::custom(format!(
            "invalid value for {var_name}: expected u64, got {val:?} ({e})"
        ))
    })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, BuildError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(BuildError::custom(format!(
            "invalid value for {var_name}: expected bool (true/false/1/0/yes/no), got {val:?}"
        ))),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable pool configuration.
///
/// ```toml
/// [pool]
/// target_workers = 4
/// max_workers = 32
/// idle_lifetime_ms = 30000
/// max_starting = 4
/// thread_name_prefix = "myapp-aio"
/// inline_submit = true
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct EngineTomlConfig {
    /// Worker pool settings.
    #[serde(default)]
    pub pool: PoolToml,
}

/// Pool section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct PoolToml {
    /// Resident worker target.
    pub target_workers: Option<usize>,
    /// Worker ceiling.
    pub max_workers: Option<usize>,
    /// Idle lifetime in milliseconds.
    pub idle_lifetime_ms: Option<u64>,
    /// Starting-worker throttle.
    pub max_starting: Option<usize>,
    /// Worker thread name prefix.
    pub thread_name_prefix: Option<String>,
    /// Worker stack size in bytes.
    pub thread_stack_size: Option<usize>,
    /// Inline service on submit.
    pub inline_submit: Option<bool>,
}

/// Apply a parsed TOML config to a [`PoolConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut PoolConfig, toml: &EngineTomlConfig) {
    if let Some(v) = toml.pool.target_workers {
        config.target_workers = v;
    }
    if let Some(v) = toml.pool.max_workers {
        config.max_workers = v;
    }
    if let Some(v) = toml.pool.idle_lifetime_ms {
        config.idle_lifetime = Duration::from_millis(v);
    }
    if let Some(v) = toml.pool.max_starting {
        config.max_starting = v;
    }
    if let Some(ref v) = toml.pool.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.pool.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(v) = toml.pool.inline_submit {
        config.inline_submit = v;
    }
}

/// Parse a TOML string into an [`EngineTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<EngineTomlConfig, BuildError> {
    toml::from_str(toml_str)
        .map_err(|e| BuildError::custom(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into an [`EngineTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<EngineTomlConfig, BuildError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        BuildError::custom(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        clean_env_locked();
        f()
    }

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
            let result = f();
            for (k, _) in vars {
                std::env::remove_var(k);
            }
            result
        })
    }

    fn clean_env_locked() {
        for var in &[
            ENV_TARGET_WORKERS,
            ENV_MAX_WORKERS,
            ENV_IDLE_LIFETIME_MS,
            ENV_MAX_STARTING,
            ENV_THREAD_NAME_PREFIX,
            ENV_THREAD_STACK_SIZE,
            ENV_INLINE_SUBMIT,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parse_usize_valid() {
        assert_eq!(super::parse_usize("TEST", "42").unwrap(), 42);
        assert_eq!(super::parse_usize("TEST", " 100 ").unwrap(), 100);
        assert!(super::parse_usize("TEST", "-1").is_err());
    }

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "on"] {
            assert!(super::parse_bool("TEST", v).unwrap());
        }
        for v in ["false", "0", "no", "Off"] {
            assert!(!super::parse_bool("TEST", v).unwrap());
        }
        assert!(super::parse_bool("TEST", "maybe").is_err());
    }

    #[test]
    fn no_env_leaves_defaults() {
        crate::test_utils::init_test_logging();
        with_clean_env(|| {
            let mut config = PoolConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.target_workers, 4);
            assert_eq!(config.max_workers, 32);
            assert!(config.inline_submit);
        });
    }

    #[test]
    fn env_overrides_apply() {
        crate::test_utils::init_test_logging();
        with_envs(
            &[
                (ENV_TARGET_WORKERS, "2"),
                (ENV_MAX_WORKERS, "6"),
                (ENV_IDLE_LIFETIME_MS, "250"),
                (ENV_THREAD_NAME_PREFIX, "env-aio"),
                (ENV_INLINE_SUBMIT, "off"),
            ],
            || {
                let mut config = PoolConfig::default();
                apply_env_overrides(&mut config).unwrap();
                assert_eq!(config.target_workers, 2);
                assert_eq!(config.max_workers, 6);
                assert_eq!(config.idle_lifetime, Duration::from_millis(250));
                assert_eq!(config.thread_name_prefix, "env-aio");
                assert!(!config.inline_submit);
            },
        );
    }

    #[test]
    fn env_garbage_is_an_error() {
        crate::test_utils::init_test_logging();
        with_envs(&[(ENV_MAX_WORKERS, "lots")], || {
            let mut config = PoolConfig::default();
            let err = apply_env_overrides(&mut config).unwrap_err();
            assert!(err.to_string().contains(ENV_MAX_WORKERS));
        });
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_overrides_apply() {
        let parsed = parse_toml_str(
            r#"
            [pool]
            target_workers = 1
            max_workers = 3
            idle_lifetime_ms = 500
            "#,
        )
        .unwrap();
        let mut config = PoolConfig::default();
        apply_toml_config(&mut config, &parsed);
        assert_eq!(config.target_workers, 1);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.idle_lifetime, Duration::from_millis(500));
        assert_eq!(config.max_starting, 4);
    }
}

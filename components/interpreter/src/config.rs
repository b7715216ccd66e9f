//! Runtime configuration
//!
//! Tuning knobs of one runtime instance. A configuration can be built in code
//! or loaded from JSON; missing fields take their defaults.

use memory_manager::{GcParams, HeapConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound accepted for `max_stack`.
pub const MAX_STACK_LIMIT: usize = 1_000_000;

/// Collector mode a runtime starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GcMode {
    /// Incremental mark and sweep
    #[default]
    Incremental,
    /// Young/old collections
    Generational,
}

/// Rejected configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON text could not be parsed
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// A field is out of range
    #[error("invalid value for '{field}': {reason}")]
    OutOfRange {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Configuration of a runtime instance.
///
/// # Examples
///
/// ```
/// use interpreter::{GcMode, RuntimeConfig};
///
/// let config = RuntimeConfig::from_json(r#"{ "gc_mode": "generational", "gc_pause": 150 }"#).unwrap();
/// assert_eq!(config.gc_mode, GcMode::Generational);
/// assert_eq!(config.gc_pause, 150);
/// assert_eq!(config.max_stack, 1_000_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Collector mode at startup
    pub gc_mode: GcMode,
    /// Incremental pause, in percent of memory in use after a cycle
    pub gc_pause: usize,
    /// Incremental step multiplier
    pub gc_step_multiplier: usize,
    /// Log2 of the incremental step size in bytes
    pub gc_step_size: u32,
    /// Generational minor multiplier, in percent
    pub gen_minor_multiplier: usize,
    /// Generational major multiplier, in percent
    pub gen_major_multiplier: usize,
    /// Largest value stack of a thread, in slots
    pub max_stack: usize,
    /// Nested native calls allowed before "C stack overflow"
    pub max_native_calls: u32,
    /// Fixed seed for string hashing
    pub hash_seed: Option<u32>,
    /// Byte cap on the heap; exceeding it raises memory errors
    pub memory_limit: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let params = GcParams::default();
        Self {
            gc_mode: GcMode::Incremental,
            gc_pause: params.pause,
            gc_step_multiplier: params.step_mul,
            gc_step_size: params.step_size,
            gen_minor_multiplier: params.gen_minor_mul,
            gen_major_multiplier: params.gen_major_mul,
            max_stack: 1_000_000,
            max_native_calls: 200,
            hash_seed: None,
            memory_limit: None,
        }
    }
}

impl RuntimeConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks every field for a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_stack < 2 * memory_manager::BASIC_STACK_SIZE {
            return Err(ConfigError::OutOfRange {
                field: "max_stack",
                reason: "too small for a thread's initial stack",
            });
        }
        if self.max_stack > MAX_STACK_LIMIT {
            return Err(ConfigError::OutOfRange {
                field: "max_stack",
                reason: "exceeds the largest supported stack",
            });
        }
        if self.max_native_calls == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_native_calls",
                reason: "must be positive",
            });
        }
        if self.gc_step_size >= usize::BITS {
            return Err(ConfigError::OutOfRange {
                field: "gc_step_size",
                reason: "larger than the address space",
            });
        }
        if self.gc_pause == 0 {
            return Err(ConfigError::OutOfRange {
                field: "gc_pause",
                reason: "must be positive",
            });
        }
        Ok(())
    }

    /// Collector parameters.
    pub fn gc_params(&self) -> GcParams {
        GcParams {
            pause: self.gc_pause,
            step_mul: self.gc_step_multiplier,
            step_size: self.gc_step_size,
            gen_minor_mul: self.gen_minor_multiplier,
            gen_major_mul: self.gen_major_multiplier,
        }
    }

    pub(crate) fn heap_config(&self) -> HeapConfig {
        HeapConfig {
            seed: self.hash_seed,
            params: self.gc_params(),
            generational: self.gc_mode == GcMode::Generational,
            max_stack: self.max_stack,
        }
    }
}

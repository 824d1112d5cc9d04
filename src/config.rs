//! Binding layer configuration
//!
//! Read from TOML, with environment overrides applied on top:
//!
//! ```toml
//! unbox_scratch_size = 256
//! scratch_pool_limit = 4
//! warn_legacy_signatures = true
//! cache_static_bindings = true
//! ```

use crate::error::{BindingError, Result};
use crate::interop::PRIMITIVE_CELL_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Bytes of the per-call result unboxing cell
    #[serde(default = "default_unbox_scratch_size")]
    pub unbox_scratch_size: usize,

    /// Idle scratch sets a bound method keeps for reuse
    #[serde(default = "default_scratch_pool_limit")]
    pub scratch_pool_limit: usize,

    #[serde(default = "default_true")]
    pub warn_legacy_signatures: bool,

    /// Share dispatchers of receiver-less bindings
    #[serde(default = "default_true")]
    pub cache_static_bindings: bool,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            unbox_scratch_size: default_unbox_scratch_size(),
            scratch_pool_limit: default_scratch_pool_limit(),
            warn_legacy_signatures: true,
            cache_static_bindings: true,
        }
    }
}

fn default_true() -> bool { true }
fn default_unbox_scratch_size() -> usize { 256 }
fn default_scratch_pool_limit() -> usize { 4 }

impl BindingConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BindingError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BindingError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `INTEROP_BINDINGS_*` overrides
    pub fn with_env_overrides(mut self) -> Result<Self> {
        // INTEROP_BINDINGS_UNBOX_SCRATCH: unboxing cell size in bytes
        if let Some(size) = env_parse("INTEROP_BINDINGS_UNBOX_SCRATCH", parse_usize)? {
            self.unbox_scratch_size = size;
        }

        // INTEROP_BINDINGS_SCRATCH_POOL: idle scratch sets per binding
        if let Some(limit) = env_parse("INTEROP_BINDINGS_SCRATCH_POOL", parse_usize)? {
            self.scratch_pool_limit = limit;
        }

        // INTEROP_BINDINGS_WARN_LEGACY: 1/true/0/false
        if let Some(warn) = env_parse("INTEROP_BINDINGS_WARN_LEGACY", parse_bool)? {
            self.warn_legacy_signatures = warn;
        }

        // INTEROP_BINDINGS_CACHE_STATIC: 1/true/0/false
        if let Some(cache) = env_parse("INTEROP_BINDINGS_CACHE_STATIC", parse_bool)? {
            self.cache_static_bindings = cache;
        }

        self.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.unbox_scratch_size < PRIMITIVE_CELL_SIZE {
            return Err(BindingError::Config(format!(
                "unbox_scratch_size must be at least {} bytes, got {}",
                PRIMITIVE_CELL_SIZE, self.unbox_scratch_size
            )));
        }
        if self.scratch_pool_limit == 0 {
            return Err(BindingError::Config("scratch_pool_limit must be at least 1".into()));
        }
        Ok(self)
    }
}

fn env_parse<T>(key: &str, parse: fn(&str) -> Option<T>) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => parse(raw.trim())
            .map(Some)
            .ok_or_else(|| BindingError::Config(format!("invalid value for {}: '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

fn parse_usize(raw: &str) -> Option<usize> {
    raw.parse().ok()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

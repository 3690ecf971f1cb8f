//! Compiler configuration (`garnet-jit.toml`) parsing and validation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// JVM ceiling on the size of one method body, in bytes.
pub const MAX_METHOD_SIZE: usize = 65_535;

/// Errors that can occur when loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings that steer code generation for every unit a script compiler
/// produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// Emit dynamically-linked inline-cache calls instead of cached call
    /// site objects.
    pub invokedynamic: bool,

    /// Specialize binary operators against literal fixnum/float operands.
    pub fast_ops: bool,

    /// Estimated code size after which a body should be outlined into a
    /// chained segment.
    pub chain_size: usize,

    /// Log a disassembly of every finished method at debug level.
    pub dump_bytecode: bool,

    /// Encoding assumed for string literals that do not name one.
    pub source_encoding: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            invokedynamic: false,
            fast_ops: false,
            chain_size: 30_000,
            dump_bytecode: false,
            source_encoding: "UTF-8".to_string(),
        }
    }
}

impl CompilerConfig {
    /// Parse a configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load a configuration file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::from_path(path)?.from_env_overrides())
    }

    /// Apply `GARNET_JIT_DUMP` and `GARNET_JIT_FASTOPS` environment overrides.
    #[must_use]
    pub fn from_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| lookup(name).is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        if flag("GARNET_JIT_DUMP") {
            self.dump_bytecode = true;
        }
        if flag("GARNET_JIT_FASTOPS") {
            self.fast_ops = true;
        }
        self
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_size == 0 || self.chain_size >= MAX_METHOD_SIZE {
            return Err(ConfigError::Invalid(format!(
                "chain_size must be between 1 and {}, got {}",
                MAX_METHOD_SIZE - 1,
                self.chain_size
            )));
        }
        if self.source_encoding.is_empty() {
            return Err(ConfigError::Invalid(
                "source_encoding must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

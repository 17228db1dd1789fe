//! Environment variable loading with a shared prefix
//!
//! Every runtime setting of the engine can be overridden through a
//! `FLOWCORE_<NAME>` variable. Values that fail to parse fall back to the
//! provided default rather than aborting start-up.

use std::env;
use std::str::FromStr;

/// Loads prefixed environment variables with typed fallbacks
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Create a new environment loader with the given prefix
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    /// Load a string value with default
    pub fn load_string(&self, suffix: &str, default: &str) -> String {
        env::var(self.key(suffix)).unwrap_or_else(|_| default.to_string())
    }

    /// Load a parsed value with default
    pub fn load_parsed<T>(&self, suffix: &str, default: T) -> T
    where
        T: FromStr,
    {
        self.load_optional(suffix).unwrap_or(default)
    }

    /// Load an optional value, `None` when unset or unparsable
    pub fn load_optional<T>(&self, suffix: &str) -> Option<T>
    where
        T: FromStr,
    {
        env::var(self.key(suffix)).ok().and_then(|v| v.parse().ok())
    }

    /// Load a parsed value that must also satisfy `validator`
    pub fn load_validated<T, F>(&self, suffix: &str, default: T, validator: F) -> T
    where
        T: FromStr + Clone,
        F: Fn(&T) -> bool,
    {
        match self.load_optional::<T>(suffix) {
            Some(value) if validator(&value) => value,
            Some(_) => {
                tracing::warn!(key = %self.key(suffix), "ignoring out-of-range value");
                default
            }
            None => default,
        }
    }
}

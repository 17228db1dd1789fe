//! Secrets available to HTTP plugin templates

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised by a secrets manager
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SecretsError {
    /// The backing store could not be read
    #[error("Secrets store unavailable: {0}")]
    Unavailable(String),
}

/// Resolves the secrets a workflow's plugins may reference
///
/// Secrets are read once when a runner is built and exposed to URL and header
/// templates as `secrets.<NAME>`; they are never stored in the context.
pub trait SecretsManager: Send + Sync {
    /// Every secret, by name
    fn get_all(&self) -> Result<HashMap<String, String>, SecretsError>;
}

/// Secrets taken from environment variables sharing a prefix
///
/// `FLOWCORE_SECRET_API_KEY` is exposed as `API_KEY` with the default prefix.
#[derive(Debug, Clone)]
pub struct EnvSecretsManager {
    prefix: String,
}

impl EnvSecretsManager {
    /// Default variable prefix
    pub const DEFAULT_PREFIX: &'static str = "FLOWCORE_SECRET_";

    /// Read variables starting with `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Default for EnvSecretsManager {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

impl SecretsManager for EnvSecretsManager {
    fn get_all(&self) -> Result<HashMap<String, String>, SecretsError> {
        Ok(std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(&self.prefix)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), value))
            })
            .collect())
    }
}

/// Fixed secrets, for tests and embedding
#[derive(Clone, Default)]
pub struct InMemorySecretsManager {
    secrets: HashMap<String, String>,
}

impl fmt::Debug for InMemorySecretsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.secrets.keys().collect();
        names.sort();
        f.debug_struct("InMemorySecretsManager").field("names", &names).finish()
    }
}

impl InMemorySecretsManager {
    /// Wrap a map of secrets
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    /// Add one secret
    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

impl SecretsManager for InMemorySecretsManager {
    fn get_all(&self) -> Result<HashMap<String, String>, SecretsError> {
        Ok(self.secrets.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_secrets_strip_prefix() {
        std::env::set_var("FLOWCORE_TEST_SECRET_API_KEY", "abc");
        std::env::set_var("FLOWCORE_TEST_SECRET_", "ignored");

        let secrets = EnvSecretsManager::new("FLOWCORE_TEST_SECRET_").get_all().unwrap();

        assert_eq!(secrets.get("API_KEY").map(String::as_str), Some("abc"));
        assert_eq!(secrets.len(), 1);

        std::env::remove_var("FLOWCORE_TEST_SECRET_API_KEY");
        std::env::remove_var("FLOWCORE_TEST_SECRET_");
    }

    #[test]
    fn test_in_memory_secrets() {
        let manager = InMemorySecretsManager::default().with_secret("TOKEN", "t");
        assert_eq!(manager.get_all().unwrap()["TOKEN"], "t");
        assert!(!format!("{manager:?}").contains("\"t\""));
    }
}

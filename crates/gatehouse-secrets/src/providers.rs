//! Secret provider trait and implementations.

use async_trait::async_trait;
use gatehouse_core::secrets::SecretValue;
use gatehouse_core::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// Source of secret values.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Get a secret by name.
    async fn get(&self, name: &str) -> Result<SecretValue>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Reads secrets from the process environment.
pub struct EnvProvider {
    prefix: Option<String>,
}

impl EnvProvider {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    fn resolve_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(p) => format!("{}_{}", p, name),
            None => name.to_string(),
        }
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SecretProvider for EnvProvider {
    async fn get(&self, name: &str) -> Result<SecretValue> {
        std::env::var(self.resolve_name(name))
            .map(SecretValue::new)
            .map_err(|_| Error::SecretNotFound(name.to_string()))
    }

    fn name(&self) -> &str {
        "env"
    }
}

/// Secrets loaded from a local key/value file.
///
/// JSON files are parsed as JSON; anything else is read as YAML. Both must
/// be a flat map of names to string values.
#[derive(Default)]
pub struct FileProvider {
    secrets: HashMap<String, String>,
}

impl FileProvider {
    pub fn from_map(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Internal(format!(
                "Failed to read secrets file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let secrets: HashMap<String, String> = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        Ok(Self { secrets })
    }
}

#[async_trait]
impl SecretProvider for FileProvider {
    async fn get(&self, name: &str) -> Result<SecretValue> {
        self.secrets
            .get(name)
            .map(SecretValue::new)
            .ok_or_else(|| Error::SecretNotFound(name.to_string()))
    }

    fn name(&self) -> &str {
        "file"
    }
}

//! Secret manager for resolving and masking secrets.

use crate::providers::SecretProvider;
use gatehouse_core::pipeline::SecretReference;
use gatehouse_core::secrets::SecretValue;
use gatehouse_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const MASK: &str = "***";

/// Values shorter than this are never masked; replacing them would mangle
/// ordinary output.
const MIN_MASK_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct SecretManagerConfig {
    pub cache_ttl: Duration,
    /// Provider used by references that name none.
    pub default_provider: String,
}

impl Default for SecretManagerConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            default_provider: "env".to_string(),
        }
    }
}

struct CachedSecret {
    value: SecretValue,
    cached_at: Instant,
}

/// Resolves secret references against registered providers.
pub struct SecretManager {
    config: SecretManagerConfig,
    providers: HashMap<String, Arc<dyn SecretProvider>>,
    cache: RwLock<HashMap<String, CachedSecret>>,
}

impl SecretManager {
    pub fn new(config: SecretManagerConfig) -> Self {
        Self {
            config,
            providers: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_provider(&mut self, name: &str, provider: Arc<dyn SecretProvider>) {
        info!(provider = %name, "Registering secret provider");
        self.providers.insert(name.to_string(), provider);
    }

    /// Resolve a single secret reference.
    pub async fn resolve(&self, reference: &SecretReference) -> Result<SecretValue> {
        let provider_key = if reference.provider.is_empty() {
            self.config.default_provider.as_str()
        } else {
            reference.provider.as_str()
        };
        let cache_key = format!("{}:{}", provider_key, reference.lookup_key());

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&cache_key)
                && cached.cached_at.elapsed() < self.config.cache_ttl
            {
                debug!(name = %reference.name, "Secret cache hit");
                return Ok(with_masking(&cached.value, reference.masked));
            }
        }

        let provider = self
            .providers
            .get(provider_key)
            .ok_or_else(|| Error::SecretProviderNotConfigured(provider_key.to_string()))?;

        let value = provider.get(reference.lookup_key()).await?;
        let value = with_masking(&value, reference.masked);

        self.cache.write().await.insert(
            cache_key,
            CachedSecret {
                value: value.clone(),
                cached_at: Instant::now(),
            },
        );

        debug!(name = %reference.name, provider = %provider.name(), "Secret resolved");
        Ok(value)
    }

    /// Resolve references into an environment map keyed by reference name.
    ///
    /// Missing optional secrets are left out; a missing required secret is
    /// an error.
    pub async fn resolve_all(
        &self,
        references: &[SecretReference],
    ) -> Result<HashMap<String, SecretValue>> {
        let mut result = HashMap::with_capacity(references.len());

        for reference in references {
            match self.resolve(reference).await {
                Ok(value) => {
                    result.insert(reference.name.clone(), value);
                }
                Err(Error::SecretNotFound(_)) if !reference.required => {
                    warn!(name = %reference.name, "Optional secret not found");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(result)
    }
}

impl Default for SecretManager {
    fn default() -> Self {
        Self::new(SecretManagerConfig::default())
    }
}

fn with_masking(value: &SecretValue, masked: bool) -> SecretValue {
    if masked {
        SecretValue::new(value.expose())
    } else {
        SecretValue::unmasked(value.expose())
    }
}

/// Mask the given secret values in `input`, longest first so overlapping
/// values do not leave partial leaks.
pub fn mask_values<'a>(input: &str, values: impl IntoIterator<Item = &'a SecretValue>) -> String {
    let mut secrets: Vec<&str> = values
        .into_iter()
        .filter(|v| v.masked && v.expose().len() >= MIN_MASK_LEN)
        .map(SecretValue::expose)
        .collect();
    secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

    secrets
        .into_iter()
        .fold(input.to_string(), |output, secret| output.replace(secret, MASK))
}

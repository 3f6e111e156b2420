use crate::core::stage_cache::StageCache;
use crate::models::{NormalizedKey, ResolvedAddress, StageStats};
use crate::services::{LookupError, PostalLookup};
use std::sync::Arc;
use std::time::Duration;

/// Postal code to address stage
///
/// Each distinct key is sent to the lookup service at most once while the
/// stage is open. Invalid keys, unknown keys and timeouts resolve to an
/// absent address; transport failures are returned to the caller.
pub struct AddressResolver {
    lookup: Arc<dyn PostalLookup>,
    cache: StageCache<NormalizedKey, Option<String>>,
    call_timeout: Duration,
}

impl AddressResolver {
    pub fn new(lookup: Arc<dyn PostalLookup>, call_timeout: Duration) -> Self {
        Self {
            lookup,
            cache: StageCache::new("address_resolver"),
            call_timeout,
        }
    }

    pub async fn resolve(&self, key: &NormalizedKey) -> Result<ResolvedAddress, Arc<LookupError>> {
        let address = self
            .cache
            .get_or_try_insert(key.clone(), self.fetch(key))
            .await?;

        Ok(ResolvedAddress {
            key: key.clone(),
            address,
        })
    }

    async fn fetch(&self, key: &NormalizedKey) -> Result<Option<String>, LookupError> {
        match tokio::time::timeout(self.call_timeout, self.lookup.lookup(key)).await {
            Ok(Ok(address)) => {
                let rendered = address.to_string();
                if rendered.is_empty() {
                    tracing::info!("Postal code {} resolved to an empty address", key);
                    return Ok(None);
                }
                tracing::debug!("Postal code {} -> {}", key, rendered);
                Ok(Some(rendered))
            }
            Ok(Err(e)) if e.is_timeout() => {
                tracing::warn!("Postal lookup for {} timed out: {}, dropping", key, e);
                Ok(None)
            }
            Ok(Err(e)) if e.is_unresolvable() => {
                tracing::info!("Dropping postal code {}: {}", key, e);
                Ok(None)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(
                    "Postal lookup for {} timed out after {:?}, dropping",
                    key,
                    self.call_timeout
                );
                Ok(None)
            }
        }
    }

    pub async fn cached_keys(&self) -> u64 {
        self.cache.len().await
    }

    /// Close the stage and discard every cached address
    pub async fn finish_stage(&self) -> StageStats {
        self.cache.finish().await
    }
}

use crate::core::stage_cache::StageCache;
use crate::models::{Coordinate, StageStats};
use crate::services::{GeocodeError, GeocodingService};
use std::sync::Arc;
use std::time::Duration;

/// Address to coordinate stage, memoized per distinct address string
pub struct Geocoder {
    service: Arc<dyn GeocodingService>,
    cache: StageCache<String, Option<Coordinate>>,
    call_timeout: Duration,
}

impl Geocoder {
    pub fn new(service: Arc<dyn GeocodingService>, call_timeout: Duration) -> Self {
        Self {
            service,
            cache: StageCache::new("geocoder"),
            call_timeout,
        }
    }

    /// Geocode an address; `Ok(None)` when the service has no match or timed out
    pub async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, Arc<GeocodeError>> {
        self.cache
            .get_or_try_insert(address.to_string(), self.fetch(address))
            .await
    }

    async fn fetch(&self, address: &str) -> Result<Option<Coordinate>, GeocodeError> {
        match tokio::time::timeout(self.call_timeout, self.service.geocode(address)).await {
            Ok(Ok(Some(coordinate))) => {
                tracing::debug!("Geocoded {:?} -> {}", address, coordinate);
                Ok(Some(coordinate))
            }
            Ok(Ok(None)) => {
                tracing::info!("Could not geocode address {:?}", address);
                Ok(None)
            }
            Ok(Err(e)) if e.is_timeout() => {
                tracing::warn!("Geocoding {:?} timed out: {}, dropping", address, e);
                Ok(None)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(
                    "Geocoding {:?} timed out after {:?}, dropping",
                    address,
                    self.call_timeout
                );
                Ok(None)
            }
        }
    }

    pub async fn cached_addresses(&self) -> u64 {
        self.cache.len().await
    }

    /// Close the stage and discard every cached coordinate
    pub async fn finish_stage(&self) -> StageStats {
        self.cache.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowOrFixed {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GeocodingService for SlowOrFixed {
        async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match address {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(None)
                }
                "nowhere" => Ok(None),
                "broken" => Err(GeocodeError::InvalidResponse("missing features".into())),
                _ => Ok(Some(Coordinate::new(-23.56, -46.66))),
            }
        }
    }

    fn geocoder(timeout: Duration) -> (Arc<SlowOrFixed>, Geocoder) {
        let service = Arc::new(SlowOrFixed { calls: AtomicUsize::new(0) });
        (service.clone(), Geocoder::new(service, timeout))
    }

    #[tokio::test]
    async fn test_equal_addresses_hit_cache() {
        let (service, geocoder) = geocoder(Duration::from_secs(1));
        let a = geocoder.geocode("Alameda Franca, São Paulo - SP").await.unwrap();
        let b = geocoder.geocode("Alameda Franca, São Paulo - SP").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_match_is_none() {
        let (_, geocoder) = geocoder(Duration::from_secs(1));
        assert_eq!(geocoder.geocode("nowhere").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_timeout_is_treated_as_no_match() {
        let (_, geocoder) = geocoder(Duration::from_millis(50));
        assert_eq!(geocoder.geocode("slow").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_service_failure_is_surfaced() {
        let (_, geocoder) = geocoder(Duration::from_secs(1));
        assert!(geocoder.geocode("broken").await.is_err());
        // Failures are not cached
        assert_eq!(geocoder.cached_addresses().await, 0);
    }
}

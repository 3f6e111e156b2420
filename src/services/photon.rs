use crate::models::Coordinate;
use crate::services::traits::{GeocodeError, GeocodingService};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Photon (komoot) geocoding client
///
/// Sends `GET {base_url}/api/?q=...&limit=1` and reads the first GeoJSON
/// feature's point geometry.
pub struct PhotonClient {
    base_url: String,
    language: Option<String>,
    client: Client,
}

impl PhotonClient {
    /// Create a new Photon client
    ///
    /// `connect_timeout` bounds connection setup only; the whole call is
    /// bounded by the geocoder stage.
    pub fn new(
        base_url: String,
        user_agent: &str,
        language: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            base_url,
            language,
            client,
        })
    }

    fn search_url(&self, address: &str) -> String {
        let mut url = format!(
            "{}/api/?q={}&limit=1",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(address)
        );
        if let Some(lang) = &self.language {
            url.push_str("&lang=");
            url.push_str(&urlencoding::encode(lang));
        }
        url
    }
}

/// Extract the first feature's coordinate from a GeoJSON feature collection
fn first_coordinate(json: &Value) -> Result<Option<Coordinate>, GeocodeError> {
    let features = json
        .get("features")
        .and_then(|f| f.as_array())
        .ok_or_else(|| GeocodeError::InvalidResponse("Missing features array".into()))?;

    let Some(feature) = features.first() else {
        return Ok(None);
    };

    // GeoJSON order is [longitude, latitude]
    let coordinates = feature
        .pointer("/geometry/coordinates")
        .and_then(|c| c.as_array())
        .ok_or_else(|| GeocodeError::InvalidResponse("Feature without point geometry".into()))?;

    match (
        coordinates.first().and_then(Value::as_f64),
        coordinates.get(1).and_then(Value::as_f64),
    ) {
        (Some(longitude), Some(latitude)) => Ok(Some(Coordinate::new(latitude, longitude))),
        _ => Err(GeocodeError::InvalidResponse(format!(
            "Malformed coordinates: {}",
            Value::Array(coordinates.clone())
        ))),
    }
}

#[async_trait]
impl GeocodingService for PhotonClient {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinate>, GeocodeError> {
        let url = self.search_url(address);

        tracing::debug!("Geocoding address: {}", url);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Unable to read body".to_string());
            tracing::error!("Photon returned {} for {:?}: {}", status, address, body);
            return Err(GeocodeError::ApiError(format!(
                "Failed to geocode address: {}",
                status
            )));
        }

        let json: Value = response.json().await?;
        first_coordinate(&json)
    }
}

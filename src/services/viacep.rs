use crate::models::{NormalizedKey, PostalAddress};
use crate::services::traits::{LookupError, PostalLookup};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Length of a Brazilian postal code (CEP)
const CEP_LENGTH: usize = 8;

/// ViaCEP postal-code lookup client
///
/// Talks to `GET {base_url}/ws/{cep}/json/`. Keys that are not eight digits
/// are rejected locally without a request.
pub struct ViaCepClient {
    base_url: String,
    client: Client,
}

/// Address payload returned by ViaCEP
#[derive(Debug, Deserialize)]
struct ViaCepAddress {
    #[serde(default)]
    logradouro: String,
    #[serde(default)]
    bairro: String,
    #[serde(default)]
    localidade: String,
    #[serde(default)]
    uf: String,
}

impl From<ViaCepAddress> for PostalAddress {
    fn from(value: ViaCepAddress) -> Self {
        PostalAddress {
            street: value.logradouro,
            neighborhood: value.bairro,
            city: value.localidade,
            state: value.uf,
        }
    }
}

impl ViaCepClient {
    /// Create a new ViaCEP client
    ///
    /// `connect_timeout` bounds connection setup only; the whole call is
    /// bounded by the resolver stage.
    pub fn new(base_url: String, connect_timeout: Duration) -> Result<Self, LookupError> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;

        Ok(Self { base_url, client })
    }

    fn validate(key: &NormalizedKey) -> Result<(), LookupError> {
        let cep = key.as_str();
        if cep.len() != CEP_LENGTH || !cep.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LookupError::InvalidKey(cep.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PostalLookup for ViaCepClient {
    async fn lookup(&self, key: &NormalizedKey) -> Result<PostalAddress, LookupError> {
        Self::validate(key)?;

        let url = format!(
            "{}/ws/{}/json/",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(key.as_str())
        );

        tracing::debug!("Looking up postal code: {}", url);

        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::BAD_REQUEST => return Err(LookupError::InvalidKey(key.to_string())),
            StatusCode::NOT_FOUND => return Err(LookupError::NotFound(key.to_string())),
            status if !status.is_success() => {
                return Err(LookupError::ApiError(format!(
                    "Failed to look up postal code {}: {}",
                    key, status
                )));
            }
            _ => {}
        }

        let json: Value = response.json().await?;

        // ViaCEP answers unknown codes with 200 and {"erro": true} (or "true")
        let not_found = match json.get("erro") {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(flag)) => flag == "true",
            _ => false,
        };
        if not_found {
            return Err(LookupError::NotFound(key.to_string()));
        }

        serde_json::from_value::<ViaCepAddress>(json)
            .map(PostalAddress::from)
            .map_err(|e| LookupError::InvalidResponse(format!("Failed to parse address: {}", e)))
    }
}

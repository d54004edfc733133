//! Per-marketplace auth header construction and the Ozon performance
//! OAuth2 token cache.

use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::IngestError;
use crate::models::Credentials;
use crate::state::StateStore;

/// Build the auth headers for a call, given decrypted credentials. The
/// Ozon performance surface additionally needs a bearer token fetched
/// separately — see `PerformanceTokenCache`.
pub fn auth_headers(credentials: &Credentials) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match credentials {
        Credentials::Wildberries { token } => {
            if let Ok(v) = HeaderValue::from_str(token) {
                headers.insert("Authorization", v);
            }
        }
        Credentials::Ozon {
            api_key, client_id, ..
        } => {
            if let Ok(v) = HeaderValue::from_str(api_key) {
                headers.insert("Api-Key", v);
            }
            if let Ok(v) = HeaderValue::from_str(client_id) {
                headers.insert("Client-Id", v);
            }
        }
    }
    headers
}

const OZON_PERFORMANCE_TOKEN_URL: &str = "https://api-performance.ozon.ru/api/client/token";

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Fetches and caches the Ozon performance API's OAuth2 `client_credentials`
/// token. Cached in Redis with TTL = 5/6 of the server-declared expiry, so
/// a cold process still hits the cache instead of refetching.
pub struct PerformanceTokenCache {
    http: reqwest::Client,
    state: StateStore,
}

impl PerformanceTokenCache {
    pub fn new(http: reqwest::Client, state: StateStore) -> Self {
        Self { http, state }
    }

    pub async fn get(
        &self,
        shop_id: i64,
        client_id: &str,
        client_secret: &str,
    ) -> Result<String, IngestError> {
        if let Some(token) = self.state.get_performance_token(shop_id).await? {
            return Ok(token);
        }

        let resp = self
            .http
            .post(OZON_PERFORMANCE_TOKEN_URL)
            .json(&serde_json::json!({
                "client_id": client_id,
                "client_secret": client_secret,
                "grant_type": "client_credentials",
            }))
            .send()
            .await
            .map_err(|e| IngestError::TransientNetwork {
                marketplace: "ozon:performance_token".into(),
                source: e.into(),
            })?;

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| IngestError::DataFormat {
                marketplace: "ozon".into(),
                endpoint: "performance_token".into(),
                detail: e.to_string(),
            })?;

        let ttl_secs = (token.expires_in * 5) / 6;
        self.state
            .set_performance_token(shop_id, &token.access_token, Some(ttl_secs.max(1)))
            .await?;

        Ok(token.access_token)
    }
}

pub fn bearer_header(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&format!("Bearer {token}")) {
        headers.insert("Authorization", v);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildberries_auth_sets_bare_token() {
        let headers = auth_headers(&Credentials::Wildberries {
            token: "tok-123".into(),
        });
        assert_eq!(headers.get("Authorization").unwrap(), "tok-123");
    }

    #[test]
    fn ozon_auth_sets_api_key_and_client_id() {
        let headers = auth_headers(&Credentials::Ozon {
            api_key: "key-1".into(),
            client_id: "client-1".into(),
            performance_client_id: None,
            performance_secret: None,
        });
        assert_eq!(headers.get("Api-Key").unwrap(), "key-1");
        assert_eq!(headers.get("Client-Id").unwrap(), "client-1");
    }
}

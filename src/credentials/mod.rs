//! Credential store.
//!
//! `get` decrypts the shop's envelope into marketplace-specific
//! credentials; `set` probes the marketplace's low-cost endpoints before
//! persisting, returning non-blocking warnings for unreachable sub-APIs.

pub mod envelope;

use sqlx::PgPool;

use crate::error::IngestError;
use crate::models::{Credentials, MarketplaceKind};
use envelope::Envelope;

pub struct CredentialStore {
    pool: PgPool,
    process_secret: String,
}

impl CredentialStore {
    pub fn new(pool: PgPool, process_secret: String) -> Self {
        Self { pool, process_secret }
    }

    pub async fn get(&self, shop_id: i64) -> Result<Credentials, IngestError> {
        let row: ShopSecretRow = sqlx::query_as(
            "SELECT marketplace, encrypted_secret, ozon_client_id, \
             ozon_performance_client_id, ozon_performance_encrypted_secret \
             FROM shops WHERE id = $1",
        )
        .bind(shop_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| IngestError::TransientNetwork {
            marketplace: "oltp:shops".into(),
            source: e.into(),
        })?;

        let primary = Envelope::open(&self.process_secret, &row.encrypted_secret).map_err(|e| {
            IngestError::DataFormat {
                marketplace: row.marketplace.clone(),
                endpoint: "credential_envelope".into(),
                detail: e.to_string(),
            }
        })?;

        match row.marketplace.as_str() {
            "wildberries" => Ok(Credentials::Wildberries { token: primary }),
            "ozon" => {
                let performance_secret = match row.ozon_performance_encrypted_secret {
                    Some(bytes) => Some(Envelope::open(&self.process_secret, &bytes).map_err(|e| {
                        IngestError::DataFormat {
                            marketplace: "ozon".into(),
                            endpoint: "performance_credential_envelope".into(),
                            detail: e.to_string(),
                        }
                    })?),
                    None => None,
                };
                Ok(Credentials::Ozon {
                    api_key: primary,
                    client_id: row.ozon_client_id.unwrap_or_default(),
                    performance_client_id: row.ozon_performance_client_id,
                    performance_secret,
                })
            }
            other => Err(IngestError::DataFormat {
                marketplace: other.to_string(),
                endpoint: "shops.marketplace".into(),
                detail: format!("unknown marketplace kind {other:?}"),
            }),
        }
    }

    /// Validate by probing low-cost endpoints, then seal and persist.
    /// Probe failures are returned as warnings; they never block storage.
    pub async fn set(
        &self,
        shop_id: i64,
        marketplace: MarketplaceKind,
        credentials: &Credentials,
    ) -> Result<Vec<String>, IngestError> {
        let warnings = probe(marketplace, credentials).await;

        match credentials {
            Credentials::Wildberries { token } => {
                let sealed = Envelope::seal(&self.process_secret, token)
                    .map_err(|e| IngestError::Fatal {
                        task: "credentials.set".into(),
                        shop_id: Some(shop_id),
                        source: e,
                    })?;
                sqlx::query("UPDATE shops SET encrypted_secret = $1 WHERE id = $2")
                    .bind(sealed)
                    .bind(shop_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| IngestError::TransientNetwork {
                        marketplace: "oltp:shops".into(),
                        source: e.into(),
                    })?;
            }
            Credentials::Ozon {
                api_key,
                client_id,
                performance_client_id,
                performance_secret,
            } => {
                let sealed_key = Envelope::seal(&self.process_secret, api_key).map_err(|e| {
                    IngestError::Fatal {
                        task: "credentials.set".into(),
                        shop_id: Some(shop_id),
                        source: e,
                    }
                })?;
                let sealed_performance = match performance_secret {
                    Some(secret) => Some(Envelope::seal(&self.process_secret, secret).map_err(
                        |e| IngestError::Fatal {
                            task: "credentials.set".into(),
                            shop_id: Some(shop_id),
                            source: e,
                        },
                    )?),
                    None => None,
                };
                sqlx::query(
                    "UPDATE shops SET encrypted_secret = $1, ozon_client_id = $2, \
                     ozon_performance_client_id = $3, ozon_performance_encrypted_secret = $4 \
                     WHERE id = $5",
                )
                .bind(sealed_key)
                .bind(client_id)
                .bind(performance_client_id)
                .bind(sealed_performance)
                .bind(shop_id)
                .execute(&self.pool)
                .await
                .map_err(|e| IngestError::TransientNetwork {
                    marketplace: "oltp:shops".into(),
                    source: e.into(),
                })?;
            }
        }

        Ok(warnings)
    }
}

/// Probe each sub-API the credentials claim to cover. This is a stub of
/// the real no-op endpoint calls (left to `client::MarketplaceClient`);
/// here we only validate the shape of what we were given.
async fn probe(marketplace: MarketplaceKind, credentials: &Credentials) -> Vec<String> {
    let mut warnings = Vec::new();
    match (marketplace, credentials) {
        (MarketplaceKind::Wildberries, Credentials::Wildberries { token }) => {
            if token.trim().is_empty() {
                warnings.push("statistics: empty token".to_string());
            }
        }
        (MarketplaceKind::Ozon, Credentials::Ozon {
            performance_client_id,
            performance_secret,
            ..
        }) => {
            if performance_client_id.is_none() || performance_secret.is_none() {
                warnings.push("performance: no performance API credentials supplied, ads sync will be skipped".to_string());
            }
        }
        _ => warnings.push("marketplace/credential kind mismatch".to_string()),
    }
    warnings
}

#[derive(sqlx::FromRow)]
struct ShopSecretRow {
    marketplace: String,
    encrypted_secret: Vec<u8>,
    ozon_client_id: Option<String>,
    ozon_performance_client_id: Option<String>,
    ozon_performance_encrypted_secret: Option<Vec<u8>>,
}

//! Signed URL issuance.
//!
//! The sidecar signs URLs on our behalf:
//!
//!   `POST {sidecar}/object-storage/signed-object-url`
//!   `{"bucket_name", "object_name", "method", "expires_at"}` -> `{"signed_url"}`
//!
//! [`UrlSigner`] keeps the service independent of that transport.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::errors::StorageError;

/// HTTP method a signed URL is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignMethod {
    Get,
    Put,
}

/// What to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub bucket_name: String,
    pub object_name: String,
    pub method: SignMethod,
    pub ttl: Duration,
}

/// Issues time-limited URLs for direct object access.
pub trait UrlSigner: Send + Sync + 'static {
    fn sign(&self, request: SignRequest) -> BoxFuture<'_, Result<String, StorageError>>;
}

#[derive(Debug, Serialize)]
struct SidecarSignBody {
    bucket_name: String,
    object_name: String,
    method: SignMethod,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct SidecarSignResponse {
    signed_url: String,
}

/// Expiry timestamp for a URL issued at `now` with lifetime `ttl`.
fn expires_at(now: DateTime<Utc>, ttl: Duration) -> String {
    let at = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Signs URLs through the local sidecar.
pub struct SidecarSigner {
    client: reqwest::Client,
    endpoint: String,
}

impl SidecarSigner {
    pub fn new(endpoint: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

impl UrlSigner for SidecarSigner {
    fn sign(&self, request: SignRequest) -> BoxFuture<'_, Result<String, StorageError>> {
        Box::pin(async move {
            let body = SidecarSignBody {
                expires_at: expires_at(Utc::now(), request.ttl),
                bucket_name: request.bucket_name,
                object_name: request.object_name,
                method: request.method,
            };
            debug!(
                "Signing {:?} URL for {}/{} until {}",
                body.method, body.bucket_name, body.object_name, body.expires_at
            );

            let resp = self
                .client
                .post(format!("{}/object-storage/signed-object-url", self.endpoint))
                .json(&body)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Signing request failed: {e}"))?;

            if !resp.status().is_success() {
                return Err(StorageError::Signing {
                    status: resp.status().as_u16(),
                });
            }

            let signed: SidecarSignResponse = resp
                .json()
                .await
                .map_err(|e| anyhow::anyhow!("Invalid signing response: {e}"))?;
            Ok(signed.signed_url)
        })
    }
}

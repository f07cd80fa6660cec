//! Google Cloud Storage bucket backend.
//!
//! Talks to the GCS JSON API with `reqwest`.  Access tokens come from the
//! local credential sidecar through an OAuth token exchange:
//!
//!   1. `GET  {sidecar}/credential` -> subject token
//!   2. `POST {sidecar}/token`      -> bucket access token
//!
//! `GOOGLE_OAUTH_ACCESS_TOKEN` short-circuits the exchange when set.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use super::backend::{ByteStream, Listing, ObjectBackend, ObjectMetadata};

/// GCS JSON API base URL.
const GCS_API_BASE: &str = "https://storage.googleapis.com/storage/v1";

/// GCS upload base URL (for media uploads).
const GCS_UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";

/// Token exchange grant type understood by the sidecar.
const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// Audience the sidecar expects in the exchange.
const TOKEN_AUDIENCE: &str = "replit";

// -- GCS JSON API response types -----------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    /// GCS encodes sizes as decimal strings.
    size: Option<String>,
    content_type: Option<String>,
    time_created: Option<String>,
    metadata: Option<HashMap<String, String>>,
}

impl From<GcsObject> for ObjectMetadata {
    fn from(obj: GcsObject) -> Self {
        ObjectMetadata {
            size: obj.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            name: obj.name,
            content_type: obj.content_type,
            time_created: obj.time_created,
            custom: obj.metadata.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsListResponse {
    items: Option<Vec<GcsObjectName>>,
    prefixes: Option<Vec<String>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsObjectName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GcsErrorDetail {
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GcsErrorResponse {
    error: Option<GcsErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

// -- Token management ---------------------------------------------------------

/// Cached access token with expiry.
struct CachedToken {
    access_token: String,
    expiry: std::time::Instant,
}

/// Bucket backend that forwards operations to Google Cloud Storage.
pub struct GcsBackend {
    /// HTTP client for GCS and sidecar calls.
    client: reqwest::Client,
    /// The GCS bucket name.
    bucket: String,
    /// Base URL of the credential sidecar.
    sidecar_endpoint: String,
    /// JSON API base URL.
    api_base: String,
    /// Upload API base URL.
    upload_base: String,
    /// Token taken from the environment, bypassing the sidecar.
    static_token: Option<String>,
    /// Cached OAuth2 access token.
    token_cache: Mutex<Option<CachedToken>>,
}

impl GcsBackend {
    /// Create a new GCS backend.
    ///
    /// Tokens are fetched lazily on the first API call.
    pub fn new(bucket: &str, sidecar_endpoint: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        info!(
            "GCS backend initialized: bucket={} sidecar={}",
            bucket, sidecar_endpoint
        );

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            sidecar_endpoint: sidecar_endpoint.trim_end_matches('/').to_string(),
            api_base: GCS_API_BASE.to_string(),
            upload_base: GCS_UPLOAD_BASE.to_string(),
            static_token: std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok(),
            token_cache: Mutex::new(None),
        })
    }

    /// Point the JSON and upload APIs at another host.
    pub fn with_api_base(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.api_base = format!("{base}/storage/v1");
        self.upload_base = format!("{base}/upload/storage/v1");
        self
    }

    /// Override (or clear) the environment-provided token.
    pub fn with_static_token(mut self, token: Option<String>) -> Self {
        self.static_token = token;
        self
    }

    /// Return a cached token if it hasn't expired (with 60s safety margin),
    /// otherwise run the exchange.
    async fn get_access_token(&self) -> anyhow::Result<String> {
        if let Some(ref token) = self.static_token {
            return Ok(token.clone());
        }

        {
            let cache = self
                .token_cache
                .lock()
                .map_err(|_| anyhow::anyhow!("token cache mutex poisoned"))?;
            if let Some(ref cached) = *cache {
                if cached.expiry > std::time::Instant::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let (token, expires_in) = self.exchange_token().await?;

        let expiry = std::time::Instant::now()
            + std::time::Duration::from_secs(expires_in.saturating_sub(60));

        {
            let mut cache = self
                .token_cache
                .lock()
                .map_err(|_| anyhow::anyhow!("token cache mutex poisoned"))?;
            *cache = Some(CachedToken {
                access_token: token.clone(),
                expiry,
            });
        }

        Ok(token)
    }

    /// Fetch the subject token and exchange it for a bucket access token.
    async fn exchange_token(&self) -> anyhow::Result<(String, u64)> {
        let resp = self
            .client
            .get(format!("{}/credential", self.sidecar_endpoint))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Sidecar credential request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "Sidecar credential request returned {}",
                resp.status()
            ));
        }
        let subject: TokenResponse = resp.json().await?;

        let resp = self
            .client
            .post(format!("{}/token", self.sidecar_endpoint))
            .form(&[
                ("grant_type", TOKEN_EXCHANGE_GRANT),
                ("audience", TOKEN_AUDIENCE),
                ("subject_token_type", "access_token"),
                (
                    "requested_token_type",
                    "urn:ietf:params:oauth:token-type:access_token",
                ),
                ("scope", "https://www.googleapis.com/auth/cloud-platform"),
                ("subject_token", subject.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Token exchange request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Token exchange failed ({status}): {body}"));
        }

        let token: TokenResponse = resp.json().await?;
        debug!("Obtained bucket access token from sidecar");
        Ok((token.access_token, token.expires_in.unwrap_or(3600)))
    }

    /// Build authorization headers for GCS API calls.
    async fn auth_headers(&self) -> anyhow::Result<HeaderMap> {
        let token = self.get_access_token().await?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| anyhow::anyhow!("Invalid auth header value: {e}"))?,
        );
        Ok(headers)
    }

    /// URL-encode a GCS object name for use in API paths.
    fn url_encode_object_name(name: &str) -> String {
        percent_encoding::utf8_percent_encode(name, percent_encoding::NON_ALPHANUMERIC).to_string()
    }

    /// URL of the object resource for `name`.
    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/b/{}/o/{}",
            self.api_base,
            Self::url_encode_object_name(&self.bucket),
            Self::url_encode_object_name(name)
        )
    }

    /// Map a GCS HTTP error to an anyhow error with context.
    fn map_gcs_error(context: &str, status: StatusCode, body: &str) -> anyhow::Error {
        if let Ok(err_resp) = serde_json::from_str::<GcsErrorResponse>(body) {
            if let Some(err) = err_resp.error {
                return anyhow::anyhow!(
                    "GCS {}: {} (code {})",
                    context,
                    err.message.unwrap_or_default(),
                    err.code.unwrap_or(status.as_u16())
                );
            }
        }
        anyhow::anyhow!("GCS {context}: HTTP {status} - {body}")
    }

    /// Check if a GCS error response indicates "not found" (404).
    fn is_not_found(status: StatusCode) -> bool {
        status == StatusCode::NOT_FOUND
    }

    /// Fetch one listing page.
    async fn list_page(
        &self,
        auth: &HeaderMap,
        prefix: &str,
        delimiter: Option<&str>,
        page_token: Option<&str>,
    ) -> anyhow::Result<GcsListResponse> {
        let url = format!(
            "{}/b/{}/o",
            self.api_base,
            Self::url_encode_object_name(&self.bucket)
        );

        let mut req = self
            .client
            .get(&url)
            .headers(auth.clone())
            .query(&[("prefix", prefix)]);
        if let Some(d) = delimiter {
            req = req.query(&[("delimiter", d), ("includeTrailingDelimiter", "true")]);
        }
        if let Some(token) = page_token {
            req = req.query(&[("pageToken", token)]);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("GCS list request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::map_gcs_error("list", status, &body));
        }

        Ok(resp.json().await?)
    }
}

impl ObjectBackend for GcsBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn exists(&self, name: &str) -> BoxFuture<'_, anyhow::Result<bool>> {
        let name = name.to_string();
        Box::pin(async move {
            debug!("GCS exists: bucket={} name={}", self.bucket, name);
            let auth = self.auth_headers().await?;
            let resp = self
                .client
                .get(self.object_url(&name))
                .headers(auth)
                .query(&[("fields", "name")])
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS exists check failed: {e}"))?;

            if resp.status().is_success() {
                Ok(true)
            } else if Self::is_not_found(resp.status()) {
                Ok(false)
            } else {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                Err(Self::map_gcs_error("exists", status, &body))
            }
        })
    }

    fn metadata(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ObjectMetadata>> {
        let name = name.to_string();
        Box::pin(async move {
            debug!("GCS metadata: bucket={} name={}", self.bucket, name);
            let auth = self.auth_headers().await?;
            let resp = self
                .client
                .get(self.object_url(&name))
                .headers(auth)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS metadata request failed: {e}"))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_gcs_error("metadata", status, &body));
            }

            let obj: GcsObject = resp.json().await?;
            Ok(obj.into())
        })
    }

    fn set_custom_metadata(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        let name = name.to_string();
        let body = serde_json::json!({ "metadata": { key: value } });
        Box::pin(async move {
            debug!("GCS patch metadata: bucket={} name={}", self.bucket, name);
            let auth = self.auth_headers().await?;
            let resp = self
                .client
                .patch(self.object_url(&name))
                .headers(auth)
                .json(&body)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS patch request failed: {e}"))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_gcs_error("patch", status, &body));
            }
            Ok(())
        })
    }

    fn open(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ByteStream>> {
        let name = name.to_string();
        Box::pin(async move {
            debug!("GCS open: bucket={} name={}", self.bucket, name);
            let auth = self.auth_headers().await?;
            let resp = self
                .client
                .get(self.object_url(&name))
                .headers(auth)
                .query(&[("alt", "media")])
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS download request failed: {e}"))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_gcs_error("download", status, &body));
            }

            Ok(resp.bytes_stream().map_err(anyhow::Error::from).boxed())
        })
    }

    fn save(
        &self,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        let name = name.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            debug!(
                "GCS save: bucket={} name={} bytes={}",
                self.bucket,
                name,
                data.len()
            );
            let auth = self.auth_headers().await?;
            let url = format!(
                "{}/b/{}/o",
                self.upload_base,
                Self::url_encode_object_name(&self.bucket)
            );

            let resp = self
                .client
                .post(&url)
                .headers(auth)
                .query(&[("uploadType", "media"), ("name", name.as_str())])
                .header(CONTENT_TYPE, content_type)
                .body(data)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("GCS upload request failed: {e}"))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::map_gcs_error("upload", status, &body));
            }
            Ok(())
        })
    }

    fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> BoxFuture<'_, anyhow::Result<Listing>> {
        let prefix = prefix.to_string();
        let delimiter = delimiter.map(|d| d.to_string());
        Box::pin(async move {
            debug!(
                "GCS list: bucket={} prefix={} delimiter={:?}",
                self.bucket, prefix, delimiter
            );
            let auth = self.auth_headers().await?;
            let mut listing = Listing::default();
            let mut page_token: Option<String> = None;

            loop {
                let page = self
                    .list_page(&auth, &prefix, delimiter.as_deref(), page_token.as_deref())
                    .await?;

                listing
                    .objects
                    .extend(page.items.unwrap_or_default().into_iter().map(|o| o.name));
                listing.prefixes.extend(page.prefixes.unwrap_or_default());

                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }

            Ok(listing)
        })
    }
}

// -- Tests -------------------------------------------------------------------

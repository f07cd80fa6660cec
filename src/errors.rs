//! Storage service error types.
//!
//! Every variant maps to an HTTP status.  The enum implements
//! [`axum::response::IntoResponse`] so handlers can simply return
//! `Err(StorageError::ObjectNotFound)`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors surfaced by the object storage and public files services.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Required configuration is missing or empty.
    #[error("{0}")]
    Config(String),

    /// The logical path does not resolve to an existing object.
    #[error("Object not found")]
    ObjectNotFound,

    /// The path could not be parsed into an object reference.
    #[error("Invalid object path: {path}")]
    InvalidPath { path: String },

    /// The request body or query is unusable.
    #[error("{0}")]
    InvalidRequest(String),

    /// The signing sidecar answered with a non-success status.
    #[error("Failed to sign object URL, errorcode: {status}, make sure the signing sidecar is reachable")]
    Signing { status: u16 },

    /// The request carries no caller identity.
    #[error("Authentication required")]
    Unauthenticated,

    /// The ACL policy does not grant the requested permission.
    #[error("Access denied")]
    AccessDenied,

    /// The top-level bucket listing failed.
    #[error("{0}")]
    Listing(String),

    /// Catch-all for backend and transport failures.
    #[error("{0}")]
    Backend(#[from] anyhow::Error),
}

impl StorageError {
    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            StorageError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StorageError::ObjectNotFound => StatusCode::NOT_FOUND,
            StorageError::InvalidPath { .. } => StatusCode::BAD_REQUEST,
            StorageError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            StorageError::Signing { .. } => StatusCode::BAD_GATEWAY,
            StorageError::Unauthenticated => StatusCode::UNAUTHORIZED,
            StorageError::AccessDenied => StatusCode::FORBIDDEN,
            StorageError::Listing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StorageError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

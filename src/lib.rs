//! bucketdesk library -- document bucket browsing, signed links and
//! per-object access control.
//!
//! This crate provides the object storage and public files services, the
//! pluggable bucket backends and URL signer they run on, and the HTTP
//! surface that exposes them.

pub mod acl;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod object_storage;
pub mod paths;
pub mod public_files;
pub mod server;
pub mod signing;
pub mod storage;

use std::sync::Arc;

use crate::config::Config;
use crate::object_storage::ObjectStorageService;
use crate::public_files::PublicFilesService;
use crate::signing::UrlSigner;
use crate::storage::backend::ObjectBackend;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Object entity operations.
    pub objects: ObjectStorageService,
    /// Folder browser over the public tree.
    pub files: PublicFilesService,
}

impl AppState {
    /// Wire both services onto one backend and signer.
    pub fn new(config: Config, backend: Arc<dyn ObjectBackend>, signer: Arc<dyn UrlSigner>) -> Self {
        let objects = ObjectStorageService::new(backend, signer, config.storage.clone());
        let files = PublicFilesService::new(objects.clone(), &config.storage.browse_root);
        Self {
            config,
            objects,
            files,
        }
    }
}

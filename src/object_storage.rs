//! Object storage service.
//!
//! Resolves logical paths to bucket objects, issues signed URLs, uploads
//! files, streams object bodies and gates access through ACL policies.
//! Holds no mutable state: every call goes straight to the injected
//! backend and signer.

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::TryStreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::acl::{self, ObjectAclPolicy, ObjectPermission};
use crate::config::StorageConfig;
use crate::errors::StorageError;
use crate::metrics::record_storage_op;
use crate::paths::{self, ObjectPath, PRIVATE_PREFIX, PUBLIC_PREFIX, STORAGE_URL_PREFIX};
use crate::signing::{SignMethod, SignRequest, UrlSigner};
use crate::storage::backend::{ObjectBackend, ObjectFile};

/// Lifetime of a presigned upload URL.
pub const UPLOAD_URL_TTL: Duration = Duration::from_secs(900);

/// Default `max-age` for streamed downloads.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Default lifetime of a download link.
pub const DEFAULT_LINK_TTL_HOURS: u64 = 24;

/// Sub-folder used when an upload names none.
const DEFAULT_UPLOAD_FOLDER: &str = "uploads";

/// Infer a MIME type from the file extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Object storage operations over a single bucket.
#[derive(Clone)]
pub struct ObjectStorageService {
    backend: Arc<dyn ObjectBackend>,
    signer: Arc<dyn UrlSigner>,
    settings: StorageConfig,
}

impl ObjectStorageService {
    pub fn new(
        backend: Arc<dyn ObjectBackend>,
        signer: Arc<dyn UrlSigner>,
        settings: StorageConfig,
    ) -> Self {
        Self {
            backend,
            signer,
            settings,
        }
    }

    /// The bucket backend this service talks to.
    pub fn backend(&self) -> &Arc<dyn ObjectBackend> {
        &self.backend
    }

    fn file(&self, name: String) -> ObjectFile {
        ObjectFile {
            bucket: self.backend.bucket().to_string(),
            name,
        }
    }

    /// Configured public prefixes: trimmed, non-empty, de-duplicated, in
    /// configuration order.
    pub fn public_object_search_paths(&self) -> Result<Vec<String>, StorageError> {
        let mut seen = HashSet::new();
        let paths: Vec<String> = self
            .settings
            .public_object_search_paths
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty() && seen.insert(p.clone()))
            .collect();

        if paths.is_empty() {
            return Err(StorageError::Config(
                "PUBLIC_OBJECT_SEARCH_PATHS not set. Configure \
                 storage.public_object_search_paths or set the \
                 PUBLIC_OBJECT_SEARCH_PATHS env var (comma-separated paths)."
                    .to_string(),
            ));
        }
        Ok(paths)
    }

    /// Configured private root.
    pub fn private_object_dir(&self) -> Result<String, StorageError> {
        let dir = self.settings.private_object_dir.trim();
        if dir.is_empty() {
            return Err(StorageError::Config(
                "PRIVATE_OBJECT_DIR not set. Configure storage.private_object_dir \
                 or set the PRIVATE_OBJECT_DIR env var."
                    .to_string(),
            ));
        }
        Ok(dir.to_string())
    }

    /// Return the first `searchPath/filePath` that exists, trying search
    /// paths in configuration order.
    pub async fn search_public_object(
        &self,
        file_path: &str,
    ) -> Result<Option<ObjectFile>, StorageError> {
        for search_path in self.public_object_search_paths()? {
            let name = paths::object_name_for(&paths::join(&search_path, file_path))?;
            if self.backend.exists(&name).await? {
                debug!("Public object {} found at {}", file_path, name);
                return Ok(Some(self.file(name)));
            }
        }
        Ok(None)
    }

    /// Build a streaming response for `file`.
    ///
    /// Failures before the body starts become a 500 JSON response.  Once
    /// headers are out, a failing stream is only logged and the connection
    /// is cut short.
    pub async fn download_object(&self, file: &ObjectFile, cache_ttl_sec: u64) -> Response {
        match self.prepare_download(file, cache_ttl_sec).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error downloading file {}: {}", file.name, e);
                record_storage_op("download", false);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Error downloading file" })),
                )
                    .into_response()
            }
        }
    }

    async fn prepare_download(
        &self,
        file: &ObjectFile,
        cache_ttl_sec: u64,
    ) -> Result<Response, StorageError> {
        let metadata = self.backend.metadata(&file.name).await?;
        let policy = acl::get_object_acl_policy(self.backend.as_ref(), file).await?;
        let visibility = if policy.is_some_and(|p| p.is_public()) {
            "public"
        } else {
            "private"
        };

        let stream = self.backend.open(&file.name).await?;
        let name = file.name.clone();
        let body = Body::from_stream(stream.inspect_err(move |e| {
            error!("Stream error for {}: {}", name, e);
        }));

        let response = Response::builder()
            .header(
                CONTENT_TYPE,
                metadata
                    .content_type
                    .as_deref()
                    .unwrap_or("application/octet-stream"),
            )
            .header(CONTENT_LENGTH, metadata.size)
            .header(CACHE_CONTROL, format!("{visibility}, max-age={cache_ttl_sec}"))
            .body(body)
            .map_err(|e| anyhow::anyhow!("Failed to build download response: {e}"))?;

        record_storage_op("download", true);
        Ok(response)
    }

    /// Presigned PUT URL for a fresh private upload slot.
    pub async fn object_entity_upload_url(&self) -> Result<String, StorageError> {
        let dir = self.private_object_dir()?;
        let full_path = paths::join(&dir, &format!("{DEFAULT_UPLOAD_FOLDER}/{}", Uuid::new_v4()));
        let object_name = paths::object_name_for(&full_path)?;

        let result = self.sign(object_name, SignMethod::Put, UPLOAD_URL_TTL).await;
        record_storage_op("upload_url", result.is_ok());
        result
    }

    /// Resolve a `/objects/<name>` path to an existing object.
    pub async fn object_entity_file(&self, object_path: &str) -> Result<ObjectFile, StorageError> {
        let Ok(ObjectPath::Private(name)) = ObjectPath::parse(object_path) else {
            return Err(StorageError::ObjectNotFound);
        };
        if !self.backend.exists(&name).await? {
            return Err(StorageError::ObjectNotFound);
        }
        Ok(self.file(name))
    }

    /// Turn a raw storage URL into a logical path; other inputs pass
    /// through untouched.
    pub fn normalize_object_entity_path(&self, raw_path: &str) -> Result<String, StorageError> {
        if !raw_path.starts_with(STORAGE_URL_PREFIX) {
            return Ok(raw_path.to_string());
        }
        let dir = self.private_object_dir()?;
        Ok(paths::normalize_entity_path(
            raw_path,
            self.backend.bucket(),
            &dir,
        ))
    }

    /// Normalize `raw_path` and, when it names an entity, attach `policy`.
    pub async fn try_set_object_entity_acl_policy(
        &self,
        raw_path: &str,
        policy: &ObjectAclPolicy,
    ) -> Result<String, StorageError> {
        let normalized = self.normalize_object_entity_path(raw_path)?;
        if !normalized.starts_with('/') {
            return Ok(normalized);
        }

        let file = self.object_entity_file(&normalized).await?;
        acl::set_object_acl_policy(self.backend.as_ref(), &file, policy).await?;
        info!(
            "ACL policy set on {} (owner={}, visibility={:?})",
            normalized, policy.owner, policy.visibility
        );
        Ok(normalized)
    }

    /// Attach `policy` on behalf of `user_id`.
    ///
    /// A first policy is owned by the caller. Replacing an existing policy
    /// requires write access to it and keeps its owner.
    pub async fn set_object_entity_acl_policy_as(
        &self,
        user_id: &str,
        raw_path: &str,
        mut policy: ObjectAclPolicy,
    ) -> Result<String, StorageError> {
        let normalized = self.normalize_object_entity_path(raw_path)?;
        if !normalized.starts_with('/') {
            return Ok(normalized);
        }

        let file = self.object_entity_file(&normalized).await?;
        match acl::get_object_acl_policy(self.backend.as_ref(), &file).await? {
            Some(existing) => {
                if !existing.allows(Some(user_id), ObjectPermission::Write) {
                    warn!("ACL update on {} denied for user {}", normalized, user_id);
                    return Err(StorageError::AccessDenied);
                }
                policy.owner = existing.owner;
            }
            None => policy.owner = user_id.to_string(),
        }

        self.try_set_object_entity_acl_policy(&normalized, &policy)
            .await
    }

    /// Whether `object_name` lives under the private object dir.
    fn is_private_object(&self, object_name: &str) -> bool {
        let Ok(dir) = self.private_object_dir() else {
            return false;
        };
        let dir = dir.trim_matches('/');
        !dir.is_empty() && object_name.starts_with(&format!("{dir}/"))
    }

    /// Download link for `object_path` on behalf of `user_id`.
    ///
    /// Entity paths and anything under the private dir require read access
    /// through the object's ACL policy.
    pub async fn authorized_download_link(
        &self,
        user_id: &str,
        object_path: &str,
        ttl_hours: u64,
    ) -> Result<String, StorageError> {
        let parsed = ObjectPath::parse(object_path)?;
        let object_name = parsed.object_name()?;

        if matches!(parsed, ObjectPath::Private(_)) || self.is_private_object(&object_name) {
            if !self.backend.exists(&object_name).await? {
                return Err(StorageError::ObjectNotFound);
            }
            let file = self.file(object_name);
            let allowed = self
                .can_access_object_entity(Some(user_id), &file, Some(ObjectPermission::Read))
                .await?;
            if !allowed {
                warn!("Download link for {} denied for user {}", file.name, user_id);
                return Err(StorageError::AccessDenied);
            }
        }

        self.generate_public_download_link(object_path, ttl_hours)
            .await
    }

    /// Whether `user_id` holds `requested` (read when `None`) on `file`.
    pub async fn can_access_object_entity(
        &self,
        user_id: Option<&str>,
        file: &ObjectFile,
        requested: Option<ObjectPermission>,
    ) -> Result<bool, StorageError> {
        Ok(acl::can_access_object(
            self.backend.as_ref(),
            user_id,
            file,
            requested.unwrap_or_default(),
        )
        .await?)
    }

    /// Store a private file and return its `/objects/...` path.
    pub async fn upload_private_file(
        &self,
        file_name: &str,
        data: Bytes,
        sub_folder: Option<&str>,
    ) -> Result<String, StorageError> {
        let dir = self.private_object_dir()?;
        let object_name = self.upload(&dir, file_name, data, sub_folder).await?;
        Ok(format!("{PRIVATE_PREFIX}{object_name}"))
    }

    /// Store a public file and return its `/public-objects/...` path.
    pub async fn upload_public_file(
        &self,
        file_name: &str,
        data: Bytes,
        sub_folder: Option<&str>,
    ) -> Result<String, StorageError> {
        let dir = self.settings.public_upload_dir.clone();
        let object_name = self.upload(&dir, file_name, data, sub_folder).await?;
        Ok(format!("{PUBLIC_PREFIX}{object_name}"))
    }

    async fn upload(
        &self,
        dir: &str,
        file_name: &str,
        data: Bytes,
        sub_folder: Option<&str>,
    ) -> Result<String, StorageError> {
        let folder = sub_folder
            .map(|s| s.trim_matches('/'))
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_UPLOAD_FOLDER);
        let relative = format!("{folder}/{}_{file_name}", Uuid::new_v4());
        let object_name = paths::object_name_for(&paths::join(dir, &relative))?;

        info!(
            "Uploading {} ({} bytes) to bucket {}",
            object_name,
            data.len(),
            self.backend.bucket()
        );
        let result = self
            .backend
            .save(&object_name, data, content_type_for(file_name))
            .await;
        record_storage_op("upload", result.is_ok());
        result?;

        info!("File saved: {}", object_name);
        Ok(object_name)
    }

    /// Presigned GET URL valid for `ttl_hours`.
    pub async fn generate_public_download_link(
        &self,
        object_path: &str,
        ttl_hours: u64,
    ) -> Result<String, StorageError> {
        let object_name = ObjectPath::parse(object_path)?.object_name()?;
        let ttl = Duration::from_secs(ttl_hours.saturating_mul(3600));
        let result = self.sign(object_name, SignMethod::Get, ttl).await;
        record_storage_op("download_link", result.is_ok());
        result
    }

    async fn sign(
        &self,
        object_name: String,
        method: SignMethod,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        self.signer
            .sign(SignRequest {
                bucket_name: self.backend.bucket().to_string(),
                object_name,
                method,
                ttl,
            })
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::acl::Visibility;
    use crate::signing::tests::fake_sidecar;
    use crate::signing::SidecarSigner;
    use crate::storage::backend::{ByteStream, Listing, ObjectMetadata};
    use crate::storage::memory::MemoryBackend;
    use chrono::{DateTime, Utc};
    use futures::future::BoxFuture;
    use futures::stream::{self, StreamExt};
    use std::sync::Mutex;

    /// Records sign requests and answers with a predictable URL.
    #[derive(Default)]
    pub(crate) struct RecordingSigner {
        pub requests: Mutex<Vec<SignRequest>>,
        pub fail_for: Option<String>,
    }

    impl UrlSigner for RecordingSigner {
        fn sign(&self, request: SignRequest) -> BoxFuture<'_, Result<String, StorageError>> {
            Box::pin(async move {
                let url = format!("https://signed.example/{}", request.object_name);
                let fail = self.fail_for.as_deref() == Some(request.object_name.as_str());
                self.requests.lock().unwrap().push(request);
                if fail {
                    return Err(StorageError::Signing { status: 500 });
                }
                Ok(url)
            })
        }
    }

    pub(crate) fn settings() -> StorageConfig {
        StorageConfig {
            backend: "memory".into(),
            bucket: "docs".into(),
            public_object_search_paths: vec![
                " /public ".into(),
                "/shared".into(),
                "/public".into(),
                "".into(),
            ],
            private_object_dir: "/.private".into(),
            ..StorageConfig::default()
        }
    }

    fn service_with(
        backend: Arc<MemoryBackend>,
        settings: StorageConfig,
    ) -> (ObjectStorageService, Arc<RecordingSigner>) {
        let signer = Arc::new(RecordingSigner::default());
        let svc = ObjectStorageService::new(backend, signer.clone(), settings);
        (svc, signer)
    }

    fn service() -> (ObjectStorageService, Arc<MemoryBackend>, Arc<RecordingSigner>) {
        let backend = Arc::new(MemoryBackend::new("docs"));
        let (svc, signer) = service_with(backend.clone(), settings());
        (svc, backend, signer)
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.pdf"), "application/pdf");
        assert_eq!(content_type_for("A.PDF"), "application/pdf");
        assert_eq!(content_type_for("photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("photo.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("shot.png"), "image/png");
        assert_eq!(content_type_for("notes.txt"), "text/plain");
        assert_eq!(content_type_for("sheet.xlsx"), "application/octet-stream");
        assert_eq!(content_type_for("noextension"), "application/octet-stream");
    }

    #[test]
    fn test_search_paths_trimmed_and_deduplicated() {
        let (svc, _, _) = service();
        assert_eq!(
            svc.public_object_search_paths().unwrap(),
            vec!["/public".to_string(), "/shared".to_string()]
        );
    }

    #[test]
    fn test_missing_configuration_errors() {
        let backend = Arc::new(MemoryBackend::new("docs"));
        let (svc, _) = service_with(backend, StorageConfig::default());
        assert!(matches!(
            svc.public_object_search_paths(),
            Err(StorageError::Config(msg)) if msg.contains("PUBLIC_OBJECT_SEARCH_PATHS")
        ));
        assert!(matches!(
            svc.private_object_dir(),
            Err(StorageError::Config(msg)) if msg.contains("PRIVATE_OBJECT_DIR")
        ));
    }

    #[tokio::test]
    async fn test_search_public_object_first_match_wins() {
        let (svc, backend, _) = service();
        backend.save("shared/logo.png", Bytes::from_static(b"s"), "image/png").await.unwrap();
        let found = svc.search_public_object("logo.png").await.unwrap().unwrap();
        assert_eq!(found.name, "shared/logo.png");

        backend.save("public/logo.png", Bytes::from_static(b"p"), "image/png").await.unwrap();
        let found = svc.search_public_object("logo.png").await.unwrap().unwrap();
        assert_eq!(found.name, "public/logo.png");
        assert_eq!(found.bucket, "docs");
    }

    #[tokio::test]
    async fn test_search_public_object_none() {
        let (svc, _, _) = service();
        assert!(svc.search_public_object("missing.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_object_entity_file_requires_prefix() {
        let (svc, backend, _) = service();
        backend.save("a/b", Bytes::new(), "text/plain").await.unwrap();

        for path in ["a/b", "/a/b", "/public-objects/a/b", "/objects/", "/objectsa/b"] {
            assert!(
                matches!(
                    svc.object_entity_file(path).await,
                    Err(StorageError::ObjectNotFound)
                ),
                "expected not found for {path}"
            );
        }
        assert!(matches!(
            svc.object_entity_file("/objects/missing").await,
            Err(StorageError::ObjectNotFound)
        ));
        assert_eq!(svc.object_entity_file("/objects/a/b").await.unwrap().name, "a/b");
    }

    #[tokio::test]
    async fn test_upload_url_under_private_dir() {
        let (svc, _, signer) = service();
        let url = svc.object_entity_upload_url().await.unwrap();
        assert!(url.starts_with("https://signed.example/.private/uploads/"));

        let requests = signer.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, SignMethod::Put);
        assert_eq!(requests[0].ttl, UPLOAD_URL_TTL);
        assert_eq!(requests[0].bucket_name, "docs");
        let id = requests[0].object_name.trim_start_matches(".private/uploads/");
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_upload_url_without_private_dir() {
        let backend = Arc::new(MemoryBackend::new("docs"));
        let (svc, signer) = service_with(backend, StorageConfig::default());
        assert!(matches!(
            svc.object_entity_upload_url().await,
            Err(StorageError::Config(_))
        ));
        assert!(signer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_private_file() {
        let (svc, backend, _) = service();
        let path = svc
            .upload_private_file("contrato.pdf", Bytes::from_static(b"%PDF"), Some("empresa-1"))
            .await
            .unwrap();
        assert!(path.starts_with("/objects/.private/empresa-1/"));
        assert!(path.ends_with("_contrato.pdf"));

        let file = svc.object_entity_file(&path).await.unwrap();
        let meta = backend.metadata(&file.name).await.unwrap();
        assert_eq!(meta.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(meta.size, 4);
    }

    #[tokio::test]
    async fn test_upload_public_file_default_folder() {
        let (svc, backend, _) = service();
        let path = svc
            .upload_public_file("foto.png", Bytes::from_static(b"png"), None)
            .await
            .unwrap();
        assert!(path.starts_with("/public-objects/PROSPERAR_FUNCIONARIOS_DOS_CLIENTES/uploads/"));

        let name = path.trim_start_matches("/public-objects/");
        let meta = backend.metadata(name).await.unwrap();
        assert_eq!(meta.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_generate_link_strips_objects_prefix() {
        let (svc, _, signer) = service();
        svc.generate_public_download_link("/objects/foo/bar", 1).await.unwrap();
        svc.generate_public_download_link("/prosperar-publico/a.pdf", 168).await.unwrap();
        svc.generate_public_download_link("/public-objects/x/y.png", 2).await.unwrap();

        let requests = signer.requests.lock().unwrap();
        assert_eq!(requests[0].object_name, "foo/bar");
        assert_eq!(requests[0].method, SignMethod::Get);
        assert_eq!(requests[0].ttl, Duration::from_secs(3600));
        assert_eq!(requests[1].object_name, "prosperar-publico/a.pdf");
        assert_eq!(requests[1].ttl, Duration::from_secs(168 * 3600));
        assert_eq!(requests[2].object_name, "x/y.png");
    }

    #[tokio::test]
    async fn test_generate_link_expiry_through_sidecar() {
        let sidecar = fake_sidecar(StatusCode::OK).await;
        let backend = Arc::new(MemoryBackend::new("docs"));
        let signer = Arc::new(SidecarSigner::new(&sidecar.base_url, 5).unwrap());
        let svc = ObjectStorageService::new(backend, signer, settings());

        let before = Utc::now();
        let url = svc.generate_public_download_link("/objects/foo/bar", 1).await.unwrap();
        assert_eq!(url, "https://signed.example/foo/bar?method=GET");

        let seen = sidecar.requests.lock().unwrap();
        assert_eq!(seen[0]["object_name"], "foo/bar");
        assert_eq!(seen[0]["method"], "GET");
        let expires: DateTime<Utc> = seen[0]["expires_at"].as_str().unwrap().parse().unwrap();
        let delta = (expires - before).num_seconds();
        assert!((3595..=3605).contains(&delta), "expiry delta was {delta}");
    }

    #[tokio::test]
    async fn test_signing_failure_carries_status() {
        let sidecar = fake_sidecar(StatusCode::FORBIDDEN).await;
        let backend = Arc::new(MemoryBackend::new("docs"));
        let signer = Arc::new(SidecarSigner::new(&sidecar.base_url, 5).unwrap());
        let svc = ObjectStorageService::new(backend, signer, settings());

        let err = svc
            .generate_public_download_link("/objects/foo/bar", 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));

        let err = svc.object_entity_upload_url().await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_normalize_requires_private_dir_only_for_storage_urls() {
        let backend = Arc::new(MemoryBackend::new("docs"));
        let (svc, _) = service_with(backend, StorageConfig::default());
        assert_eq!(
            svc.normalize_object_entity_path("/objects/x").unwrap(),
            "/objects/x"
        );
        assert!(svc
            .normalize_object_entity_path("https://storage.googleapis.com/docs/.private/x")
            .is_err());
    }

    #[tokio::test]
    async fn test_try_set_acl_policy_from_upload_url() {
        let (svc, backend, _) = service();
        backend
            .save(".private/uploads/abc", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        let policy = ObjectAclPolicy {
            owner: "user-1".into(),
            visibility: Visibility::Private,
            acl_rules: Vec::new(),
        };

        let path = svc
            .try_set_object_entity_acl_policy(
                "https://storage.googleapis.com/docs/.private/uploads/abc?X-Goog-Signature=1",
                &policy,
            )
            .await
            .unwrap();
        assert_eq!(path, "/objects/.private/uploads/abc");

        let file = svc.object_entity_file(&path).await.unwrap();
        assert!(svc.can_access_object_entity(Some("user-1"), &file, None).await.unwrap());
        assert!(!svc.can_access_object_entity(Some("user-2"), &file, None).await.unwrap());
        assert!(!svc.can_access_object_entity(None, &file, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_try_set_acl_policy_passthrough_and_missing() {
        let (svc, _, _) = service();
        let policy = ObjectAclPolicy {
            owner: "u".into(),
            visibility: Visibility::Public,
            acl_rules: Vec::new(),
        };
        assert_eq!(
            svc.try_set_object_entity_acl_policy("relative/thing", &policy)
                .await
                .unwrap(),
            "relative/thing"
        );
        assert!(matches!(
            svc.try_set_object_entity_acl_policy("/objects/missing", &policy).await,
            Err(StorageError::ObjectNotFound)
        ));
    }

    async fn seed_owned(svc: &ObjectStorageService, backend: &MemoryBackend, name: &str) {
        backend
            .save(name, Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        let policy = ObjectAclPolicy {
            owner: "ignored".into(),
            visibility: Visibility::Private,
            acl_rules: Vec::new(),
        };
        svc.set_object_entity_acl_policy_as("user-1", &format!("/objects/{name}"), policy)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_acl_policy_is_owned_by_caller() {
        let (svc, backend, _) = service();
        seed_owned(&svc, &backend, ".private/uploads/abc").await;

        let file = svc
            .object_entity_file("/objects/.private/uploads/abc")
            .await
            .unwrap();
        let policy = acl::get_object_acl_policy(backend.as_ref(), &file)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(policy.owner, "user-1");
    }

    #[tokio::test]
    async fn test_acl_rewrite_by_other_user_is_denied() {
        let (svc, backend, _) = service();
        seed_owned(&svc, &backend, ".private/uploads/abc").await;

        let takeover = ObjectAclPolicy {
            owner: "user-2".into(),
            visibility: Visibility::Public,
            acl_rules: Vec::new(),
        };
        assert!(matches!(
            svc.set_object_entity_acl_policy_as(
                "user-2",
                "/objects/.private/uploads/abc",
                takeover.clone()
            )
            .await,
            Err(StorageError::AccessDenied)
        ));

        // The owner may change visibility but not hand the object away.
        svc.set_object_entity_acl_policy_as("user-1", "/objects/.private/uploads/abc", takeover)
            .await
            .unwrap();
        let file = svc
            .object_entity_file("/objects/.private/uploads/abc")
            .await
            .unwrap();
        let policy = acl::get_object_acl_policy(backend.as_ref(), &file)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(policy.owner, "user-1");
        assert!(policy.is_public());
    }

    #[tokio::test]
    async fn test_authorized_link_checks_private_objects() {
        let (svc, backend, signer) = service();
        seed_owned(&svc, &backend, ".private/uploads/abc").await;

        let url = svc
            .authorized_download_link("user-1", "/objects/.private/uploads/abc", 1)
            .await
            .unwrap();
        assert_eq!(url, "https://signed.example/.private/uploads/abc");

        for path in ["/objects/.private/uploads/abc", "/.private/uploads/abc"] {
            assert!(matches!(
                svc.authorized_download_link("user-2", path, 1).await,
                Err(StorageError::AccessDenied)
            ));
        }
        assert!(matches!(
            svc.authorized_download_link("user-1", "/objects/.private/missing", 1)
                .await,
            Err(StorageError::ObjectNotFound)
        ));
        assert_eq!(signer.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_authorized_link_passes_public_paths() {
        let (svc, _, _) = service();
        let url = svc
            .authorized_download_link("user-2", "/public/guide.pdf", 1)
            .await
            .unwrap();
        assert_eq!(url, "https://signed.example/public/guide.pdf");
    }

    #[tokio::test]
    async fn test_download_object_headers_and_body() {
        let (svc, backend, _) = service();
        backend
            .save("public/a.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        let file = svc.search_public_object("a.txt").await.unwrap().unwrap();

        let resp = svc.download_object(&file, DEFAULT_CACHE_TTL_SECS).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(resp.headers()[CONTENT_LENGTH], "5");
        assert_eq!(resp.headers()[CACHE_CONTROL], "private, max-age=3600");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn test_download_public_object_cache_header() {
        let (svc, backend, _) = service();
        backend
            .save("public/a.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        let file = svc.search_public_object("a.txt").await.unwrap().unwrap();
        let policy = ObjectAclPolicy {
            owner: "u".into(),
            visibility: Visibility::Public,
            acl_rules: Vec::new(),
        };
        acl::set_object_acl_policy(backend.as_ref(), &file, &policy).await.unwrap();

        let resp = svc.download_object(&file, 60).await;
        assert_eq!(resp.headers()[CACHE_CONTROL], "public, max-age=60");
    }

    #[tokio::test]
    async fn test_download_missing_object_is_500() {
        let (svc, _, _) = service();
        let file = ObjectFile {
            bucket: "docs".into(),
            name: "gone".into(),
        };
        let resp = svc.download_object(&file, 60).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Error downloading file");
    }

    /// Backend whose body stream fails after the first chunk.
    struct BrokenStreamBackend(MemoryBackend);

    impl ObjectBackend for BrokenStreamBackend {
        fn bucket(&self) -> &str {
            self.0.bucket()
        }
        fn exists(&self, name: &str) -> BoxFuture<'_, anyhow::Result<bool>> {
            self.0.exists(name)
        }
        fn metadata(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ObjectMetadata>> {
            self.0.metadata(name)
        }
        fn set_custom_metadata(
            &self,
            name: &str,
            key: &str,
            value: &str,
        ) -> BoxFuture<'_, anyhow::Result<()>> {
            self.0.set_custom_metadata(name, key, value)
        }
        fn open(&self, _name: &str) -> BoxFuture<'_, anyhow::Result<ByteStream>> {
            Box::pin(async {
                let chunks: Vec<anyhow::Result<Bytes>> = vec![
                    Ok(Bytes::from_static(b"par")),
                    Err(anyhow::anyhow!("connection reset")),
                ];
                Ok(stream::iter(chunks).boxed())
            })
        }
        fn save(
            &self,
            name: &str,
            data: Bytes,
            content_type: &str,
        ) -> BoxFuture<'_, anyhow::Result<()>> {
            self.0.save(name, data, content_type)
        }
        fn list(
            &self,
            prefix: &str,
            delimiter: Option<&str>,
        ) -> BoxFuture<'_, anyhow::Result<Listing>> {
            self.0.list(prefix, delimiter)
        }
    }

    #[tokio::test]
    async fn test_stream_error_after_headers_is_not_500() {
        let inner = MemoryBackend::new("docs");
        inner
            .save("public/big.bin", Bytes::from_static(b"partial"), "application/octet-stream")
            .await
            .unwrap();
        let backend: Arc<dyn ObjectBackend> = Arc::new(BrokenStreamBackend(inner));
        let svc = ObjectStorageService::new(
            backend,
            Arc::new(RecordingSigner::default()),
            settings(),
        );
        let file = svc.search_public_object("big.bin").await.unwrap().unwrap();

        let resp = svc.download_object(&file, 60).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(axum::body::to_bytes(resp.into_body(), usize::MAX).await.is_err());
    }
}

//! Object entity handlers: upload slots, ACL assignment, download links,
//! direct uploads and streamed downloads.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};

use super::USER_ID_HEADER;
use crate::acl::{ObjectAclPolicy, ObjectPermission, Visibility};
use crate::errors::StorageError;
use crate::object_storage::{DEFAULT_CACHE_TTL_SECS, DEFAULT_LINK_TTL_HOURS};
use crate::paths::PRIVATE_PREFIX;
use crate::AppState;

/// Multipart field carrying the uploaded file.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadUrlResponse {
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetAclRequest {
    /// Upload URL or logical path of the object.
    #[serde(rename = "objectURL")]
    pub object_url: String,
    pub policy: ObjectAclPolicy,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPathResponse {
    pub object_path: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLinkQuery {
    /// Logical object path.
    pub path: String,
    /// Link lifetime in hours (default 24).
    pub ttl_hours: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DownloadLinkResponse {
    pub url: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileQuery {
    /// `private` (default) or `public`.
    pub visibility: Option<Visibility>,
    /// Folder under the upload root; `uploads` when absent.
    pub sub_folder: Option<String>,
}

fn user_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn require_user(headers: &HeaderMap) -> Result<&str, StorageError> {
    user_id(headers).ok_or(StorageError::Unauthenticated)
}

/// `POST /api/objects/upload` -- presigned PUT URL for a new private object.
#[utoipa::path(
    post,
    path = "/api/objects/upload",
    tag = "Objects",
    operation_id = "CreateUploadUrl",
    responses(
        (status = 200, description = "Upload URL issued", body = UploadUrlResponse),
        (status = 502, description = "Signing sidecar failed")
    )
)]
pub async fn create_upload_url(
    State(state): State<Arc<AppState>>,
) -> Result<Json<UploadUrlResponse>, StorageError> {
    let upload_url = state.objects.object_entity_upload_url().await?;
    Ok(Json(UploadUrlResponse { upload_url }))
}

/// `PUT /api/objects/acl` -- attach an ACL policy to an uploaded object.
///
/// The caller owns a first policy. Replacing one needs write access and
/// keeps the existing owner.
#[utoipa::path(
    put,
    path = "/api/objects/acl",
    tag = "Objects",
    operation_id = "SetObjectAcl",
    request_body = SetAclRequest,
    responses(
        (status = 200, description = "Policy stored", body = ObjectPathResponse),
        (status = 401, description = "Missing x-user-id"),
        (status = 403, description = "Access denied"),
        (status = 404, description = "Object not found")
    )
)]
pub async fn set_object_acl(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SetAclRequest>,
) -> Result<Json<ObjectPathResponse>, StorageError> {
    let user = require_user(&headers)?;
    let object_path = state
        .objects
        .set_object_entity_acl_policy_as(user, &req.object_url, req.policy)
        .await?;
    Ok(Json(ObjectPathResponse { object_path }))
}

/// `GET /api/objects/download-link` -- presigned GET URL for a logical path.
#[utoipa::path(
    get,
    path = "/api/objects/download-link",
    tag = "Objects",
    operation_id = "CreateDownloadLink",
    params(DownloadLinkQuery),
    responses(
        (status = 200, description = "Download link issued", body = DownloadLinkResponse),
        (status = 400, description = "Invalid path"),
        (status = 401, description = "Missing x-user-id"),
        (status = 403, description = "Access denied"),
        (status = 404, description = "Object not found"),
        (status = 502, description = "Signing sidecar failed")
    )
)]
pub async fn create_download_link(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DownloadLinkQuery>,
) -> Result<Json<DownloadLinkResponse>, StorageError> {
    let user = require_user(&headers)?;
    let ttl_hours = query.ttl_hours.unwrap_or(DEFAULT_LINK_TTL_HOURS);
    let url = state
        .objects
        .authorized_download_link(user, &query.path, ttl_hours)
        .await?;
    Ok(Json(DownloadLinkResponse { url }))
}

/// `POST /api/objects/files` -- store the multipart `file` field.
#[utoipa::path(
    post,
    path = "/api/objects/files",
    tag = "Objects",
    operation_id = "UploadFile",
    params(UploadFileQuery),
    responses(
        (status = 200, description = "File stored", body = ObjectPathResponse),
        (status = 400, description = "Missing file field")
    )
)]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadFileQuery>,
    mut multipart: Multipart,
) -> Result<Json<ObjectPathResponse>, StorageError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| StorageError::InvalidRequest(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| FILE_FIELD.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| StorageError::InvalidRequest(format!("Failed to read upload: {e}")))?;

        let sub_folder = query.sub_folder.as_deref();
        let object_path = match query.visibility.unwrap_or(Visibility::Private) {
            Visibility::Private => {
                state
                    .objects
                    .upload_private_file(&file_name, data, sub_folder)
                    .await?
            }
            Visibility::Public => {
                state
                    .objects
                    .upload_public_file(&file_name, data, sub_folder)
                    .await?
            }
        };
        return Ok(Json(ObjectPathResponse { object_path }));
    }

    Err(StorageError::InvalidRequest(format!(
        "Multipart field '{FILE_FIELD}' is required"
    )))
}

/// `GET /objects/{path}` -- stream a private object after an ACL check.
#[utoipa::path(
    get,
    path = "/objects/{path}",
    tag = "Objects",
    operation_id = "GetPrivateObject",
    params(("path" = String, Path, description = "Object name")),
    responses(
        (status = 200, description = "Object body"),
        (status = 403, description = "Access denied"),
        (status = 404, description = "Object not found")
    )
)]
pub async fn get_private_object(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, StorageError> {
    let file = state
        .objects
        .object_entity_file(&format!("{PRIVATE_PREFIX}{path}"))
        .await?;

    let user = user_id(&headers);
    let allowed = state
        .objects
        .can_access_object_entity(user, &file, Some(ObjectPermission::Read))
        .await?;
    if !allowed {
        warn!("Access denied to {} for user {:?}", file.name, user);
        return Err(StorageError::AccessDenied);
    }

    Ok(state
        .objects
        .download_object(&file, DEFAULT_CACHE_TTL_SECS)
        .await)
}

/// `GET /public-objects/{path}` -- stream the first match across the public
/// search paths.
#[utoipa::path(
    get,
    path = "/public-objects/{path}",
    tag = "Objects",
    operation_id = "GetPublicObject",
    params(("path" = String, Path, description = "Path relative to a search path")),
    responses(
        (status = 200, description = "Object body"),
        (status = 404, description = "File not found")
    )
)]
pub async fn get_public_object(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Response, StorageError> {
    match state.objects.search_public_object(&path).await? {
        Some(file) => {
            info!("Serving public object {}", file.name);
            Ok(state
                .objects
                .download_object(&file, DEFAULT_CACHE_TTL_SECS)
                .await)
        }
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "File not found" })),
        )
            .into_response()),
    }
}

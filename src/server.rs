//! Axum router construction.
//!
//! The [`app`] function wires every endpoint to its handler and returns a
//! ready-to-serve [`axum::Router`].

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::handlers::{files, objects};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "bucketdesk API",
        version = "0.1.0",
        description = "Document bucket browsing, signed links and object ACLs"
    ),
    paths(
        health_check,
        files::list_public_files,
        objects::create_upload_url,
        objects::set_object_acl,
        objects::create_download_link,
        objects::upload_file,
        objects::get_private_object,
        objects::get_public_object,
    ),
    components(schemas(
        crate::public_files::FileItem,
        crate::public_files::ItemType,
        crate::public_files::FolderContents,
        crate::public_files::SearchResults,
        crate::public_files::ItemFailure,
        crate::public_files::FailureStage,
        crate::acl::ObjectAclPolicy,
        crate::acl::ObjectAclRule,
        crate::acl::AccessGroup,
        crate::acl::AccessGroupType,
        crate::acl::ObjectPermission,
        crate::acl::Visibility,
        objects::UploadUrlResponse,
        objects::SetAclRequest,
        objects::ObjectPathResponse,
        objects::DownloadLinkResponse,
    )),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Files", description = "Public folder browser"),
        (name = "Objects", description = "Object entities, signed URLs and ACLs")
    )
)]
pub struct ApiDoc;

/// Build the axum [`Router`] with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    let max_upload = state.config.server.max_upload_size;
    let metrics_enabled = state.config.observability.metrics;

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/openapi.json", get(openapi_json))
        .route("/api/public-files", get(files::list_public_files))
        .route("/api/objects/upload", post(objects::create_upload_url))
        .route("/api/objects/acl", put(objects::set_object_acl))
        .route(
            "/api/objects/download-link",
            get(objects::create_download_link),
        )
        .route("/api/objects/files", post(objects::upload_file))
        // Wildcards capture slashes in object names.
        .route("/objects/*path", get(objects::get_private_object))
        .route("/public-objects/*path", get(objects::get_public_object));

    if metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let router = router
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http());

    if metrics_enabled {
        // Outermost so it sees the full request lifecycle.
        router.layer(middleware::from_fn(metrics_middleware))
    } else {
        router
    }
}

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

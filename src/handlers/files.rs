//! Public folder browser handler.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::errors::StorageError;
use crate::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PublicFilesQuery {
    /// Folder to browse or search root. Defaults to the browse root.
    pub path: Option<String>,
    /// Filename substring; switches to recursive search when non-empty.
    pub search: Option<String>,
}

/// `GET /api/public-files` -- browse a folder or search beneath it.
#[utoipa::path(
    get,
    path = "/api/public-files",
    tag = "Files",
    operation_id = "ListPublicFiles",
    params(PublicFilesQuery),
    responses(
        (status = 200, description = "Folder contents or search results"),
        (status = 500, description = "Listing failed")
    )
)]
pub async fn list_public_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PublicFilesQuery>,
) -> Result<Response, StorageError> {
    let path = query.path.as_deref().filter(|p| !p.is_empty());

    match query.search.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(search) => {
            let results = state.files.search_files(search, path).await?;
            Ok(Json(results).into_response())
        }
        None => {
            let contents = state.files.browse_folder(path).await?;
            Ok(Json(contents).into_response())
        }
    }
}

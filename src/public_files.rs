//! Folder browsing and filename search over the public document tree.
//!
//! A bucket prefix is presented as a folder: common prefixes under it become
//! sub-folders and the objects directly inside it become files.  Every file
//! is enriched with its metadata and a week-long signed download link.
//! Enrichment failures are isolated per item and reported in `errors`.

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{error, info};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use utoipa::ToSchema;

use crate::errors::StorageError;
use crate::object_storage::ObjectStorageService;
use crate::storage::backend::ObjectBackend;

/// Lifetime of the download links attached to listed files.
pub const LISTING_LINK_TTL_HOURS: u64 = 168;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Folder,
}

/// One entry of a listing or search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileItem {
    fn folder(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            item_type: ItemType::Folder,
            size: None,
            last_modified: None,
            download_url: None,
            preview_url: None,
            mime_type: None,
        }
    }
}

/// Which enrichment step failed for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum FailureStage {
    /// Metadata lookup failed; the item was left out.
    Metadata,
    /// Link signing failed; the item is present without `downloadUrl`.
    DownloadLink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ItemFailure {
    pub path: String,
    pub stage: FailureStage,
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FolderContents {
    pub current_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_path: Option<String>,
    pub files: Vec<FileItem>,
    pub folders: Vec<FileItem>,
    pub total_files: usize,
    pub total_folders: usize,
    pub errors: Vec<ItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub query: String,
    pub root_path: String,
    pub files: Vec<FileItem>,
    pub total_files: usize,
    pub errors: Vec<ItemFailure>,
}

/// `name` with accents stripped and case folded.
fn collation_key(name: &str) -> String {
    name.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Alphabetical order ignoring accents and case. Ties put unaccented before
/// accented and lowercase before uppercase.
fn by_name(a: &FileItem, b: &FileItem) -> Ordering {
    collation_key(&a.name)
        .cmp(&collation_key(&b.name))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| b.name.cmp(&a.name))
}

/// Parent of `path` relative to `root`, or `None` at the top.
fn parent_path(path: &str, root: &str) -> Option<String> {
    if path == root || path.is_empty() {
        return None;
    }
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if parts.len() > 1 {
        Some(parts[..parts.len() - 1].join("/"))
    } else {
        Some(root.to_string())
    }
}

#[derive(Clone)]
pub struct PublicFilesService {
    backend: Arc<dyn ObjectBackend>,
    objects: ObjectStorageService,
    browse_root: String,
}

impl PublicFilesService {
    pub fn new(objects: ObjectStorageService, browse_root: &str) -> Self {
        Self {
            backend: objects.backend().clone(),
            objects,
            browse_root: browse_root.to_string(),
        }
    }

    /// List the direct children of `path` (the browse root when `None`).
    pub async fn browse_folder(&self, path: Option<&str>) -> Result<FolderContents, StorageError> {
        let path = path.unwrap_or(&self.browse_root);
        info!("Browsing folder: {}", path);

        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };

        let listing = self
            .backend
            .list(&prefix, Some("/"))
            .await
            .map_err(|e| {
                error!("Error browsing folder {}: {}", path, e);
                StorageError::Listing(format!("Erro ao listar conteúdo da pasta: {e}"))
            })?;

        let mut folders: Vec<FileItem> = listing
            .prefixes
            .iter()
            .filter_map(|p| {
                let name = p.strip_prefix(&prefix).unwrap_or(p).trim_end_matches('/');
                (!name.is_empty()).then(|| FileItem::folder(name, p.trim_end_matches('/')))
            })
            .collect();

        let mut files = Vec::new();
        let mut errors = Vec::new();
        for name in &listing.objects {
            let relative = name.strip_prefix(&prefix).unwrap_or(name);
            if relative.is_empty() || relative.contains('/') {
                continue;
            }
            if let Some(item) = self.enrich(name, relative, &mut errors).await {
                files.push(item);
            }
        }

        folders.sort_by(by_name);
        files.sort_by(by_name);
        info!(
            "Found {} folders and {} files in {}",
            folders.len(),
            files.len(),
            path
        );

        Ok(FolderContents {
            current_path: path.to_string(),
            parent_path: parent_path(path, &self.browse_root),
            total_files: files.len(),
            total_folders: folders.len(),
            files,
            folders,
            errors,
        })
    }

    /// Recursively find files under `root` whose base name contains
    /// `query`, ignoring case.
    pub async fn search_files(
        &self,
        query: &str,
        root: Option<&str>,
    ) -> Result<SearchResults, StorageError> {
        let root = root.unwrap_or(&self.browse_root);
        info!("Searching for \"{}\" in {}", query, root);

        let listing = self
            .backend
            .list(&format!("{root}/"), None)
            .await
            .map_err(|e| {
                error!("Error searching files under {}: {}", root, e);
                StorageError::Listing(format!("Erro na busca: {e}"))
            })?;

        let needle = query.to_lowercase();
        let mut files = Vec::new();
        let mut errors = Vec::new();
        for name in &listing.objects {
            let base = name.rsplit('/').next().unwrap_or_default();
            // Folder placeholders have no base name.
            if base.is_empty() || !base.to_lowercase().contains(&needle) {
                continue;
            }
            if let Some(item) = self.enrich(name, base, &mut errors).await {
                files.push(item);
            }
        }

        files.sort_by(by_name);
        info!("Found {} files matching \"{}\"", files.len(), query);

        Ok(SearchResults {
            query: query.to_string(),
            root_path: root.to_string(),
            total_files: files.len(),
            files,
            errors,
        })
    }

    /// Build the file item for `object_name`, recording what failed.
    async fn enrich(
        &self,
        object_name: &str,
        display_name: &str,
        errors: &mut Vec<ItemFailure>,
    ) -> Option<FileItem> {
        let metadata = match self.backend.metadata(object_name).await {
            Ok(m) => m,
            Err(e) => {
                error!("Error processing file {}: {}", object_name, e);
                errors.push(ItemFailure {
                    path: object_name.to_string(),
                    stage: FailureStage::Metadata,
                    cause: e.to_string(),
                });
                return None;
            }
        };

        let download_url = match self
            .objects
            .generate_public_download_link(&format!("/{object_name}"), LISTING_LINK_TTL_HOURS)
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                error!("Error generating download link for {}: {}", object_name, e);
                errors.push(ItemFailure {
                    path: object_name.to_string(),
                    stage: FailureStage::DownloadLink,
                    cause: e.to_string(),
                });
                None
            }
        };

        let is_image = metadata
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"));

        Some(FileItem {
            name: display_name.to_string(),
            path: object_name.to_string(),
            item_type: ItemType::File,
            size: Some(metadata.size),
            last_modified: metadata.time_created,
            preview_url: if is_image { download_url.clone() } else { None },
            download_url,
            mime_type: metadata.content_type,
        })
    }
}

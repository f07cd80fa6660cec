//! Logical object paths.
//!
//! Callers refer to stored objects through logical paths rather than
//! bucket coordinates:
//!
//!   Private entity:  `/objects/<objectName>`
//!   Public entity:   `/public-objects/<objectName>`
//!
//! Anything else is treated as a raw bucket path whose object name is the
//! path without its leading `/`.

use crate::errors::StorageError;

/// Prefix of private entity paths.
pub const PRIVATE_PREFIX: &str = "/objects/";

/// Prefix of public entity paths.
pub const PUBLIC_PREFIX: &str = "/public-objects/";

/// Raw storage URLs that [`normalize_entity_path`] rewrites.
pub const STORAGE_URL_PREFIX: &str = "https://storage.googleapis.com/";

/// A parsed logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectPath {
    /// `/objects/<name>`
    Private(String),
    /// `/public-objects/<name>`
    Public(String),
    /// Any other bucket path, kept verbatim.
    Raw(String),
}

impl ObjectPath {
    /// Parse a logical path. An entity prefix with nothing after it is an
    /// error rather than a raw path.
    pub fn parse(path: &str) -> Result<Self, StorageError> {
        if let Some(name) = path.strip_prefix(PRIVATE_PREFIX) {
            if name.is_empty() {
                return Err(StorageError::InvalidPath {
                    path: path.to_string(),
                });
            }
            return Ok(ObjectPath::Private(name.to_string()));
        }
        if let Some(name) = path.strip_prefix(PUBLIC_PREFIX) {
            if name.is_empty() {
                return Err(StorageError::InvalidPath {
                    path: path.to_string(),
                });
            }
            return Ok(ObjectPath::Public(name.to_string()));
        }
        Ok(ObjectPath::Raw(path.to_string()))
    }

    /// The object name inside the bucket.
    pub fn object_name(&self) -> Result<String, StorageError> {
        match self {
            ObjectPath::Private(name) | ObjectPath::Public(name) => Ok(name.clone()),
            ObjectPath::Raw(path) => object_name_for(path),
        }
    }
}

/// Map a full bucket path (`/dir/sub/file` or `dir/sub/file`) to an object
/// name in the configured bucket.
pub fn object_name_for(full_path: &str) -> Result<String, StorageError> {
    let name = full_path.trim_start_matches('/');
    if name.is_empty() {
        return Err(StorageError::InvalidPath {
            path: full_path.to_string(),
        });
    }
    Ok(name.to_string())
}

/// Rewrite a raw `https://storage.googleapis.com/<bucket>/<object>` URL
/// into a logical path.
///
/// Non-storage URLs come back unchanged.  Storage URLs lose their domain,
/// query and fragment; objects of `bucket` that live under `private_dir`
/// become `/objects/<objectName>`, anything else yields the decoded URL
/// path.  The output never starts with [`STORAGE_URL_PREFIX`], so applying
/// the function twice is the same as applying it once.
pub fn normalize_entity_path(raw: &str, bucket: &str, private_dir: &str) -> String {
    let Some(rest) = raw.strip_prefix(STORAGE_URL_PREFIX) else {
        return raw.to_string();
    };

    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    let decoded = percent_encoding::percent_decode_str(&rest[..end]).decode_utf8_lossy();
    let raw_object_path = format!("/{decoded}");

    let entity_dir = format!("{}/", private_dir.trim_matches('/'));
    let object_name = decoded
        .strip_prefix(bucket)
        .and_then(|r| r.strip_prefix('/'))
        .filter(|name| name.starts_with(&entity_dir) && name.len() > entity_dir.len());

    match object_name {
        Some(name) => format!("{PRIVATE_PREFIX}{name}"),
        None => raw_object_path,
    }
}

/// Join a directory and a relative path with a single `/`.
pub fn join(dir: &str, rest: &str) -> String {
    format!(
        "{}/{}",
        dir.trim_end_matches('/'),
        rest.trim_start_matches('/')
    )
}

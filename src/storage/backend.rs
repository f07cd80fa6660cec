//! Abstract bucket client trait.
//!
//! Every bucket backend must implement [`ObjectBackend`].  Services receive
//! an `Arc<dyn ObjectBackend>` at construction, so tests and alternative
//! deployments swap the bucket without touching service code.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::collections::HashMap;

/// Object body as a stream of chunks.
pub type ByteStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// Metadata of a single stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Full object name inside the bucket.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type recorded at upload time.
    pub content_type: Option<String>,
    /// RFC 3339 creation timestamp.
    pub time_created: Option<String>,
    /// Custom key/value metadata.
    pub custom: HashMap<String, String>,
}

/// Result of a single listing call.
///
/// With a delimiter, `prefixes` holds the common prefixes ("folders", with
/// their trailing delimiter) and `objects` the names the backend returned
/// as items.  Placeholder objects ending exactly at the delimiter are
/// included in `objects` as well.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub objects: Vec<String>,
    pub prefixes: Vec<String>,
}

/// Async bucket contract.
pub trait ObjectBackend: Send + Sync + 'static {
    /// Name of the bucket this backend talks to.
    fn bucket(&self) -> &str;

    /// Check whether `name` exists.
    fn exists(&self, name: &str) -> BoxFuture<'_, anyhow::Result<bool>>;

    /// Fetch the metadata of `name`.
    fn metadata(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ObjectMetadata>>;

    /// Merge `key = value` into the custom metadata of `name`.
    fn set_custom_metadata(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Open a streaming reader over the body of `name`.
    fn open(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ByteStream>>;

    /// Store `data` at `name` with the given content type.
    fn save(
        &self,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> BoxFuture<'_, anyhow::Result<()>>;

    /// List objects under `prefix`, grouping by `delimiter` when given.
    fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> BoxFuture<'_, anyhow::Result<Listing>>;
}

/// Handle to one object in a bucket, as returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFile {
    pub bucket: String,
    pub name: String,
}

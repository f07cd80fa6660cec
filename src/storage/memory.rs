//! In-memory bucket backend.
//!
//! Objects live in a `tokio::sync::RwLock<BTreeMap<...>>` keyed by object
//! name, so listings come back in lexicographic order like a real bucket.
//! Used for local development (`storage.backend: memory`) and tests.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::backend::{ByteStream, Listing, ObjectBackend, ObjectMetadata};

#[derive(Debug, Clone)]
struct StoredEntry {
    data: Bytes,
    content_type: String,
    time_created: String,
    custom: HashMap<String, String>,
}

/// In-memory bucket.
pub struct MemoryBackend {
    bucket: String,
    objects: tokio::sync::RwLock<BTreeMap<String, StoredEntry>>,
}

impl MemoryBackend {
    /// Create an empty bucket called `bucket`.
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: tokio::sync::RwLock::new(BTreeMap::new()),
        }
    }
}

/// Split the listing of `names` under `prefix` the way GCS does with
/// `includeTrailingDelimiter=true`.
fn split_listing<'a, I>(names: I, prefix: &str, delimiter: Option<&str>) -> Listing
where
    I: Iterator<Item = &'a String>,
{
    let mut objects = Vec::new();
    let mut prefixes = BTreeSet::new();

    for name in names.filter(|n| n.starts_with(prefix)) {
        let rest = &name[prefix.len()..];
        match delimiter.and_then(|d| rest.find(d).map(|idx| (d, idx))) {
            Some((d, idx)) => {
                let end = idx + d.len();
                prefixes.insert(format!("{prefix}{}", &rest[..end]));
                if end == rest.len() {
                    objects.push(name.clone());
                }
            }
            None => objects.push(name.clone()),
        }
    }

    Listing {
        objects,
        prefixes: prefixes.into_iter().collect(),
    }
}

impl ObjectBackend for MemoryBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn exists(&self, name: &str) -> BoxFuture<'_, anyhow::Result<bool>> {
        let name = name.to_string();
        Box::pin(async move { Ok(self.objects.read().await.contains_key(&name)) })
    }

    fn metadata(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ObjectMetadata>> {
        let name = name.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            let entry = objects
                .get(&name)
                .ok_or_else(|| anyhow::anyhow!("No such object: {}/{}", self.bucket, name))?;
            Ok(ObjectMetadata {
                name: name.clone(),
                size: entry.data.len() as u64,
                content_type: Some(entry.content_type.clone()),
                time_created: Some(entry.time_created.clone()),
                custom: entry.custom.clone(),
            })
        })
    }

    fn set_custom_metadata(
        &self,
        name: &str,
        key: &str,
        value: &str,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        let name = name.to_string();
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            let entry = objects
                .get_mut(&name)
                .ok_or_else(|| anyhow::anyhow!("No such object: {}/{}", self.bucket, name))?;
            entry.custom.insert(key, value);
            Ok(())
        })
    }

    fn open(&self, name: &str) -> BoxFuture<'_, anyhow::Result<ByteStream>> {
        let name = name.to_string();
        Box::pin(async move {
            let data = self
                .objects
                .read()
                .await
                .get(&name)
                .map(|e| e.data.clone())
                .ok_or_else(|| anyhow::anyhow!("No such object: {}/{}", self.bucket, name))?;
            Ok(stream::iter(vec![Ok(data)]).boxed())
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
            tracing::debug!("memory save: bucket={} name={}", self.bucket, name);
            let entry = StoredEntry {
                data,
                content_type,
                time_created: chrono::Utc::now().to_rfc3339(),
                custom: HashMap::new(),
            };
            self.objects.write().await.insert(name, entry);
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
            let objects = self.objects.read().await;
            Ok(split_listing(
                objects.keys(),
                &prefix,
                delimiter.as_deref(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new("test-bucket");
        for name in ["a/x.txt", "a/b/y.txt", "a/b/z.png", "a/c/", "other/k.pdf"] {
            backend
                .save(name, Bytes::from(name.to_string()), "text/plain")
                .await
                .unwrap();
        }
        backend
    }

    #[tokio::test]
    async fn test_save_and_open_roundtrip() {
        let backend = MemoryBackend::new("test-bucket");
        backend
            .save("k.txt", Bytes::from("hello world"), "text/plain")
            .await
            .unwrap();

        let chunks: Vec<Bytes> = backend.open("k.txt").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello world");
    }

    #[tokio::test]
    async fn test_metadata() {
        let backend = MemoryBackend::new("test-bucket");
        backend
            .save("doc.pdf", Bytes::from_static(b"%PDF"), "application/pdf")
            .await
            .unwrap();

        let meta = backend.metadata("doc.pdf").await.unwrap();
        assert_eq!(meta.size, 4);
        assert_eq!(meta.content_type.as_deref(), Some("application/pdf"));
        assert!(meta.time_created.is_some());
        assert!(meta.custom.is_empty());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let backend = MemoryBackend::new("test-bucket");
        assert!(!backend.exists("nope").await.unwrap());
        assert!(backend.metadata("nope").await.is_err());
        assert!(backend.open("nope").await.is_err());
        assert!(backend.set_custom_metadata("nope", "k", "v").await.is_err());
    }

    #[tokio::test]
    async fn test_custom_metadata_merges() {
        let backend = MemoryBackend::new("test-bucket");
        backend.save("k", Bytes::new(), "text/plain").await.unwrap();
        backend.set_custom_metadata("k", "a", "1").await.unwrap();
        backend.set_custom_metadata("k", "b", "2").await.unwrap();

        let meta = backend.metadata("k").await.unwrap();
        assert_eq!(meta.custom.get("a").map(String::as_str), Some("1"));
        assert_eq!(meta.custom.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_list_with_delimiter() {
        let backend = seeded().await;
        let listing = backend.list("a/", Some("/")).await.unwrap();

        assert_eq!(listing.prefixes, vec!["a/b/".to_string(), "a/c/".to_string()]);
        // "a/c/" is a placeholder object ending at the delimiter.
        assert_eq!(listing.objects, vec!["a/c/".to_string(), "a/x.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_list_recursive() {
        let backend = seeded().await;
        let listing = backend.list("a/", None).await.unwrap();

        assert!(listing.prefixes.is_empty());
        assert_eq!(listing.objects.len(), 4);
        assert!(listing.objects.contains(&"a/b/z.png".to_string()));
        assert!(!listing.objects.contains(&"other/k.pdf".to_string()));
    }

    #[tokio::test]
    async fn test_list_everything_in_name_order() {
        let backend = seeded().await;
        let listing = backend.list("", None).await.unwrap();
        assert_eq!(listing.objects.len(), 5);
        assert_eq!(listing.objects[0], "a/b/y.txt");
        assert_eq!(listing.objects[4], "other/k.pdf");
    }
}

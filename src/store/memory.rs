//! In-process [`BlobStore`] backend.
//!
//! Keeps every blob in a map guarded by an async lock, with the same observable
//! semantics as a remote container: hierarchical listings collapse common
//! prefixes into synthesized directories, conditional uploads answer 409, and
//! copying a missing source answers 404. The integration tests and the
//! walkthrough demo mount on top of this backend; embedders can use it as a
//! fixture for their own.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use super::BlobItemInfo;
use super::BlobStore;
use super::ByteStream;
use super::RemoteError;

#[derive(Clone, Debug)]
struct StoredBlob {
    data: Vec<u8>,
    last_modified: SystemTime,
    etag: String,
}

/// An in-process blob container.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
    etag_counter: AtomicU64,
    operations: parking_lot::Mutex<Vec<(&'static str, String)>>,
}

impl MemoryBlobStore {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a blob without going through the async API. Intended for test
    /// fixtures and demos; panics if called from async context.
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        let key = key.into();
        self.blobs.blocking_write().insert(
            key,
            StoredBlob {
                data,
                last_modified: SystemTime::now(),
                etag: self.next_etag(),
            },
        );
    }

    /// Reads back the raw content of a blob, if present. Intended for test
    /// assertions; panics if called from async context.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.blocking_read().get(key).map(|b| b.data.clone())
    }

    /// The operations issued against this store so far, in order, as
    /// `(operation, key)` pairs.
    pub fn operations(&self) -> Vec<(&'static str, String)> {
        self.operations.lock().clone()
    }

    /// Drops the recorded operation log.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    fn record(&self, op: &'static str, key: &str) {
        self.operations.lock().push((op, key.to_owned()));
    }

    fn next_etag(&self) -> String {
        format!("0x{:016X}", self.etag_counter.fetch_add(1, Ordering::Relaxed))
    }

    fn info_for(key: &str, blob: &StoredBlob) -> BlobItemInfo {
        BlobItemInfo::file(
            key,
            blob.data.len() as u64,
            blob.last_modified,
            Some(blob.etag.clone()),
        )
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn probe(&self) -> Result<(), RemoteError> {
        self.record("probe", "");
        Ok(())
    }

    async fn list_by_hierarchy(&self, prefix: &str) -> Result<Vec<BlobItemInfo>, RemoteError> {
        self.record("list_by_hierarchy", prefix);
        let blobs = self.blobs.read().await;
        // BTreeMap orders the children by name and deduplicates the common
        // prefixes that several keys share.
        let mut children: BTreeMap<String, BlobItemInfo> = BTreeMap::new();
        for (key, blob) in blobs.iter() {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.find('/') {
                Some(pos) => {
                    let name = &rest[..pos];
                    children
                        .entry(name.to_owned())
                        .or_insert_with(|| BlobItemInfo::directory(format!("{prefix}{name}/")));
                }
                None => {
                    children.insert(rest.to_owned(), Self::info_for(key, blob));
                }
            }
        }
        Ok(children.into_values().collect())
    }

    async fn list_all(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        self.record("list_all", prefix);
        let blobs = self.blobs.read().await;
        let mut keys: Vec<String> = blobs
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_properties(&self, key: &str) -> Result<Option<BlobItemInfo>, RemoteError> {
        self.record("get_properties", key);
        let blobs = self.blobs.read().await;
        Ok(blobs.get(key).map(|blob| Self::info_for(key, blob)))
    }

    async fn download(&self, key: &str) -> Result<ByteStream, RemoteError> {
        self.record("download", key);
        let blobs = self.blobs.read().await;
        match blobs.get(key) {
            Some(blob) => Ok(Box::pin(Cursor::new(blob.data.clone())) as ByteStream),
            None => Err(RemoteError::http(404, format!("blob {key:?} not found"))),
        }
    }

    async fn upload(
        &self,
        key: &str,
        content: ByteStream,
        _length: u64,
        overwrite: bool,
    ) -> Result<(), RemoteError> {
        self.record("upload", key);
        let mut content = content;
        let mut data = Vec::new();
        content.read_to_end(&mut data).await?;
        let mut blobs = self.blobs.write().await;
        if !overwrite && blobs.contains_key(key) {
            return Err(RemoteError::http(409, format!("blob {key:?} already exists")));
        }
        blobs.insert(
            key.to_owned(),
            StoredBlob {
                data,
                last_modified: SystemTime::now(),
                etag: self.next_etag(),
            },
        );
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), RemoteError> {
        self.record("copy", src);
        let mut blobs = self.blobs.write().await;
        let Some(source) = blobs.get(src).cloned() else {
            return Err(RemoteError::http(404, format!("copy source {src:?} not found")));
        };
        blobs.insert(
            dst.to_owned(),
            StoredBlob {
                data: source.data,
                last_modified: SystemTime::now(),
                etag: self.next_etag(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        self.record("delete", key);
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        self.record("exists", key);
        Ok(self.blobs.read().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::super::EntryKind;
    use super::*;

    fn seeded() -> MemoryBlobStore {
        let store = MemoryBlobStore::new();
        {
            let mut blobs = store.blobs.try_write().unwrap();
            for key in ["a.txt", "photos/a.jpg", "photos/b/c.jpg", "photos/b/d.jpg"] {
                blobs.insert(
                    key.to_owned(),
                    StoredBlob {
                        data: key.as_bytes().to_vec(),
                        last_modified: SystemTime::now(),
                        etag: "0x0".to_owned(),
                    },
                );
            }
        }
        store
    }

    #[tokio::test]
    async fn hierarchy_listing_collapses_prefixes() {
        let store = seeded();
        let entries = store.list_by_hierarchy("").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "photos"]);
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].kind, EntryKind::Directory);
        assert_eq!(entries[1].full_path, "photos/");
    }

    #[tokio::test]
    async fn hierarchy_listing_of_nested_prefix() {
        let store = seeded();
        let entries = store.list_by_hierarchy("photos/").await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b"]);
    }

    #[tokio::test]
    async fn list_all_is_recursive() {
        let store = seeded();
        let keys = store.list_all("photos/").await.unwrap();
        assert_eq!(keys, vec!["photos/a.jpg", "photos/b/c.jpg", "photos/b/d.jpg"]);
    }

    #[tokio::test]
    async fn upload_without_overwrite_conflicts() {
        let store = seeded();
        let content: ByteStream = Box::pin(Cursor::new(b"x".to_vec()));
        let err = store.upload("a.txt", content, 1, false).await.unwrap_err();
        assert_eq!(err.status(), Some(409));
    }

    #[tokio::test]
    async fn download_missing_is_404() {
        let store = seeded();
        let err = match store.download("nope.txt").await {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn copy_missing_source_is_404() {
        let store = seeded();
        let err = store.copy("nope.txt", "dst.txt").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = seeded();
        store.delete("a.txt").await.unwrap();
        store.delete("a.txt").await.unwrap();
        assert!(!store.exists("a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn properties_round_trip() {
        let store = seeded();
        let info = store.get_properties("photos/a.jpg").await.unwrap().unwrap();
        assert_eq!(info.name, "a.jpg");
        assert_eq!(info.size, "photos/a.jpg".len() as u64);
        assert!(info.etag.is_some());
        assert!(store.get_properties("photos/").await.unwrap().is_none());
    }
}

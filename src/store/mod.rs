//! The whole-object capability the filesystem adapter is built on.
//!
//! A [`BlobStore`] exposes a flat, name-keyed namespace with no directories,
//! no partial updates and no server-side rename. Directory structure is
//! synthesized from key prefixes by hierarchical listings with `/` as the
//! delimiter. Implementations talk to a real service; [`memory`] provides an
//! in-process backend used by the tests and the walkthrough demo.

use std::pin::Pin;
use std::time::SystemTime;

use async_trait::async_trait;
#[cfg(feature = "serializable")]
use serde::Deserialize;
#[cfg(feature = "serializable")]
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::path_mapper::leaf_name;

pub mod memory;

/// A readable byte stream produced or consumed by store operations.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Failure of a remote store operation, carrying the HTTP-style status code
/// when the service produced one.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service answered with a non-success status.
    #[error("remote store returned status {status}: {message}")]
    Http {
        /// HTTP-style status code as received from the service.
        status: u16,
        /// Service-provided diagnostic text.
        message: String,
    },
    /// Transport-level failure before any status was received.
    #[error("I/O error talking to the remote store")]
    Io(#[from] std::io::Error),
    /// Any other implementation-specific failure.
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Shorthand for an [`RemoteError::Http`] value.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Http {
            status,
            message: message.into(),
        }
    }

    /// The HTTP-style status code, if the service produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True iff this error means the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Whether a listing entry is a real blob or a synthesized directory.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum EntryKind {
    /// A blob stored in the container.
    File,
    /// A common key prefix reported as a directory; has no independent
    /// existence in the store.
    Directory,
}

/// An immutable record describing one store entry.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct BlobItemInfo {
    /// Leaf segment of the key; contains no separators.
    pub name: String,
    /// The full key as stored. Synthesized directories end in `/`.
    pub full_path: String,
    /// Byte count; 0 for synthesized directories.
    pub size: u64,
    /// Last-modified instant as reported by the store (UTC).
    pub last_modified: SystemTime,
    /// File or synthesized directory.
    pub kind: EntryKind,
    /// Opaque version token, when the store provides one.
    pub etag: Option<String>,
}

impl BlobItemInfo {
    /// Describes a real blob.
    pub fn file(
        full_path: impl Into<String>,
        size: u64,
        last_modified: SystemTime,
        etag: Option<String>,
    ) -> Self {
        let full_path = full_path.into();
        BlobItemInfo {
            name: leaf_name(&full_path).to_owned(),
            full_path,
            size,
            last_modified,
            kind: EntryKind::File,
            etag,
        }
    }

    /// Describes a directory synthesized from a common key prefix.
    pub fn directory(full_path: impl Into<String>) -> Self {
        let full_path = full_path.into();
        BlobItemInfo {
            name: leaf_name(&full_path).to_owned(),
            full_path,
            size: 0,
            last_modified: SystemTime::now(),
            kind: EntryKind::Directory,
            etag: None,
        }
    }

    /// True iff this entry is a synthesized directory.
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Whole-object operations against the remote store.
///
/// All operations are asynchronous; the adapter runs them to completion on
/// the calling OS worker thread. Implementations must report the exact remote
/// status on failure so the adapter can map it into the OS error taxonomy,
/// and must perform hierarchical listings with `/` as the delimiter.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Verifies connectivity and credentials without touching any blob.
    async fn probe(&self) -> Result<(), RemoteError>;

    /// Lists the immediate children of `prefix` (which ends in `/`, or is
    /// empty for the container root): blobs as files, common sub-prefixes
    /// collapsed into synthesized directory entries. Ordered by name.
    async fn list_by_hierarchy(&self, prefix: &str) -> Result<Vec<BlobItemInfo>, RemoteError>;

    /// Lists every blob key under `prefix`, recursively.
    async fn list_all(&self, prefix: &str) -> Result<Vec<String>, RemoteError>;

    /// Fetches the properties of one blob, or `None` if it does not exist.
    async fn get_properties(&self, key: &str) -> Result<Option<BlobItemInfo>, RemoteError>;

    /// Opens the content of one blob for reading. A missing blob is a 404.
    async fn download(&self, key: &str) -> Result<ByteStream, RemoteError>;

    /// Stores `content` (of `length` bytes) under `key`, replacing the whole
    /// object. With `overwrite` false, an existing blob is a 409.
    async fn upload(
        &self,
        key: &str,
        content: ByteStream,
        length: u64,
        overwrite: bool,
    ) -> Result<(), RemoteError>;

    /// Server-side copy; waits for the copy to complete. A missing source is
    /// a 404.
    async fn copy(&self, src: &str, dst: &str) -> Result<(), RemoteError>;

    /// Removes one blob. Deleting an absent blob is not an error.
    async fn delete(&self, key: &str) -> Result<(), RemoteError>;

    /// True iff a blob exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, RemoteError>;
}

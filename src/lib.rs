//! Expose an object-storage container as a mountable filesystem.
//!
//! An OS kernel bridge drives a hierarchical, handle-based, synchronous
//! callback surface; the backing store is a flat, name-keyed namespace of
//! whole objects with no directories, no partial updates and no server-side
//! rename. This crate is the adapter between the two: it synthesizes
//! directories from key prefixes, buffers per-handle content locally so that
//! byte-offset writes become whole-object uploads at close, caches metadata
//! to stay responsive under kernel latency constraints, and maps remote
//! failures into the OS error taxonomy.
//!
//! [`BlobFs`] implements the [`Filesystem`] callback vtable over any
//! [`store::BlobStore`]. The graphical shell, credential storage and the
//! kernel bridge itself live outside this crate; they construct a
//! [`MountConfig`] and a store, build a [`BlobFs`], and forward each OS
//! callback to it.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use bitflags::bitflags;
use log::warn;

pub use crate::adapter::BlobFs;
pub use crate::cache::DEFAULT_TTL;
pub use crate::cache::MetadataCache;
pub use crate::content::DEFAULT_SPILL_THRESHOLD;
pub use crate::content::FileContext;
pub use crate::content::SpillPolicy;
pub use crate::path_mapper::PathMapper;
pub use crate::path_mapper::is_root_path;
pub use crate::path_mapper::leaf_name;
pub use crate::path_mapper::parent_prefix;
pub use crate::status::Status;
pub use crate::store::BlobItemInfo;
pub use crate::store::BlobStore;
pub use crate::store::ByteStream;
pub use crate::store::EntryKind;
pub use crate::store::RemoteError;
pub use crate::store::memory::MemoryBlobStore;

mod adapter;
mod cache;
mod content;
mod path_mapper;
mod status;
pub mod store;
pub mod wildcard;

/// Filesystem name reported in volume information.
pub const VOLUME_FILESYSTEM_NAME: &str = "BlobFS";

/// Longest path component reported to the OS.
pub const MAX_COMPONENT_LENGTH: u32 = 256;

/// Synthetic volume size: the store is effectively unbounded, so total and
/// free space are both reported as 1 TiB.
pub const SYNTHETIC_VOLUME_BYTES: u64 = 1 << 40;

/// How an open callback wants the target file handled, mirroring the OS
/// create dispositions.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OpenMode {
    /// Open an existing file; fail if it does not exist.
    Open,
    /// Create a file; fail if it already exists.
    CreateNew,
    /// Create a file, truncating any existing content.
    Create,
    /// Open the file if present, create it otherwise.
    OpenOrCreate,
    /// Open an existing file and drop its content.
    Truncate,
    /// Open for writing at the end, creating the file if absent.
    Append,
}

impl OpenMode {
    /// Whether this mode brings a missing file into existence.
    pub(crate) fn creates(self) -> bool {
        matches!(
            self,
            OpenMode::CreateNew | OpenMode::Create | OpenMode::OpenOrCreate | OpenMode::Append
        )
    }

    /// Whether this mode discards existing content at open.
    pub(crate) fn truncates(self) -> bool {
        matches!(self, OpenMode::Create | OpenMode::Truncate)
    }
}

/// Per-write flags forwarded from the OS.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WriteOptions {
    /// Write at the current end of file, ignoring the supplied offset.
    pub append_to_end: bool,
}

bitflags! {
    /// File attribute bits reported through get-info and enumeration.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct FileAttributes: u32 {
        /// The entry rejects writes.
        const READ_ONLY = 1 << 0;
        /// The entry is a directory.
        const DIRECTORY = 1 << 1;
        /// An ordinary file carrying content.
        const ARCHIVE = 1 << 2;
    }
}

bitflags! {
    /// Capabilities reported in volume information.
    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    pub struct VolumeFeatures: u32 {
        /// Stored names keep the case they were created with.
        const CASE_PRESERVED_NAMES = 1 << 0;
        /// Name search distinguishes case.
        const CASE_SENSITIVE_SEARCH = 1 << 1;
        /// Names are unicode on disk.
        const UNICODE_ON_DISK = 1 << 2;
    }
}

/// One entry as reported to the OS by get-info and enumeration callbacks.
#[derive(Clone, Debug, PartialEq)]
pub struct FileInfo {
    /// Leaf name of the entry; no separators.
    pub name: String,
    /// Attribute bits.
    pub attributes: FileAttributes,
    /// Content length in bytes; 0 for directories.
    pub size: u64,
    /// Last-modified instant (UTC).
    pub last_modified: SystemTime,
}

impl FileInfo {
    /// True iff the directory bit is set.
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }
}

/// Synthetic free-space figures for the volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiskSpace {
    /// Total bytes on the volume.
    pub total_bytes: u64,
    /// Bytes free on the volume.
    pub free_bytes: u64,
    /// Bytes available to the caller.
    pub available_bytes: u64,
}

/// Volume identity and capabilities.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeInfo {
    /// Volume label shown by the shell.
    pub label: String,
    /// Name of the filesystem implementation.
    pub filesystem_name: String,
    /// Longest accepted path component.
    pub max_component_length: u32,
    /// Capability bits.
    pub features: VolumeFeatures,
}

/// The immutable bundle describing one mount, provided by the surrounding
/// application. Credentials arrive already validated; the core never stores
/// them beyond handing them to the [`store::BlobStore`] constructor.
#[derive(Clone)]
pub struct MountConfig {
    /// Storage account name.
    pub account_name: String,
    /// Opaque credential material for the account.
    pub account_key: String,
    /// Container to expose as the volume root.
    pub container_name: String,
    /// Optional container-relative subfolder to mount instead of the root.
    pub subfolder: Option<String>,
    /// Mount point identifier (drive letter or path), owned by the shell.
    pub mount_point: String,
    /// Reject every write-path callback when set.
    pub read_only: bool,
}

impl fmt::Debug for MountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountConfig")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .field("container_name", &self.container_name)
            .field("subfolder", &self.subfolder)
            .field("mount_point", &self.mount_point)
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Tunables of one [`BlobFs`] instance.
#[derive(Clone, Debug)]
pub struct BlobFsOptions {
    /// Lifetime of metadata cache entries.
    pub cache_ttl: Duration,
    /// Handle content larger than this spills to a temp file.
    pub spill_threshold: u64,
    /// Directory for spill files; the system temp directory when `None`.
    pub spill_dir: Option<PathBuf>,
}

impl Default for BlobFsOptions {
    fn default() -> Self {
        BlobFsOptions {
            cache_ttl: DEFAULT_TTL,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            spill_dir: None,
        }
    }
}

/// The OS filesystem callback surface.
///
/// The kernel bridge owns a fixed vtable of callbacks and invokes them
/// concurrently from multiple worker threads; within one open handle the
/// callbacks are serialized. Every callback answers with a status from the
/// OS taxonomy — implementations must not panic across this boundary. The
/// per-handle context returned by [`open`](Self::open) is an opaque slot the
/// OS hands back to every subsequent callback on that handle.
///
/// Stub groups the volume does not support (locks, security descriptors,
/// alternate streams) come with defaults answering
/// [`Status::NotImplemented`], so an implementation only overrides what it
/// provides.
pub trait Filesystem: Send + Sync {
    /// The volume has been mounted. Failing here aborts the mount.
    fn mounted(&self) -> Result<(), Status>;

    /// The volume is being unmounted; in-flight callbacks complete naturally.
    fn unmounted(&self);

    /// Opens `path` and attaches a fresh per-handle context.
    fn open(
        &self,
        path: &str,
        mode: OpenMode,
        directory_hint: bool,
    ) -> Result<Arc<FileContext>, Status>;

    /// Last-chance work before the final close of a handle: pending deletes
    /// and the upload of modified content happen here. The OS has no channel
    /// for cleanup failures, so this callback is infallible and logs instead.
    fn cleanup(&self, context: &FileContext);

    /// Releases the per-handle context.
    fn close(&self, context: Arc<FileContext>);

    /// Reads up to `dst.len()` bytes at `offset`; returns the bytes read.
    fn read(&self, context: &FileContext, dst: &mut [u8], offset: u64) -> Result<usize, Status>;

    /// Writes `src` at `offset` (or at end-of-file, per `options`); returns
    /// the bytes written.
    fn write(
        &self,
        context: &FileContext,
        src: &[u8],
        offset: u64,
        options: WriteOptions,
    ) -> Result<usize, Status>;

    /// Flushes buffered state. Content reaches the store at cleanup, not
    /// here.
    fn flush(&self, context: &FileContext) -> Result<(), Status>;

    /// Attributes of the entry behind a handle.
    fn get_info(&self, context: &FileContext, path: &str) -> Result<FileInfo, Status>;

    /// Enumerates the immediate children of a directory.
    fn find_children(&self, path: &str) -> Result<Vec<FileInfo>, Status>;

    /// Enumerates the children whose names match a shell wildcard pattern.
    fn find_children_with_pattern(
        &self,
        path: &str,
        pattern: &str,
    ) -> Result<Vec<FileInfo>, Status> {
        let mut children = self.find_children(path)?;
        children.retain(|child| wildcard::matches(pattern, &child.name));
        Ok(children)
    }

    /// Applies attribute bits to the entry behind a handle.
    fn set_attributes(
        &self,
        context: &FileContext,
        attributes: FileAttributes,
    ) -> Result<(), Status>;

    /// Applies timestamps to the entry behind a handle.
    fn set_times(
        &self,
        context: &FileContext,
        creation: Option<SystemTime>,
        last_access: Option<SystemTime>,
        last_write: Option<SystemTime>,
    ) -> Result<(), Status>;

    /// Validates that the file behind a handle can be deleted and records the
    /// intent; the deletion itself happens at cleanup, because the OS may
    /// still cancel it (`delete_pending` false).
    fn delete_file(
        &self,
        context: &FileContext,
        path: &str,
        delete_pending: bool,
    ) -> Result<(), Status>;

    /// Validates that the directory behind a handle can be deleted and
    /// records the intent; the recursive deletion happens at cleanup.
    fn delete_directory(
        &self,
        context: &FileContext,
        path: &str,
        delete_pending: bool,
    ) -> Result<(), Status>;

    /// Moves a file or directory subtree to a new path.
    fn rename(
        &self,
        context: &FileContext,
        old_path: &str,
        new_path: &str,
        replace: bool,
    ) -> Result<(), Status>;

    /// Truncates or extends the logical file length.
    fn set_end_of_file(&self, context: &FileContext, length: u64) -> Result<(), Status>;

    /// Allocation-size hint from the OS: pre-size the buffer, never the
    /// logical length.
    fn set_allocation_size(&self, context: &FileContext, size: u64) -> Result<(), Status>;

    /// Byte-range locks. The backing store offers none.
    fn lock(&self, _context: &FileContext, offset: u64, length: u64) -> Result<(), Status> {
        warn!("[Not Implemented] lock(offset: {offset}, length: {length})");
        Err(Status::NotImplemented)
    }

    /// Releases a byte-range lock. The backing store offers none.
    fn unlock(&self, _context: &FileContext, offset: u64, length: u64) -> Result<(), Status> {
        warn!("[Not Implemented] unlock(offset: {offset}, length: {length})");
        Err(Status::NotImplemented)
    }

    /// Free-space figures for the volume.
    fn get_disk_free_space(&self) -> Result<DiskSpace, Status>;

    /// Volume identity and capabilities.
    fn get_volume_info(&self) -> Result<VolumeInfo, Status>;

    /// Security descriptor of the entry behind a handle.
    fn get_security(&self, _context: &FileContext) -> Result<Vec<u8>, Status> {
        warn!("[Not Implemented] get_security()");
        Err(Status::NotImplemented)
    }

    /// Replaces the security descriptor of the entry behind a handle.
    fn set_security(&self, _context: &FileContext, _descriptor: &[u8]) -> Result<(), Status> {
        warn!("[Not Implemented] set_security()");
        Err(Status::NotImplemented)
    }

    /// Alternate data streams of the entry behind a handle.
    fn find_streams(&self, _context: &FileContext) -> Result<Vec<FileInfo>, Status> {
        warn!("[Not Implemented] find_streams()");
        Err(Status::NotImplemented)
    }
}

//! The filesystem adapter: [`Filesystem`] over a [`BlobStore`].
//!
//! Each callback runs on whatever kernel worker thread the OS picked and
//! blocks only that thread. Remote operations are asynchronous underneath; a
//! private runtime runs them to completion right at the callback boundary.
//! The adapter owns no state besides the per-mount metadata cache and the
//! per-handle contexts it hands out, so the callbacks are reentrant.

use std::future::Future;
use std::io;
use std::io::Read;
use std::sync::Arc;
use std::time::SystemTime;

use log::debug;
use log::error;
use tokio::io::AsyncReadExt;
use tokio::runtime::Runtime;

use crate::BlobFsOptions;
use crate::DiskSpace;
use crate::FileAttributes;
use crate::FileInfo;
use crate::Filesystem;
use crate::MAX_COMPONENT_LENGTH;
use crate::MountConfig;
use crate::OpenMode;
use crate::SYNTHETIC_VOLUME_BYTES;
use crate::VOLUME_FILESYSTEM_NAME;
use crate::VolumeFeatures;
use crate::VolumeInfo;
use crate::WriteOptions;
use crate::cache::MetadataCache;
use crate::content::FileContext;
use crate::content::SpillPolicy;
use crate::path_mapper::PathMapper;
use crate::path_mapper::is_root_path;
use crate::path_mapper::leaf_name;
use crate::path_mapper::parent_prefix;
use crate::status::Status;
use crate::store::BlobItemInfo;
use crate::store::BlobStore;
use crate::store::ByteStream;

/// Adapter between the OS callback surface and a [`BlobStore`].
pub struct BlobFs {
    store: Arc<dyn BlobStore>,
    cache: MetadataCache,
    mapper: PathMapper,
    config: MountConfig,
    spill: SpillPolicy,
    /// Runs remote futures to completion on the calling OS worker thread.
    runtime: Runtime,
}

impl std::fmt::Debug for BlobFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobFs")
            .field("config", &self.config)
            .field("mapper", &self.mapper)
            .field("spill", &self.spill)
            .finish_non_exhaustive()
    }
}

impl BlobFs {
    /// Creates an adapter with default options.
    pub fn new(store: Arc<dyn BlobStore>, config: MountConfig) -> io::Result<Self> {
        Self::with_options(store, config, BlobFsOptions::default())
    }

    /// Creates an adapter with explicit cache and spill tunables.
    pub fn with_options(
        store: Arc<dyn BlobStore>,
        config: MountConfig,
        options: BlobFsOptions,
    ) -> io::Result<Self> {
        let spill_dir = match options.spill_dir {
            Some(dir) => dir,
            None => std::env::temp_dir().join(format!("blobfs-{}", mount_tag(&config.mount_point))),
        };
        std::fs::create_dir_all(&spill_dir)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        Ok(BlobFs {
            store,
            cache: MetadataCache::new(options.cache_ttl),
            mapper: PathMapper::new(config.subfolder.as_deref()),
            config,
            spill: SpillPolicy {
                threshold: options.spill_threshold,
                dir: spill_dir,
            },
            runtime,
        })
    }

    /// The path mapper of this mount.
    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Properties of `key`, from the cache when alive, from the store
    /// otherwise. `None` means no blob exists under exactly this key.
    fn lookup_info(&self, key: &str) -> Result<Option<BlobItemInfo>, Status> {
        if let Some(info) = self.cache.get_item(key) {
            return Ok(Some(info));
        }
        let info = self.block_on(self.store.get_properties(key))?;
        if let Some(info) = &info {
            self.cache.set_item(key, info.clone());
        }
        Ok(info)
    }

    /// True iff at least one blob lives under `key` as a prefix, which makes
    /// the path a synthesized directory.
    fn is_synthesized_directory(&self, key: &str) -> Result<bool, Status> {
        let prefix = format!("{key}/");
        let entries = self.block_on(self.store.list_by_hierarchy(&prefix))?;
        if entries.is_empty() {
            return Ok(false);
        }
        self.cache.upsert_items(&entries);
        self.cache.set_listing(prefix, entries);
        Ok(true)
    }

    /// Downloads the blob behind `context` into its buffer.
    fn hydrate(&self, context: &FileContext) -> Result<(), Status> {
        let key = context.blob_path();
        let size = self.lookup_info(key)?.map(|info| info.size).unwrap_or(0);
        let stream = self.block_on(self.store.download(key))?;
        let mut reader = BlockingReader {
            runtime: &self.runtime,
            stream,
        };
        context
            .load(&mut reader, size, &self.spill)
            .map_err(|err| internal(key, "loading content", &err))
    }

    /// Makes sure a writable buffer exists: the remote content when the blob
    /// exists, an empty buffer otherwise.
    fn ensure_writable(&self, context: &FileContext) -> Result<(), Status> {
        if context.is_loaded() {
            return Ok(());
        }
        if self.block_on(self.store.exists(context.blob_path()))? {
            self.hydrate(context)
        } else {
            context.initialize_empty();
            Ok(())
        }
    }

    fn file_info_from_item(&self, info: &BlobItemInfo) -> FileInfo {
        let mut attributes = if info.is_directory() {
            FileAttributes::DIRECTORY
        } else {
            FileAttributes::ARCHIVE
        };
        if self.config.read_only {
            attributes |= FileAttributes::READ_ONLY;
        }
        FileInfo {
            name: info.name.clone(),
            attributes,
            size: info.size,
            last_modified: info.last_modified,
        }
    }

    fn directory_info(&self, name: &str) -> FileInfo {
        let mut attributes = FileAttributes::DIRECTORY;
        if self.config.read_only {
            attributes |= FileAttributes::READ_ONLY;
        }
        FileInfo {
            name: name.to_owned(),
            attributes,
            size: 0,
            last_modified: SystemTime::now(),
        }
    }

    /// Invalidation discipline after a single-key mutation: the item itself
    /// and its immediate parent prefix.
    fn invalidate_key(&self, key: &str) {
        self.cache.invalidate_item(key);
        self.cache.invalidate_prefix(parent_prefix(key));
    }

    /// Invalidation discipline after a subtree mutation.
    fn invalidate_subtree(&self, prefix: &str) {
        self.cache.invalidate_prefix(prefix);
        self.cache.invalidate_prefix(parent_prefix(prefix));
    }

    fn reject_read_only(&self) -> Result<(), Status> {
        if self.config.read_only {
            Err(Status::AccessDenied)
        } else {
            Ok(())
        }
    }

    fn cleanup_delete_directory(&self, context: &FileContext) {
        let mut prefix = context.blob_path().to_owned();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        let keys = match self.block_on(self.store.list_all(&prefix)) {
            Ok(keys) => keys,
            Err(err) => {
                error!("cleanup: listing {prefix:?} for recursive delete failed: {err}");
                return;
            }
        };
        for key in keys {
            if let Err(err) = self.block_on(self.store.delete(&key)) {
                error!("cleanup: deleting {key:?} failed: {err}");
            }
        }
        self.invalidate_subtree(&prefix);
    }

    fn cleanup_delete_file(&self, context: &FileContext) {
        let key = context.blob_path();
        if let Err(err) = self.block_on(self.store.delete(key)) {
            error!("cleanup: deleting {key:?} failed: {err}");
        }
        self.invalidate_key(key);
    }

    fn cleanup_upload(&self, context: &FileContext) {
        let key = context.blob_path();
        let (stream, length) = match context.read_stream() {
            Ok(pair) => pair,
            Err(err) => {
                error!("cleanup: reading back buffer of {key:?} failed: {err}");
                return;
            }
        };
        debug!("cleanup: uploading {length} bytes to {key:?}");
        if let Err(err) = self.block_on(self.store.upload(key, stream, length, true)) {
            // The OS has no channel for close-time failures; the edit is
            // lost once the handle goes away. See the crate documentation.
            error!("cleanup: uploading {key:?} failed: {err}");
            return;
        }
        self.invalidate_key(key);
    }
}

impl Filesystem for BlobFs {
    fn mounted(&self) -> Result<(), Status> {
        debug!("mounted() called for container {:?}", self.config.container_name);
        self.block_on(self.store.probe())?;
        Ok(())
    }

    fn unmounted(&self) {
        debug!("unmounted() called");
        self.cache.clear();
    }

    fn open(
        &self,
        path: &str,
        mode: OpenMode,
        directory_hint: bool,
    ) -> Result<Arc<FileContext>, Status> {
        debug!("open() called for {path:?} mode {mode:?} directory_hint {directory_hint}");
        if is_root_path(path) {
            return Ok(Arc::new(FileContext::root()));
        }
        let key = self.mapper.to_blob_path(path);

        if directory_hint {
            // Directories are synthetic, so creating one is a no-op; only a
            // read-only mount has anything to refuse.
            if mode == OpenMode::CreateNew && self.config.read_only {
                return Err(Status::AccessDenied);
            }
            return Ok(Arc::new(FileContext::directory(key)));
        }

        let info = self.lookup_info(&key)?;
        if let Some(info) = &info {
            if info.is_directory() {
                return Ok(Arc::new(FileContext::directory(key)));
            }
        } else if self.is_synthesized_directory(&key)? {
            return Ok(Arc::new(FileContext::directory(key)));
        }

        let exists = info.is_some();
        let read_only = self.config.read_only;
        match mode {
            OpenMode::Open => {
                if !exists {
                    return Err(Status::FileNotFound);
                }
            }
            OpenMode::CreateNew => {
                if read_only {
                    return Err(Status::AccessDenied);
                }
                if exists {
                    return Err(Status::FileExists);
                }
            }
            OpenMode::Create => {
                if read_only {
                    return Err(Status::AccessDenied);
                }
            }
            OpenMode::OpenOrCreate => {
                if read_only && !exists {
                    return Err(Status::AccessDenied);
                }
            }
            OpenMode::Truncate => {
                if !exists {
                    return Err(Status::FileNotFound);
                }
                if read_only {
                    return Err(Status::AccessDenied);
                }
            }
            OpenMode::Append => {
                if read_only {
                    return Err(Status::AccessDenied);
                }
            }
        }

        let context = FileContext::file(key);
        if (!exists && mode.creates()) || (exists && mode.truncates()) {
            context.initialize_empty();
            context.mark_dirty();
        }
        Ok(Arc::new(context))
    }

    fn cleanup(&self, context: &FileContext) {
        debug!(
            "cleanup() called for {:?} delete_pending {} dirty {}",
            context.blob_path(),
            context.delete_pending(),
            context.is_dirty()
        );
        if context.delete_pending() && context.is_directory() && !context.is_root() {
            self.cleanup_delete_directory(context);
        } else if context.delete_pending() && !context.is_directory() {
            self.cleanup_delete_file(context);
        } else if context.is_dirty()
            && !context.is_directory()
            && !self.config.read_only
            && !context.blob_path().is_empty()
        {
            self.cleanup_upload(context);
        }
    }

    fn close(&self, context: Arc<FileContext>) {
        debug!("close() called for {:?}", context.blob_path());
        context.dispose();
    }

    fn read(&self, context: &FileContext, dst: &mut [u8], offset: u64) -> Result<usize, Status> {
        debug!(
            "read() called for {:?} offset {offset} size {}",
            context.blob_path(),
            dst.len()
        );
        if context.is_directory() {
            return Err(Status::AccessDenied);
        }
        if context.is_disposed() {
            return Err(Status::InvalidHandle);
        }
        if !context.is_loaded() {
            self.hydrate(context)?;
        }
        context
            .read(dst, offset)
            .map_err(|err| internal(context.blob_path(), "reading buffer", &err))
    }

    fn write(
        &self,
        context: &FileContext,
        src: &[u8],
        offset: u64,
        options: WriteOptions,
    ) -> Result<usize, Status> {
        debug!(
            "write() called for {:?} offset {offset} size {} append {}",
            context.blob_path(),
            src.len(),
            options.append_to_end
        );
        self.reject_read_only()?;
        if context.is_directory() {
            return Err(Status::AccessDenied);
        }
        if context.is_disposed() {
            return Err(Status::InvalidHandle);
        }
        self.ensure_writable(context)?;
        let offset = if options.append_to_end {
            context.length()
        } else {
            offset
        };
        context
            .write(src, offset)
            .map_err(|err| internal(context.blob_path(), "writing buffer", &err))
    }

    fn flush(&self, context: &FileContext) -> Result<(), Status> {
        // Content reaches the store at cleanup; flushing mid-handle would
        // upload a half-edited object.
        debug!("flush() called for {:?}", context.blob_path());
        Ok(())
    }

    fn get_info(&self, context: &FileContext, path: &str) -> Result<FileInfo, Status> {
        debug!("get_info() called for {path:?}");
        if context.is_root() {
            return Ok(self.directory_info(""));
        }
        if context.is_directory() {
            return Ok(self.directory_info(leaf_name(context.blob_path())));
        }
        let key = context.blob_path();
        if context.is_loaded() {
            // The handle is being edited; the buffer beats whatever the
            // store still reports.
            let last_modified = self
                .cache
                .get_item(key)
                .map(|info| info.last_modified)
                .unwrap_or_else(SystemTime::now);
            let mut attributes = FileAttributes::ARCHIVE;
            if self.config.read_only {
                attributes |= FileAttributes::READ_ONLY;
            }
            return Ok(FileInfo {
                name: leaf_name(key).to_owned(),
                attributes,
                size: context.length(),
                last_modified,
            });
        }
        if let Some(info) = self.lookup_info(key)? {
            return Ok(self.file_info_from_item(&info));
        }
        if self.is_synthesized_directory(key)? {
            return Ok(self.directory_info(leaf_name(key)));
        }
        Err(Status::FileNotFound)
    }

    fn find_children(&self, path: &str) -> Result<Vec<FileInfo>, Status> {
        debug!("find_children() called for {path:?}");
        let prefix = self.mapper.list_prefix(path);
        if let Some(entries) = self.cache.get_listing(&prefix) {
            return Ok(entries.iter().map(|e| self.file_info_from_item(e)).collect());
        }
        let entries = self.block_on(self.store.list_by_hierarchy(&prefix))?;
        self.cache.upsert_items(&entries);
        let children = entries.iter().map(|e| self.file_info_from_item(e)).collect();
        self.cache.set_listing(prefix, entries);
        Ok(children)
    }

    fn set_attributes(
        &self,
        context: &FileContext,
        attributes: FileAttributes,
    ) -> Result<(), Status> {
        self.reject_read_only()?;
        // The store has nowhere to persist attribute bits. Accepting them
        // keeps shell copy flows working.
        debug!(
            "set_attributes() called for {:?} with {attributes:?}; not persisted",
            context.blob_path()
        );
        Ok(())
    }

    fn set_times(
        &self,
        context: &FileContext,
        _creation: Option<SystemTime>,
        _last_access: Option<SystemTime>,
        _last_write: Option<SystemTime>,
    ) -> Result<(), Status> {
        self.reject_read_only()?;
        // Timestamps are owned by the store and rewritten on upload.
        debug!("set_times() called for {:?}; not persisted", context.blob_path());
        Ok(())
    }

    fn delete_file(
        &self,
        context: &FileContext,
        path: &str,
        delete_pending: bool,
    ) -> Result<(), Status> {
        debug!("delete_file() called for {path:?} delete_pending {delete_pending}");
        self.reject_read_only()?;
        if context.is_directory() {
            return Err(Status::AccessDenied);
        }
        if !context.is_loaded() && self.lookup_info(context.blob_path())?.is_none() {
            return Err(Status::FileNotFound);
        }
        // Only the intent is recorded here; the OS may cancel before
        // cleanup, and cleanup is where the blob actually goes away.
        context.set_delete_pending(delete_pending);
        Ok(())
    }

    fn delete_directory(
        &self,
        context: &FileContext,
        path: &str,
        delete_pending: bool,
    ) -> Result<(), Status> {
        debug!("delete_directory() called for {path:?} delete_pending {delete_pending}");
        self.reject_read_only()?;
        if context.is_root() || !context.is_directory() {
            return Err(Status::AccessDenied);
        }
        context.set_delete_pending(delete_pending);
        Ok(())
    }

    fn rename(
        &self,
        context: &FileContext,
        old_path: &str,
        new_path: &str,
        replace: bool,
    ) -> Result<(), Status> {
        debug!("rename() called from {old_path:?} to {new_path:?} replace {replace}");
        self.reject_read_only()?;
        let old_key = self.mapper.to_blob_path(old_path);
        let new_key = self.mapper.to_blob_path(new_path);

        if context.is_directory() {
            let old_prefix = format!("{old_key}/");
            let new_prefix = format!("{new_key}/");
            let keys = self.block_on(self.store.list_all(&old_prefix))?;
            // Copy-then-delete per key; the pair is not atomic, and a failure
            // after a copy leaves the destination present.
            for key in keys {
                let target = format!("{new_prefix}{}", &key[old_prefix.len()..]);
                self.block_on(self.store.copy(&key, &target))?;
                self.block_on(self.store.delete(&key))?;
            }
            self.invalidate_subtree(&old_prefix);
            self.invalidate_subtree(&new_prefix);
            return Ok(());
        }

        if !replace && self.block_on(self.store.exists(&new_key))? {
            return Err(Status::FileExists);
        }
        self.block_on(self.store.copy(&old_key, &new_key))?;
        self.block_on(self.store.delete(&old_key))?;
        self.invalidate_key(&old_key);
        self.invalidate_key(&new_key);
        Ok(())
    }

    fn set_end_of_file(&self, context: &FileContext, length: u64) -> Result<(), Status> {
        debug!(
            "set_end_of_file() called for {:?} length {length}",
            context.blob_path()
        );
        self.reject_read_only()?;
        if context.is_directory() {
            return Err(Status::AccessDenied);
        }
        if context.is_disposed() {
            return Err(Status::InvalidHandle);
        }
        self.ensure_writable(context)?;
        context
            .set_length(length)
            .map_err(|err| internal(context.blob_path(), "truncating buffer", &err))
    }

    fn set_allocation_size(&self, context: &FileContext, size: u64) -> Result<(), Status> {
        debug!(
            "set_allocation_size() called for {:?} size {size}",
            context.blob_path()
        );
        self.reject_read_only()?;
        if context.is_directory() {
            return Err(Status::AccessDenied);
        }
        if context.is_disposed() {
            return Err(Status::InvalidHandle);
        }
        self.ensure_writable(context)?;
        // An allocation hint pre-sizes the buffer; logical length and
        // dirtiness stay untouched.
        if size > context.length() {
            context
                .reserve(size)
                .map_err(|err| internal(context.blob_path(), "reserving buffer", &err))?;
        }
        Ok(())
    }

    fn get_disk_free_space(&self) -> Result<DiskSpace, Status> {
        Ok(DiskSpace {
            total_bytes: SYNTHETIC_VOLUME_BYTES,
            free_bytes: SYNTHETIC_VOLUME_BYTES,
            available_bytes: SYNTHETIC_VOLUME_BYTES,
        })
    }

    fn get_volume_info(&self) -> Result<VolumeInfo, Status> {
        Ok(VolumeInfo {
            label: format!("Azure:{}", self.config.container_name),
            filesystem_name: VOLUME_FILESYSTEM_NAME.to_owned(),
            max_component_length: MAX_COMPONENT_LENGTH,
            features: VolumeFeatures::CASE_PRESERVED_NAMES
                | VolumeFeatures::CASE_SENSITIVE_SEARCH
                | VolumeFeatures::UNICODE_ON_DISK,
        })
    }
}

/// Bridges an async download stream into the synchronous buffer loader,
/// blocking the calling OS worker thread one chunk at a time.
struct BlockingReader<'a> {
    runtime: &'a Runtime,
    stream: ByteStream,
}

impl Read for BlockingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.runtime.block_on(self.stream.read(buf))
    }
}

fn internal(key: &str, what: &str, err: &io::Error) -> Status {
    error!("{what} for {key:?} failed: {err}");
    Status::Internal
}

/// Filesystem-safe tag for the per-mount spill directory.
fn mount_tag(mount_point: &str) -> String {
    let tag: String = mount_point
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if tag.is_empty() { "volume".to_owned() } else { tag }
}

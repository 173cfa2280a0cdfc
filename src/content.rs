//! Per-open-handle content buffering.
//!
//! The store only offers whole-object reads and writes, so every open handle
//! that touches content owns a full local copy of it. Small objects live in
//! memory; objects above the spill threshold go to an anonymous temp file
//! that the OS reclaims even on abnormal termination. The buffer is guarded
//! by a per-context mutex: the OS serializes callbacks within one handle, but
//! nothing stops two handles from being driven concurrently.

use std::fmt;
use std::fs::File;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;

use crate::store::ByteStream;

/// Spill threshold applied when none is configured: 100 MiB.
pub const DEFAULT_SPILL_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Chunk size for draining a download into a spill file.
const COPY_CHUNK: usize = 1024 * 1024;

/// Where and when handle content spills to disk.
#[derive(Debug, Clone)]
pub struct SpillPolicy {
    /// Content strictly larger than this many bytes goes to a spill file.
    pub threshold: u64,
    /// Directory holding the spill files of this mount.
    pub dir: PathBuf,
}

impl Default for SpillPolicy {
    fn default() -> Self {
        SpillPolicy {
            threshold: DEFAULT_SPILL_THRESHOLD,
            dir: std::env::temp_dir(),
        }
    }
}

enum ContentBuffer {
    Memory(Vec<u8>),
    Spilled(File),
}

impl ContentBuffer {
    fn underlying_len(&self) -> io::Result<u64> {
        match self {
            ContentBuffer::Memory(data) => Ok(data.len() as u64),
            ContentBuffer::Spilled(file) => Ok(file.metadata()?.len()),
        }
    }
}

impl fmt::Debug for ContentBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentBuffer::Memory(data) => write!(f, "Memory({} bytes)", data.len()),
            ContentBuffer::Spilled(_) => write!(f, "Spilled"),
        }
    }
}

#[derive(Debug)]
struct ContentState {
    buffer: Option<ContentBuffer>,
    /// Logical end-of-file as perceived by writers. The underlying buffer may
    /// be longer after an allocation hint.
    length: u64,
    dirty: bool,
    disposed: bool,
}

/// The adapter-owned context attached to one open OS handle.
///
/// Directory contexts never carry a buffer; file contexts start unloaded and
/// hydrate lazily on the first read or write.
#[derive(Debug)]
pub struct FileContext {
    blob_path: String,
    is_directory: bool,
    delete_pending: AtomicBool,
    state: Mutex<ContentState>,
}

impl FileContext {
    fn new(blob_path: String, is_directory: bool) -> Self {
        FileContext {
            blob_path,
            is_directory,
            delete_pending: AtomicBool::new(false),
            state: Mutex::new(ContentState {
                buffer: None,
                length: 0,
                dirty: false,
                disposed: false,
            }),
        }
    }

    /// Context for the volume root.
    pub fn root() -> Self {
        Self::new(String::new(), true)
    }

    /// Context for a file handle addressing `blob_path`.
    pub fn file(blob_path: impl Into<String>) -> Self {
        Self::new(blob_path.into(), false)
    }

    /// Context for a directory handle addressing the subtree at `blob_path`.
    pub fn directory(blob_path: impl Into<String>) -> Self {
        Self::new(blob_path.into(), true)
    }

    /// The blob key this handle addresses; empty for the root.
    pub fn blob_path(&self) -> &str {
        &self.blob_path
    }

    /// True iff this handle addresses a directory (synthetic or root).
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// True iff this is the volume root.
    pub fn is_root(&self) -> bool {
        self.is_directory && self.blob_path.is_empty()
    }

    /// Whether the OS has marked this handle for deletion at cleanup.
    pub fn delete_pending(&self) -> bool {
        self.delete_pending.load(Ordering::Acquire)
    }

    /// Records or cancels the delete intent for this handle.
    pub fn set_delete_pending(&self, pending: bool) {
        self.delete_pending.store(pending, Ordering::Release);
    }

    /// True once content has been loaded or initialized for this handle.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().buffer.is_some()
    }

    /// True iff the buffer holds changes the store has not seen.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// True once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// True iff the content lives in a spill file rather than memory.
    pub fn is_spilled(&self) -> bool {
        matches!(self.state.lock().buffer, Some(ContentBuffer::Spilled(_)))
    }

    /// Logical content length; 0 while unloaded.
    pub fn length(&self) -> u64 {
        self.state.lock().length
    }

    /// Marks the buffered content as diverged from the store.
    pub fn mark_dirty(&self) {
        self.state.lock().dirty = true;
    }

    /// Installs an empty in-memory buffer. Used for newly created and
    /// truncated-at-open files.
    pub fn initialize_empty(&self) {
        let mut state = self.state.lock();
        state.buffer = Some(ContentBuffer::Memory(Vec::new()));
        state.length = 0;
    }

    /// Populates the buffer from `source`, choosing memory or a spill file by
    /// `size`. The logical length is reset to the bytes actually copied, which
    /// wins over `size` if the two disagree.
    pub fn load(&self, source: &mut dyn Read, size: u64, policy: &SpillPolicy) -> io::Result<()> {
        let (buffer, copied) = if size > policy.threshold {
            let mut file = tempfile::tempfile_in(&policy.dir)?;
            let mut chunk = vec![0u8; COPY_CHUNK];
            let mut copied = 0u64;
            loop {
                let n = source.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                file.write_all(&chunk[..n])?;
                copied += n as u64;
            }
            (ContentBuffer::Spilled(file), copied)
        } else {
            let mut data = Vec::with_capacity(size as usize);
            source.read_to_end(&mut data)?;
            let copied = data.len() as u64;
            (ContentBuffer::Memory(data), copied)
        };
        let mut state = self.state.lock();
        state.buffer = Some(buffer);
        state.length = copied;
        state.dirty = false;
        Ok(())
    }

    /// Reads up to `dst.len()` bytes at `offset`. Reads past the logical end
    /// return 0.
    pub fn read(&self, dst: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut state = self.state.lock();
        let length = state.length;
        let available = length.saturating_sub(offset);
        let wanted = (dst.len() as u64).min(available) as usize;
        if wanted == 0 {
            return Ok(0);
        }
        match state.buffer.as_mut() {
            Some(ContentBuffer::Memory(data)) => {
                let start = offset as usize;
                let end = (start + wanted).min(data.len());
                if end <= start {
                    return Ok(0);
                }
                let n = end - start;
                dst[..n].copy_from_slice(&data[start..end]);
                Ok(n)
            }
            Some(ContentBuffer::Spilled(file)) => {
                file.seek(SeekFrom::Start(offset))?;
                let mut filled = 0;
                while filled < wanted {
                    let n = file.read(&mut dst[filled..wanted])?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                Ok(filled)
            }
            None => Err(not_loaded()),
        }
    }

    /// Writes `src` at `offset`, extending the logical length to cover it,
    /// and marks the content dirty.
    pub fn write(&self, src: &[u8], offset: u64) -> io::Result<usize> {
        let mut state = self.state.lock();
        match state.buffer.as_mut() {
            Some(ContentBuffer::Memory(data)) => {
                let end = offset as usize + src.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[offset as usize..end].copy_from_slice(src);
            }
            Some(ContentBuffer::Spilled(file)) => {
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(src)?;
            }
            None => return Err(not_loaded()),
        }
        state.length = state.length.max(offset + src.len() as u64);
        state.dirty = true;
        Ok(src.len())
    }

    /// Hard truncate: both the underlying buffer and the logical length
    /// become `n`, and the content is dirty.
    pub fn set_length(&self, n: u64) -> io::Result<()> {
        let mut state = self.state.lock();
        match state.buffer.as_mut() {
            Some(ContentBuffer::Memory(data)) => data.resize(n as usize, 0),
            Some(ContentBuffer::Spilled(file)) => file.set_len(n)?,
            None => return Err(not_loaded()),
        }
        state.length = n;
        state.dirty = true;
        Ok(())
    }

    /// Grows the underlying buffer to at least `n` bytes without touching the
    /// logical length or the dirty flag. Allocation-size hints from the OS
    /// land here; they are not truncations.
    pub fn reserve(&self, n: u64) -> io::Result<()> {
        let mut state = self.state.lock();
        match state.buffer.as_mut() {
            Some(buffer) => {
                if buffer.underlying_len()? < n {
                    match buffer {
                        ContentBuffer::Memory(data) => data.resize(n as usize, 0),
                        ContentBuffer::Spilled(file) => file.set_len(n)?,
                    }
                }
                Ok(())
            }
            None => Err(not_loaded()),
        }
    }

    /// A fresh read cursor over the logical content, positioned at 0, plus
    /// the number of bytes it will yield. This is what gets uploaded.
    pub fn read_stream(&self) -> io::Result<(ByteStream, u64)> {
        let state = self.state.lock();
        let length = state.length;
        match state.buffer.as_ref() {
            Some(ContentBuffer::Memory(data)) => {
                let end = (length as usize).min(data.len());
                let stream: ByteStream = Box::pin(io::Cursor::new(data[..end].to_vec()));
                Ok((stream, end as u64))
            }
            Some(ContentBuffer::Spilled(file)) => {
                let mut clone = file.try_clone()?;
                clone.seek(SeekFrom::Start(0))?;
                let stream: ByteStream =
                    Box::pin(tokio::fs::File::from_std(clone).take(length));
                Ok((stream, length))
            }
            None => Err(not_loaded()),
        }
    }

    /// Releases the buffer. The spill file, if any, is reclaimed by the OS
    /// once the handle drops.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        state.buffer = None;
        state.disposed = true;
    }
}

fn not_loaded() -> io::Error {
    io::Error::other("content buffer is not loaded")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(threshold: u64) -> SpillPolicy {
        SpillPolicy {
            threshold,
            dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn partitioned_writes_round_trip() {
        let context = FileContext::file("a.txt");
        context.initialize_empty();
        let content = b"the quick brown fox jumps over the lazy dog";
        for (offset, chunk) in [(0usize, &content[..9]), (9, &content[9..20]), (20, &content[20..])]
        {
            context.write(chunk, offset as u64).unwrap();
        }
        let mut readback = vec![0u8; content.len()];
        let n = context.read(&mut readback, 0).unwrap();
        assert_eq!(n, content.len());
        assert_eq!(&readback, content);
        assert!(context.is_dirty());
    }

    #[test]
    fn reads_past_end_return_zero() {
        let context = FileContext::file("a.txt");
        context.initialize_empty();
        context.write(b"hello", 0).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(context.read(&mut buf, 5).unwrap(), 0);
        assert_eq!(context.read(&mut buf, 100).unwrap(), 0);
    }

    #[test]
    fn set_length_truncates_hard() {
        let context = FileContext::file("a.txt");
        context.initialize_empty();
        context.write(b"hello world", 0).unwrap();
        context.set_length(5).unwrap();
        assert_eq!(context.length(), 5);
        let mut buf = [0u8; 16];
        assert_eq!(context.read(&mut buf, 5).unwrap(), 0);
        assert_eq!(context.read(&mut buf, 0).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn reserve_leaves_length_and_dirtiness_alone() {
        let context = FileContext::file("a.txt");
        context.initialize_empty();
        context.write(b"abc", 0).unwrap();
        let dirty_before = context.is_dirty();
        context.reserve(1024).unwrap();
        assert_eq!(context.length(), 3);
        assert_eq!(context.is_dirty(), dirty_before);
        // The reserved tail is invisible to readers.
        let mut buf = [0u8; 16];
        assert_eq!(context.read(&mut buf, 3).unwrap(), 0);
    }

    #[test]
    fn load_small_stays_in_memory() {
        let context = FileContext::file("a.txt");
        let mut source: &[u8] = b"hello";
        context.load(&mut source, 5, &policy(1024)).unwrap();
        assert!(!context.is_spilled());
        assert_eq!(context.length(), 5);
        assert!(!context.is_dirty());
    }

    #[test]
    fn load_large_spills_to_disk() {
        let context = FileContext::file("big.bin");
        let content: Vec<u8> = (0..4096u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut source: &[u8] = &content;
        context
            .load(&mut source, content.len() as u64, &policy(1024))
            .unwrap();
        assert!(context.is_spilled());
        assert_eq!(context.length(), content.len() as u64);
        let mut buf = [0u8; 8];
        let offset = 2048 * 4;
        assert_eq!(context.read(&mut buf, offset).unwrap(), 8);
        assert_eq!(&buf[..4], &2048u32.to_le_bytes());
    }

    #[test]
    fn spilled_writes_round_trip() {
        let context = FileContext::file("big.bin");
        let mut source: &[u8] = &[0u8; 2048];
        context.load(&mut source, 2048, &policy(1024)).unwrap();
        context.write(b"mark", 1500).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(context.read(&mut buf, 1500).unwrap(), 4);
        assert_eq!(&buf, b"mark");
        assert!(context.is_dirty());
    }

    #[tokio::test]
    async fn read_stream_caps_at_logical_length() {
        let context = FileContext::file("a.txt");
        context.initialize_empty();
        context.write(b"payload", 0).unwrap();
        context.reserve(64).unwrap();
        let (mut stream, len) = context.read_stream().unwrap();
        assert_eq!(len, 7);
        let mut uploaded = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut uploaded)
            .await
            .unwrap();
        assert_eq!(uploaded, b"payload");
    }

    #[test]
    fn dispose_releases_the_buffer() {
        let context = FileContext::file("a.txt");
        context.initialize_empty();
        context.dispose();
        assert!(context.is_disposed());
        assert!(!context.is_loaded());
    }
}

//! Filesystem byte sources for `h5chunk-format`.
//!
//! [`FileSource`] performs positioned async reads through tokio;
//! [`MmapSource`] maps the whole file and copies ranges out of the mapping.

use std::fs;
use std::io::{self, SeekFrom};
use std::path::Path;

use h5chunk_format::source::{slice_range, ByteSource};
use memmap2::Mmap;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Async file-backed source.
///
/// Reads seek and fill under a lock, so one source may be shared by
/// concurrent tree builds.
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<tokio::fs::File>,
    len: u64,
}

impl FileSource {
    /// Open `path` for reading.
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let len = file.metadata().await?.len();
        debug!(path = %path.as_ref().display(), len, "opened file source");
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let end = offset.checked_add(len as u64);
        if end.is_none_or(|end| end > self.len) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read: {len} bytes at offset {offset}, file holds {} bytes", self.len),
            ));
        }
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;
        trace!(offset, len, "file read");
        Ok(buf)
    }

    async fn len(&self) -> io::Result<u64> {
        Ok(self.len)
    }
}

/// Read-only memory-mapped source.
#[derive(Debug)]
pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    /// Map `path` into memory.
    ///
    /// The file must not be modified by another process while mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = fs::File::open(path.as_ref())?;
        // SAFETY: read-only mapping; callers keep the file unmodified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };
        debug!(path = %path.as_ref().display(), len = mmap.len(), "mapped file source");
        Ok(Self { mmap })
    }

    /// The whole mapping.
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }
}

impl ByteSource for MmapSource {
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        slice_range(&self.mmap, offset, len).map(<[u8]>::to_vec)
    }

    async fn len(&self) -> io::Result<u64> {
        Ok(self.mmap.len() as u64)
    }
}

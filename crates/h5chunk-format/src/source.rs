//! Random-access byte sources.
//!
//! Every read in this crate goes through [`ByteSource`], so the same tree
//! walking code serves local files, memory maps and ranged network reads.

use std::future::Future;
use std::io;
use std::sync::Arc;

/// Async random-access reads over a container's bytes.
pub trait ByteSource: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// A range that runs past the end of the source fails with
    /// [`io::ErrorKind::UnexpectedEof`].
    fn read_at(
        &self,
        offset: u64,
        len: usize,
    ) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Total length of the source in bytes.
    fn len(&self) -> impl Future<Output = io::Result<u64>> + Send;

    /// Returns true if the source holds no bytes.
    fn is_empty(&self) -> impl Future<Output = io::Result<bool>> + Send {
        async { Ok(self.len().await? == 0) }
    }
}

impl<S: ByteSource> ByteSource for &S {
    fn read_at(
        &self,
        offset: u64,
        len: usize,
    ) -> impl Future<Output = io::Result<Vec<u8>>> + Send {
        (**self).read_at(offset, len)
    }

    fn len(&self) -> impl Future<Output = io::Result<u64>> + Send {
        (**self).len()
    }
}

impl<S: ByteSource> ByteSource for Arc<S> {
    fn read_at(
        &self,
        offset: u64,
        len: usize,
    ) -> impl Future<Output = io::Result<Vec<u8>>> + Send {
        (**self).read_at(offset, len)
    }

    fn len(&self) -> impl Future<Output = io::Result<u64>> + Send {
        (**self).len()
    }
}

/// Slice `[offset, offset + len)` out of `data`, or report a short read.
pub fn slice_range(data: &[u8], offset: u64, len: usize) -> io::Result<&[u8]> {
    let start = usize::try_from(offset).map_err(|_| short_read(offset, len, data.len()))?;
    let end = start
        .checked_add(len)
        .ok_or_else(|| short_read(offset, len, data.len()))?;
    data.get(start..end)
        .ok_or_else(|| short_read(offset, len, data.len()))
}

fn short_read(offset: u64, len: usize, available: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("short read: {len} bytes at offset {offset}, source holds {available} bytes"),
    )
}

/// In-memory byte source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    /// Create a source from an owned byte vector.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Create a source by copying from a byte slice.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Access the underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume and return the underlying bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl ByteSource for MemorySource {
    async fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        slice_range(&self.data, offset, len).map(<[u8]>::to_vec)
    }

    async fn len(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }
}

//! Filter registry and chunk defiltering.
//!
//! Filters are looked up by numeric id. The built-in set covers zlib
//! deflate (behind the `deflate` feature), byte shuffle and Fletcher-32;
//! callers register anything else.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::error::{Error, Result};
use crate::filter_pipeline::{FilterPipeline, FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_SHUFFLE};

/// A decode-direction filter: `(bytes, item_size, client_data) -> bytes`.
pub type FilterFn = Arc<dyn Fn(&[u8], usize, &[u32]) -> core::result::Result<Vec<u8>, String> + Send + Sync>;

/// Filter functions keyed by filter id.
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<u16, FilterFn>,
}

impl FilterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// A registry holding the built-in filters.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "deflate")]
        registry.register(FILTER_DEFLATE, inflate);
        registry.register(FILTER_SHUFFLE, unshuffle);
        registry.register(FILTER_FLETCHER32, fletcher32_strip);
        registry
    }

    /// Register `filter` under `id`, replacing any previous entry.
    pub fn register<F>(&mut self, id: u16, filter: F) -> &mut Self
    where
        F: Fn(&[u8], usize, &[u32]) -> core::result::Result<Vec<u8>, String> + Send + Sync + 'static,
    {
        self.filters.insert(id, Arc::new(filter));
        self
    }

    pub fn get(&self, id: u16) -> Option<&FilterFn> {
        self.filters.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.filters.contains_key(&id)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.filters.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("FilterRegistry").field("ids", &ids).finish()
    }
}

/// Undo `pipeline` on one stored chunk.
///
/// Filters run last to first. Bit `i` of `filter_mask` marks filter `i` as
/// skipped when the chunk was written, so it is skipped here too.
pub fn filter_chunk(
    chunk: Vec<u8>,
    filter_mask: u32,
    pipeline: &FilterPipeline,
    item_size: usize,
    registry: &FilterRegistry,
) -> Result<Vec<u8>> {
    let mut data = chunk;
    for (index, entry) in pipeline.filters.iter().enumerate().rev() {
        let skipped = 1u32
            .checked_shl(index as u32)
            .is_some_and(|bit| filter_mask & bit != 0);
        if skipped {
            trace!(index, filter_id = entry.filter_id, "filter skipped by mask");
            continue;
        }
        let filter = registry
            .get(entry.filter_id)
            .ok_or(Error::UnsupportedFilter(entry.filter_id))?;
        data = filter(&data, item_size, &entry.client_data).map_err(|message| Error::Filter {
            id: entry.filter_id,
            message,
        })?;
        trace!(index, filter_id = entry.filter_id, len = data.len(), "applied filter");
    }
    Ok(data)
}

/// zlib inflate (filter 1).
#[cfg(feature = "deflate")]
pub fn inflate(data: &[u8], _item_size: usize, _client_data: &[u32]) -> core::result::Result<Vec<u8>, String> {
    use std::io::Read;
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| format!("deflate: {e}"))?;
    Ok(out)
}

/// Byte unshuffle (filter 2).
///
/// The element size comes from client data slot 0 when present, otherwise
/// from the dataset's item size.
pub fn unshuffle(data: &[u8], item_size: usize, client_data: &[u32]) -> core::result::Result<Vec<u8>, String> {
    let element_size = client_data
        .first()
        .map(|&v| v as usize)
        .unwrap_or(item_size);
    if element_size <= 1 {
        return Ok(data.to_vec());
    }
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for byte in 0..element_size {
        let plane = &data[byte * count..(byte + 1) * count];
        for (i, &b) in plane.iter().enumerate() {
            out[i * element_size + byte] = b;
        }
    }
    // a trailing partial element is stored unshuffled
    let tail = count * element_size;
    out[tail..].copy_from_slice(&data[tail..]);
    Ok(out)
}

/// Fletcher-32 over big-endian 16-bit words, odd trailing byte zero-padded.
pub fn fletcher32_checksum(data: &[u8]) -> u32 {
    // 360 words keeps the running sums inside u32 before reduction
    const BLOCK_BYTES: usize = 720;
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    for block in data.chunks(BLOCK_BYTES) {
        for word in block.chunks(2) {
            let hi = word[0] as u32;
            let lo = word.get(1).copied().unwrap_or(0) as u32;
            sum1 += (hi << 8) | lo;
            sum2 += sum1;
        }
        sum1 %= 65535;
        sum2 %= 65535;
    }
    (sum2 << 16) | sum1
}

/// Verify and strip a trailing Fletcher-32 checksum (filter 3).
pub fn fletcher32_strip(data: &[u8], _item_size: usize, _client_data: &[u32]) -> core::result::Result<Vec<u8>, String> {
    let Some(split) = data.len().checked_sub(4) else {
        return Err("fletcher32: data too short for checksum".to_string());
    };
    let (payload, stored) = data.split_at(split);
    let stored = LittleEndian::read_u32(stored);
    let computed = fletcher32_checksum(payload);
    if stored != computed {
        return Err(format!(
            "fletcher32: checksum mismatch, stored {stored:#010x}, computed {computed:#010x}"
        ));
    }
    Ok(payload.to_vec())
}

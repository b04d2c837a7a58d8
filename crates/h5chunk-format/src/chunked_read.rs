//! Chunked dataset reconstruction from a raw-data-chunk B-tree.
//!
//! Each chunk is fetched, defiltered and scattered into a dense row-major
//! output. Chunks on the upper edge may overhang the dataset; their
//! out-of-bounds elements are dropped.

use tracing::{debug, warn};

use crate::btree_v1::{BTreeV1RawDataChunks, ChunkKey};
use crate::codec::{ElementCodec, Value};
use crate::datatype::Datatype;
use crate::error::{FormatError, Result};
use crate::filter_pipeline::FilterPipeline;
use crate::filters::{filter_chunk, FilterRegistry};
use crate::source::ByteSource;

/// Options for chunk reconstruction.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Filters available for defiltering.
    pub registry: FilterRegistry,
    /// Reject unfiltered chunks whose declared size disagrees with their shape.
    pub strict_chunk_size: bool,
}

impl ReadOptions {
    pub fn with_registry(mut self, registry: FilterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_chunk_size = strict;
        self
    }
}

/// Row-major strides, last dimension fastest.
pub fn row_major_strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1].saturating_mul(shape[d + 1]);
    }
    strides
}

fn element_count(shape: &[u64]) -> Result<usize> {
    let total = shape.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d));
    total
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| FormatError::ShapeOverflow.into())
}

/// Geometry shared by every chunk of one reconstruction.
struct Scatter<'a> {
    chunk_shape: &'a [u64],
    data_shape: &'a [u64],
    data_strides: Vec<u64>,
    chunk_len: usize,
    codec: ElementCodec,
}

impl Scatter<'_> {
    /// Write every in-bounds element of `chunk` into `out`.
    fn scatter(
        &self,
        key: &ChunkKey,
        chunk: &[u8],
        out: &mut [Option<Value>],
    ) -> core::result::Result<(), FormatError> {
        let origin = key.spatial_offset();
        let rank = self.chunk_shape.len();
        let item_size = self.codec.item_size();
        let mut cpos = vec![0u64; rank];

        for ci in 0..self.chunk_len {
            let mut flat = 0u64;
            let mut in_bounds = true;
            for d in 0..rank {
                let a = origin[d].saturating_add(cpos[d]);
                if a >= self.data_shape[d] {
                    in_bounds = false;
                    break;
                }
                flat += a * self.data_strides[d];
            }
            if in_bounds {
                out[flat as usize] = Some(self.codec.decode(chunk, ci * item_size)?);
            }

            // odometer step over the chunk-local box
            let mut d = rank - 1;
            cpos[d] += 1;
            while d > 0 && cpos[d] >= self.chunk_shape[d] {
                cpos[d] = 0;
                d -= 1;
                cpos[d] += 1;
            }
        }
        Ok(())
    }
}

impl BTreeV1RawDataChunks {
    /// Assemble the dense row-major array of the dataset indexed by this tree.
    ///
    /// `chunk_shape` and `data_shape` are spatial (no trailing element-size
    /// dimension). Positions not covered by any chunk are `None`.
    pub async fn construct_data_from_chunks<S: ByteSource>(
        &self,
        source: &S,
        chunk_shape: &[u64],
        data_shape: &[u64],
        dtype: &Datatype,
        pipeline: Option<&FilterPipeline>,
        options: &ReadOptions,
    ) -> Result<Vec<Option<Value>>> {
        let codec = ElementCodec::for_datatype(dtype)?;
        let rank = data_shape.len();
        if rank == 0 || chunk_shape.len() != rank || self.dims() != rank + 1 {
            return Err(FormatError::RankMismatch {
                data_rank: rank,
                chunk_rank: chunk_shape.len(),
                key_dims: self.dims(),
            }
            .into());
        }

        let item_size = codec.item_size();
        let chunk_len = element_count(chunk_shape)?;
        let chunk_bytes = chunk_len.saturating_mul(item_size);
        let mut out: Vec<Option<Value>> = vec![None; element_count(data_shape)?];
        let scatter = Scatter {
            chunk_shape,
            data_shape,
            data_strides: row_major_strides(data_shape),
            chunk_len,
            codec,
        };

        for (key, address) in self.chunks() {
            let declared = key.chunk_size as usize;
            let chunk = match pipeline {
                None => {
                    if declared != chunk_bytes {
                        if options.strict_chunk_size {
                            return Err(FormatError::ChunkSizeMismatch {
                                expected: chunk_bytes,
                                declared,
                            }
                            .into());
                        }
                        warn!(address, declared, expected = chunk_bytes, "chunk size disagrees with chunk shape");
                    }
                    source.read_at(address, chunk_bytes).await?
                }
                Some(pipeline) => {
                    let stored = source.read_at(address, declared).await?;
                    filter_chunk(stored, key.filter_mask, pipeline, item_size, &options.registry)?
                }
            };
            debug!(address, offset = ?key.spatial_offset(), len = chunk.len(), "read chunk");
            scatter.scatter(key, &chunk, &mut out)?;
        }
        Ok(out)
    }
}

/// Read the raw-data-chunk tree at `btree_address` and reconstruct the dataset.
pub async fn read_chunked_dataset<S: ByteSource>(
    source: &S,
    btree_address: u64,
    chunk_shape: &[u64],
    data_shape: &[u64],
    dtype: &Datatype,
    pipeline: Option<&FilterPipeline>,
    options: &ReadOptions,
) -> Result<Vec<Option<Value>>> {
    let tree = BTreeV1RawDataChunks::new(source, btree_address, data_shape.len() + 1).await?;
    tree.construct_data_from_chunks(source, chunk_shape, data_shape, dtype, pipeline, options)
        .await
}

//! End-to-end reads over synthetic container images.

use std::io::Write;
use std::sync::Arc;

use h5chunk_format::filter_pipeline::{FILTER_DEFLATE, FILTER_SHUFFLE};
use h5chunk_format::{
    read_chunked_dataset, to_nested, BTreeV1Groups, BTreeV1RawDataChunks, BTreeV2GroupNames,
    ByteSource, Datatype, Error, FilterDescription, FilterPipeline, MemorySource, Nested,
    ReadOptions, Value,
};

struct Image(Vec<u8>);

impl Image {
    fn new() -> Self {
        Image(Vec::new())
    }

    fn put(&mut self, at: usize, bytes: &[u8]) -> &mut Self {
        if self.0.len() < at + bytes.len() {
            self.0.resize(at + bytes.len(), 0);
        }
        self.0[at..at + bytes.len()].copy_from_slice(bytes);
        self
    }

    fn source(&self) -> MemorySource {
        MemorySource::from_slice(&self.0)
    }
}

fn v1_header(node_type: u8, level: u8, entries: u16) -> Vec<u8> {
    let mut buf = b"TREE".to_vec();
    buf.push(node_type);
    buf.push(level);
    buf.extend_from_slice(&entries.to_le_bytes());
    buf.extend_from_slice(&u64::MAX.to_le_bytes());
    buf.extend_from_slice(&u64::MAX.to_le_bytes());
    buf
}

fn chunk_node(level: u8, entries: &[(u32, u32, &[u64], u64)]) -> Vec<u8> {
    let mut buf = v1_header(1, level, entries.len() as u16);
    for (size, mask, offsets, address) in entries {
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&mask.to_le_bytes());
        for o in *offsets {
            buf.extend_from_slice(&o.to_le_bytes());
        }
        buf.extend_from_slice(&address.to_le_bytes());
    }
    buf
}

fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    let count = data.len() / element_size;
    let mut out = vec![0u8; data.len()];
    for i in 0..count {
        for b in 0..element_size {
            out[b * count + i] = data[i * element_size + b];
        }
    }
    out
}

#[tokio::test]
async fn reads_3d_uint8_dataset_as_nested() {
    let mut image = Image::new();
    image
        .put(0x40, &chunk_node(0, &[(8, 0, &[0, 0, 0, 0], 0x400)]))
        .put(0x400, &[0, 1, 2, 3, 4, 5, 6, 7]);
    let source = image.source();

    let values = read_chunked_dataset(
        &source,
        0x40,
        &[2, 2, 2],
        &[2, 2, 2],
        &Datatype::uint(1),
        None,
        &ReadOptions::default(),
    )
    .await
    .unwrap();
    let flat: Vec<u64> = values.iter().map(|v| v.as_ref().unwrap().as_u64().unwrap()).collect();
    assert_eq!(flat, (0..8).collect::<Vec<_>>());

    let nested = to_nested(flat, &[2, 2, 2]);
    let outer = nested.as_list().unwrap();
    assert_eq!(outer.len(), 2);
    assert_eq!(
        outer[1].as_list().unwrap()[0],
        Nested::List(vec![Nested::Scalar(4), Nested::Scalar(5)])
    );
}

#[tokio::test]
async fn reads_boolean_enum_dataset() {
    let mut image = Image::new();
    image
        .put(0, &chunk_node(0, &[(4, 0, &[0, 0], 0x100)]))
        .put(0x100, &[0, 1, 1, 0]);
    let dtype = Datatype::Enumeration {
        base: Box::new(Datatype::int(1)),
    };

    let values = read_chunked_dataset(&image.source(), 0, &[4], &[4], &dtype, None, &ReadOptions::default())
        .await
        .unwrap();
    let values: Vec<Value> = values.into_iter().map(Option::unwrap).collect();
    assert_eq!(
        values,
        vec![Value::Signed(0), Value::Signed(1), Value::Signed(1), Value::Signed(0)]
    );
}

#[cfg(feature = "deflate")]
#[tokio::test]
async fn reads_shuffled_deflated_f64_grid() {
    // 4x4 f64 dataset in four 2x2 chunks, shuffle then deflate at write time
    let value = |r: u64, c: u64| (r * 4 + c) as f64 * 0.5;
    let mut image = Image::new();
    let mut entries = Vec::new();
    let origins = [[0u64, 0, 0], [0, 2, 0], [2, 0, 0], [2, 2, 0]];
    for (i, origin) in origins.iter().enumerate() {
        let mut raw = Vec::new();
        for r in 0..2 {
            for c in 0..2 {
                raw.extend_from_slice(&value(origin[0] + r, origin[1] + c).to_le_bytes());
            }
        }
        let stored = zlib(&shuffle(&raw, 8));
        let address = 0x1000 + 0x200 * i as u64;
        image.put(address as usize, &stored);
        entries.push((stored.len() as u32, 0, &origin[..], address));
    }
    image.put(0, &chunk_node(0, &entries));
    let pipeline = FilterPipeline::new(vec![
        FilterDescription::new(FILTER_SHUFFLE, vec![8]),
        FilterDescription::new(FILTER_DEFLATE, vec![6]),
    ]);

    let source = Arc::new(image.source());
    let tree = BTreeV1RawDataChunks::new(&source, 0, 3).await.unwrap();
    assert_eq!(tree.chunks().count(), 4);

    let values = tree
        .construct_data_from_chunks(&source, &[2, 2], &[4, 4], &Datatype::float(8), Some(&pipeline), &ReadOptions::default())
        .await
        .unwrap();
    for r in 0..4 {
        for c in 0..4 {
            assert_eq!(
                values[(r * 4 + c) as usize],
                Some(Value::Float(value(r, c))),
                "element ({r}, {c})"
            );
        }
    }
}

#[tokio::test]
async fn failed_reconstruction_returns_no_partial_output() {
    let mut image = Image::new();
    image
        .put(0, &chunk_node(0, &[(2, 0, &[0, 0], 0x100), (2, 0, &[2, 0], 0x200)]))
        .put(0x100, &[1, 2])
        .put(0x200, &[3, 4]);
    let pipeline = FilterPipeline::new(vec![FilterDescription::new(99, vec![])]);
    let result = read_chunked_dataset(
        &image.source(),
        0,
        &[2],
        &[4],
        &Datatype::uint(1),
        Some(&pipeline),
        &ReadOptions::default(),
    )
    .await;
    assert!(matches!(result, Err(Error::UnsupportedFilter(99))));
}

#[tokio::test]
async fn group_tree_lists_symbol_tables() {
    let mut image = Image::new();
    // root (level 1) -> two leaves, each pointing at two symbol table nodes
    let group_node = |level: u8, keys: &[u64], children: &[u64]| {
        let mut buf = v1_header(0, level, children.len() as u16);
        for (k, c) in keys.iter().zip(children) {
            buf.extend_from_slice(&k.to_le_bytes());
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf.extend_from_slice(&keys[children.len()].to_le_bytes());
        buf
    };
    image
        .put(0, &group_node(1, &[0, 8, 16], &[0x100, 0x200]))
        .put(0x100, &group_node(0, &[0, 4, 8], &[0x1000, 0x1100]))
        .put(0x200, &group_node(0, &[8, 12, 16], &[0x1200, 0x1300]));
    let source = image.source();

    let groups = BTreeV1Groups::new(&source, 0).await.unwrap();
    assert_eq!(groups.symbol_table_addresses(), vec![0x1000, 0x1100, 0x1200, 0x1300]);
    assert_eq!(groups.tree().node_count(), 3);
}

#[tokio::test]
async fn v2_name_index_records() {
    let mut image = Image::new();
    let mut header = b"BTHD".to_vec();
    header.push(0);
    header.push(5);
    header.extend_from_slice(&4096u32.to_le_bytes());
    header.extend_from_slice(&11u16.to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes());
    header.extend_from_slice(&[98, 40]);
    header.extend_from_slice(&0x200u64.to_le_bytes());
    header.extend_from_slice(&3u16.to_le_bytes());
    header.extend_from_slice(&3u64.to_le_bytes());

    let mut leaf = b"BTLF".to_vec();
    leaf.extend_from_slice(&[0, 5]);
    for (hash, id) in [(0x10u32, 1u8), (0x20, 2), (0x30, 3)] {
        leaf.extend_from_slice(&hash.to_le_bytes());
        leaf.extend_from_slice(&[id; 7]);
    }
    image.put(0, &header).put(0x200, &leaf);
    let source = image.source();
    assert!(!source.is_empty().await.unwrap());

    let tree = BTreeV2GroupNames::new(&source, 0).await.unwrap();
    let records: Vec<(u32, u8)> = tree.iter_records().map(|r| (r.name_hash, r.heap_id[0])).collect();
    assert_eq!(records, vec![(0x10, 1), (0x20, 2), (0x30, 3)]);
    assert_eq!(tree.header().total_nrecords, 3);
}

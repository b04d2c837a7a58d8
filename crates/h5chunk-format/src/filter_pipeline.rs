//! Filter pipeline message (versions 1 and 2).
//!
//! The pipeline lists filters in the order they were applied when chunks
//! were written; reading undoes them back to front.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;

/// One pipeline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    pub filter_id: u16,
    /// Optional name (always present for ids >= 256 in v1).
    pub name: Option<String>,
    /// Bit 0 set = optional filter.
    pub flags: u16,
    /// Parameters handed to the filter function.
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    /// An unnamed filter with the given client data.
    pub fn new(filter_id: u16, client_data: Vec<u32>) -> Self {
        Self {
            filter_id,
            name: None,
            flags: 0,
            client_data,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.flags & 1 != 0
    }
}

/// Ordered filters applied to every chunk of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipeline {
    pub version: u8,
    pub filters: Vec<FilterDescription>,
}

impl FilterPipeline {
    /// A version 2 pipeline over `filters`, in write order.
    pub fn new(filters: Vec<FilterDescription>) -> Self {
        Self {
            version: 2,
            filters,
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Parse the raw message body.
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        let mut cursor = Cursor { data, pos: 0 };
        let version = cursor.u8()?;
        let count = cursor.u8()? as usize;
        let filters = match version {
            1 => {
                cursor.skip(6)?; // reserved
                (0..count)
                    .map(|_| parse_v1_entry(&mut cursor))
                    .collect::<Result<Vec<_>, _>>()?
            }
            2 => (0..count)
                .map(|_| parse_v2_entry(&mut cursor))
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(FormatError::InvalidFilterPipelineVersion(other)),
        };
        Ok(Self { version, filters })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos.saturating_add(n);
        let slice = self.data.get(self.pos..end).ok_or(FormatError::UnexpectedEof {
            expected: end,
            available: self.data.len(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn name(&mut self, len: usize) -> Result<Option<String>, FormatError> {
        if len == 0 {
            return Ok(None);
        }
        let raw = self.take(len)?;
        let text = raw.split(|&b| b == 0).next().unwrap_or(raw);
        Ok(Some(String::from_utf8_lossy(text).into_owned()))
    }

    fn client_data(&mut self, n: usize) -> Result<Vec<u32>, FormatError> {
        let raw = self.take(n.saturating_mul(4))?;
        Ok(raw.chunks_exact(4).map(LittleEndian::read_u32).collect())
    }
}

fn parse_v1_entry(cursor: &mut Cursor<'_>) -> Result<FilterDescription, FormatError> {
    let filter_id = cursor.u16()?;
    let name_length = cursor.u16()? as usize;
    let flags = cursor.u16()?;
    let nvalues = cursor.u16()? as usize;
    let name = cursor.name(name_length)?;
    // names are padded to a multiple of eight
    cursor.skip(name_length.next_multiple_of(8) - name_length)?;
    let client_data = cursor.client_data(nvalues)?;
    if nvalues % 2 == 1 {
        cursor.skip(4)?;
    }
    Ok(FilterDescription {
        filter_id,
        name,
        flags,
        client_data,
    })
}

fn parse_v2_entry(cursor: &mut Cursor<'_>) -> Result<FilterDescription, FormatError> {
    let filter_id = cursor.u16()?;
    let name_length = if filter_id >= 256 {
        cursor.u16()? as usize
    } else {
        0
    };
    let flags = cursor.u16()?;
    let nvalues = cursor.u16()? as usize;
    let name = cursor.name(name_length)?;
    let client_data = cursor.client_data(nvalues)?;
    Ok(FilterDescription {
        filter_id,
        name,
        flags,
        client_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_entry(buf: &mut Vec<u8>, id: u16, name: &[u8], client: &[u32]) {
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&(client.len() as u16).to_le_bytes());
        buf.extend_from_slice(name);
        buf.resize(buf.len() + name.len().next_multiple_of(8) - name.len(), 0);
        for v in client {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        if client.len() % 2 == 1 {
            buf.extend_from_slice(&[0; 4]);
        }
    }

    #[test]
    fn v1_shuffle_then_deflate() {
        let mut buf = vec![1u8, 2, 0, 0, 0, 0, 0, 0];
        v1_entry(&mut buf, FILTER_SHUFFLE, b"shuffle\0", &[4]);
        v1_entry(&mut buf, FILTER_DEFLATE, b"", &[6]);

        let pipeline = FilterPipeline::parse(&buf).unwrap();
        assert_eq!(pipeline.version, 1);
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.filters[0].filter_id, FILTER_SHUFFLE);
        assert_eq!(pipeline.filters[0].name.as_deref(), Some("shuffle"));
        assert_eq!(pipeline.filters[0].client_data, vec![4]);
        assert_eq!(pipeline.filters[1], FilterDescription::new(FILTER_DEFLATE, vec![6]));
    }

    #[test]
    fn v2_with_named_custom_filter() {
        let mut buf = vec![2u8, 2];
        buf.extend_from_slice(&FILTER_DEFLATE.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&9u32.to_le_bytes());
        buf.extend_from_slice(&32000u16.to_le_bytes());
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(b"lzf\0");

        let pipeline = FilterPipeline::parse(&buf).unwrap();
        assert_eq!(pipeline.version, 2);
        assert_eq!(pipeline.filters[0].client_data, vec![9]);
        assert_eq!(pipeline.filters[1].filter_id, 32000);
        assert_eq!(pipeline.filters[1].name.as_deref(), Some("lzf"));
        assert!(pipeline.filters[1].is_optional());
    }

    #[test]
    fn bad_version() {
        assert_eq!(
            FilterPipeline::parse(&[3, 0]),
            Err(FormatError::InvalidFilterPipelineVersion(3))
        );
    }

    #[test]
    fn truncated_client_data() {
        let buf = [2u8, 1, 1, 0, 0, 0, 2, 0, 6, 0, 0, 0];
        assert!(matches!(
            FilterPipeline::parse(&buf),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}

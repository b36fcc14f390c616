//! Box header codec: decodes one box's fixed and extended header fields from
//! an absolute offset. The codec has no notion of a parent boundary; the
//! size==0 ("extends to end of containing region") convention is surfaced as
//! [`DeclaredSize::ToEnd`] and resolved by the caller.

use crate::boxes::FourCC;
use crate::reader::{RandomAccessReader, ReaderError};

pub const FIXED_HEADER_LEN: u64 = 8;
pub const EXTENDED_SIZE_LEN: u64 = 8;
pub const EXTENDED_TYPE_LEN: u64 = 16;

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("truncated header at offset {offset}: needed {expected} bytes, {available} available")]
    TruncatedHeader { offset: u64, expected: u64, available: u64 },
    #[error("invalid type code {code:02x?} at offset {offset}")]
    InvalidTypeCode { offset: u64, code: [u8; 4] },
    #[error("io: {0}")]
    Io(#[source] std::io::Error),
}

/// Total size as declared by the size field, before the caller resolves it
/// against the containing region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredSize {
    Bytes(u64),
    /// Size field was 0: the box extends to the end of the containing region.
    ToEnd,
}

/// Header fields as read from the wire, prior to range resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub typ: FourCC,
    pub uuid: Option<[u8; 16]>,
    pub size: DeclaredSize,
    pub header_size: u64,
}

/// Decode the header starting at `offset`.
///
/// Reads the minimal 8-byte size+type header, then the 8-byte extended size
/// when the size field is the sentinel `1`, then the 16-byte extended type
/// identifier when the type is `uuid`. Both error variants are recoverable by
/// the caller; only [`HeaderError::Io`] signals a device failure.
pub fn decode_header(
    reader: &dyn RandomAccessReader,
    offset: u64,
) -> Result<RawHeader, HeaderError> {
    let fixed = read_bytes(reader, offset, 8, offset, FIXED_HEADER_LEN)?;
    let size_field = u32::from_be_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]);
    let type_bytes = [fixed[4], fixed[5], fixed[6], fixed[7]];
    if !FourCC::is_printable(&type_bytes) {
        return Err(HeaderError::InvalidTypeCode { offset, code: type_bytes });
    }
    let typ = FourCC(type_bytes);

    let mut header_size = FIXED_HEADER_LEN;
    let mut cursor = offset + FIXED_HEADER_LEN;

    let size = match size_field {
        0 => DeclaredSize::ToEnd,
        1 => {
            let expected = header_size + EXTENDED_SIZE_LEN;
            let b = read_bytes(reader, cursor, 8, offset, expected)?;
            let large =
                u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
            header_size += EXTENDED_SIZE_LEN;
            cursor += EXTENDED_SIZE_LEN;
            DeclaredSize::Bytes(large)
        }
        n => DeclaredSize::Bytes(n as u64),
    };

    let uuid = if &typ.0 == b"uuid" {
        let expected = header_size + EXTENDED_TYPE_LEN;
        let bytes = read_bytes(reader, cursor, EXTENDED_TYPE_LEN as usize, offset, expected)?;
        header_size += EXTENDED_TYPE_LEN;
        let mut u = [0u8; 16];
        u.copy_from_slice(&bytes);
        Some(u)
    } else {
        None
    };

    Ok(RawHeader { typ, uuid, size, header_size })
}

/// Reads `count` bytes at `at`, mapping a short source into
/// [`HeaderError::TruncatedHeader`] anchored at the box's `offset`.
fn read_bytes(
    reader: &dyn RandomAccessReader,
    at: u64,
    count: usize,
    offset: u64,
    expected: u64,
) -> Result<Vec<u8>, HeaderError> {
    match reader.read(at, count) {
        Ok(b) => Ok(b),
        Err(ReaderError::OutOfRange { length, .. }) => Err(HeaderError::TruncatedHeader {
            offset,
            expected,
            available: length.saturating_sub(offset),
        }),
        Err(ReaderError::Io(e)) => Err(HeaderError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemoryReader;

    #[test]
    fn decodes_fixed_header() {
        let r = MemoryReader::new(vec![0, 0, 0, 8, b'f', b't', b'y', b'p']);
        let h = decode_header(&r, 0).unwrap();
        assert_eq!(h.typ, FourCC(*b"ftyp"));
        assert_eq!(h.size, DeclaredSize::Bytes(8));
        assert_eq!(h.header_size, 8);
        assert!(h.uuid.is_none());
    }

    #[test]
    fn decodes_extended_size() {
        let mut v = vec![0, 0, 0, 1];
        v.extend_from_slice(b"mdat");
        v.extend_from_slice(&24u64.to_be_bytes());
        v.extend_from_slice(&[0u8; 8]);
        let r = MemoryReader::new(v);
        let h = decode_header(&r, 0).unwrap();
        assert_eq!(h.size, DeclaredSize::Bytes(24));
        assert_eq!(h.header_size, 16);
    }

    #[test]
    fn decodes_extended_type() {
        let mut v = vec![0, 0, 0, 24];
        v.extend_from_slice(b"uuid");
        v.extend_from_slice(&[0xAB; 16]);
        let r = MemoryReader::new(v);
        let h = decode_header(&r, 0).unwrap();
        assert_eq!(h.uuid, Some([0xAB; 16]));
        assert_eq!(h.header_size, 24);
    }

    #[test]
    fn zero_size_defers_to_caller() {
        let r = MemoryReader::new(vec![0, 0, 0, 0, b'm', b'd', b'a', b't']);
        let h = decode_header(&r, 0).unwrap();
        assert_eq!(h.size, DeclaredSize::ToEnd);
    }

    #[test]
    fn truncated_fixed_header() {
        let r = MemoryReader::new(vec![0, 0, 0]);
        match decode_header(&r, 0) {
            Err(HeaderError::TruncatedHeader { offset: 0, expected: 8, available: 3 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn truncated_extended_size() {
        let mut v = vec![0, 0, 0, 1];
        v.extend_from_slice(b"mdat");
        v.extend_from_slice(&[0u8; 4]);
        let r = MemoryReader::new(v);
        assert!(matches!(
            decode_header(&r, 0),
            Err(HeaderError::TruncatedHeader { expected: 16, .. })
        ));
    }

    #[test]
    fn rejects_unprintable_type() {
        let r = MemoryReader::new(vec![0, 0, 0, 8, 0x00, 0x01, 0x02, 0x03]);
        assert!(matches!(
            decode_header(&r, 0),
            Err(HeaderError::InvalidTypeCode { offset: 0, .. })
        ));
    }
}

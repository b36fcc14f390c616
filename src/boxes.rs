use std::fmt;
use std::ops::Range;

use serde::Serialize;

/// Half-open interval of absolute file offsets.
pub type ByteRange = Range<u64>;

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub fn from_str(s: &str) -> Option<Self> {
        let b = s.as_bytes();
        if b.len() == 4 {
            Some(FourCC([b[0], b[1], b[2], b[3]]))
        } else {
            None
        }
    }

    pub fn as_str_lossy(&self) -> String {
        self.0
            .iter()
            .map(|&c| if (32..=126).contains(&c) { c as char } else { '.' })
            .collect()
    }

    /// Printable ASCII plus 0xA9, the QuickTime copyright-atom prefix.
    pub fn is_printable(bytes: &[u8; 4]) -> bool {
        bytes.iter().all(|&c| (32..=126).contains(&c) || c == 0xA9)
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str_lossy())
    }
}

impl Serialize for FourCC {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.as_str_lossy())
    }
}

/// Lookup key for a box: plain four-character code, or the 16-byte extended
/// type carried by `uuid` boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BoxKey {
    FourCC(FourCC),
    Uuid([u8; 16]),
}

impl BoxKey {
    pub fn for_header(header: &BoxHeader) -> Self {
        match header.uuid {
            Some(u) => BoxKey::Uuid(u),
            None => BoxKey::FourCC(header.typ),
        }
    }
}

/// Decoded box header with resolved geometry.
///
/// `range` and `payload_range` are the *effective* extents: tolerant recovery
/// may have clamped them to the containing region, in which case
/// `declared_size` still records what the file claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoxHeader {
    pub typ: FourCC,
    /// Extended type identifier, present when `typ` is `uuid`.
    pub uuid: Option<[u8; 16]>,
    /// Total size as declared in the file, after resolving the size==0 and
    /// size==1 conventions against the containing region.
    pub declared_size: u64,
    pub header_size: u64,
    pub payload_range: ByteRange,
    pub range: ByteRange,
}

impl BoxHeader {
    pub fn start_offset(&self) -> u64 {
        self.range.start
    }

    pub fn end_offset(&self) -> u64 {
        self.range.end
    }

    pub fn total_size(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn payload_len(&self) -> u64 {
        self.payload_range.end - self.payload_range.start
    }

    /// True when tolerant recovery shortened the box relative to its
    /// declared size.
    pub fn is_clamped(&self) -> bool {
        self.declared_size != self.total_size()
    }

    /// `ftyp` or `uuid[...]`, for messages.
    pub fn identifier_string(&self) -> String {
        match self.uuid {
            Some(u) => format!("uuid[{}]", hex::encode(u)),
            None => self.typ.to_string(),
        }
    }
}

//! Container vs leaf classification.
//!
//! Known container types come from a fixed table. Types the catalog knows
//! about but that are not in the table are leaves. Unknown types fall back to
//! a structural probe: the payload is treated as child boxes only if it scans
//! as a well-formed box sequence spanning exactly the payload range. The
//! probe bounds are policy, not format law, so the classifier is a value the
//! pipeline owns and callers can replace.

use std::collections::HashSet;

use crate::boxes::{BoxHeader, FourCC};
use crate::catalog::BoxCatalog;
use crate::reader::RandomAccessReader;

const CONTAINER_TYPES: [&[u8; 4]; 20] = [
    b"moov", b"trak", b"mdia", b"minf", b"dinf", b"stbl", b"edts", b"mvex", b"moof", b"traf",
    b"mfra", b"tref", b"udta", b"strk", b"strd", b"sinf", b"schi", b"stsd", b"meta", b"ilst",
];

/// Upper bound on child headers examined by the structural probe.
const MAX_PROBE_BOXES: usize = 64;

pub struct BoxClassifier {
    containers: HashSet<FourCC>,
    /// Probe payloads of catalog-unknown types for box structure.
    probe_unknown: bool,
}

impl Default for BoxClassifier {
    fn default() -> Self {
        Self {
            containers: CONTAINER_TYPES.iter().map(|cc| FourCC(**cc)).collect(),
            probe_unknown: true,
        }
    }
}

impl BoxClassifier {
    pub fn without_probe() -> Self {
        Self { probe_unknown: false, ..Self::default() }
    }

    pub fn with_container(mut self, typ: FourCC) -> Self {
        self.containers.insert(typ);
        self
    }

    /// Decide whether the walker should descend into `header`'s payload.
    pub fn is_container(
        &self,
        header: &BoxHeader,
        catalog: &BoxCatalog,
        reader: &dyn RandomAccessReader,
    ) -> bool {
        if header.payload_len() == 0 {
            return false;
        }
        if self.containers.contains(&header.typ) {
            return true;
        }
        if catalog.descriptor_for(header).is_some() {
            return false;
        }
        if !self.probe_unknown {
            return false;
        }
        let verdict = probe_box_sequence(reader, self.child_scan_start(header), header.payload_range.end);
        tracing::debug!(
            typ = %header.typ,
            offset = header.range.start,
            container = verdict,
            "structural probe for unknown box type"
        );
        verdict
    }

    /// First child offset within the payload. `meta` is a FullBox whose
    /// children start after the 4-byte version/flags field.
    pub fn child_scan_start(&self, header: &BoxHeader) -> u64 {
        if &header.typ.0 == b"meta" {
            let skip = 4u64.min(header.payload_len());
            return header.payload_range.start + skip;
        }
        header.payload_range.start
    }
}

/// True when `[start, end)` scans as a gap-free sequence of plausible box
/// headers landing exactly on `end`.
fn probe_box_sequence(reader: &dyn RandomAccessReader, start: u64, end: u64) -> bool {
    if start >= end {
        return false;
    }
    let mut cursor = start;
    let mut seen = 0usize;
    while cursor < end {
        if seen >= MAX_PROBE_BOXES {
            return false;
        }
        let Ok(size_field) = reader.read_u32(cursor) else { return false };
        let Ok(typ) = reader.read_fourcc(cursor + 4) else { return false };
        if !FourCC::is_printable(&typ.0) {
            return false;
        }
        let box_end = match size_field {
            0 => end,
            1 => match reader.read_u64(cursor + 8) {
                Ok(large) if large >= 16 => match cursor.checked_add(large) {
                    Some(e) => e,
                    None => return false,
                },
                _ => return false,
            },
            n if n >= 8 => cursor + n as u64,
            _ => return false,
        };
        if box_end > end {
            return false;
        }
        cursor = box_end;
        seen += 1;
    }
    seen > 0 && cursor == end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MemoryReader;

    fn leaf(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
        v.extend_from_slice(typ);
        v.extend_from_slice(payload);
        v
    }

    fn header_for(typ: &[u8; 4], data_len: u64) -> BoxHeader {
        BoxHeader {
            typ: FourCC(*typ),
            uuid: None,
            declared_size: 8 + data_len,
            header_size: 8,
            payload_range: 8..8 + data_len,
            range: 0..8 + data_len,
        }
    }

    #[test]
    fn fixed_table_wins_over_probe() {
        let data = leaf(b"moov", &[0u8; 4]);
        let reader = MemoryReader::new(data);
        let classifier = BoxClassifier::default();
        let header = header_for(b"moov", 4);
        assert!(classifier.is_container(&header, &BoxCatalog::bundled(), &reader));
    }

    #[test]
    fn catalog_known_leaf_is_not_probed() {
        // An mdat whose payload happens to look like a box must stay a leaf.
        let inner = leaf(b"abcd", &[1, 2, 3, 4]);
        let data = leaf(b"mdat", &inner);
        let reader = MemoryReader::new(data);
        let classifier = BoxClassifier::default();
        let header = header_for(b"mdat", inner.len() as u64);
        assert!(!classifier.is_container(&header, &BoxCatalog::bundled(), &reader));
    }

    #[test]
    fn unknown_type_probed_as_container() {
        let inner = leaf(b"abcd", &[1, 2, 3, 4]);
        let data = leaf(b"wxyz", &inner);
        let reader = MemoryReader::new(data);
        let classifier = BoxClassifier::default();
        let header = header_for(b"wxyz", inner.len() as u64);
        assert!(classifier.is_container(&header, &BoxCatalog::bundled(), &reader));
    }

    #[test]
    fn unknown_type_with_loose_tail_is_leaf() {
        let mut inner = leaf(b"abcd", &[1, 2, 3, 4]);
        inner.push(0xFF); // one trailing byte breaks exact tiling
        let data = leaf(b"wxyz", &inner);
        let reader = MemoryReader::new(data);
        let classifier = BoxClassifier::default();
        let header = header_for(b"wxyz", inner.len() as u64);
        assert!(!classifier.is_container(&header, &BoxCatalog::bundled(), &reader));
    }

    #[test]
    fn meta_children_start_after_version_flags() {
        let classifier = BoxClassifier::default();
        let header = header_for(b"meta", 20);
        assert_eq!(classifier.child_scan_start(&header), 12);
    }
}

//! Cross-box sample table consistency.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use crate::boxes::{ByteRange, FourCC};
use crate::issues::{Severity, ValidationIssue};
use crate::pipeline::{ParseEvent, ParseEventKind};
use crate::reader::{RandomAccessReader, ReaderError};
use crate::rules::{ValidationRule, read_failure};

/// Upper bound on bytes fetched from any one table while correlating.
const MAX_TABLE_BYTES: u64 = 1 << 20;

#[derive(Default)]
struct SampleTables {
    stts: Option<ByteRange>,
    stsz: Option<ByteRange>,
    chunk_offsets: Option<ByteRange>,
}

/// VR-007: the sample counts described by `stts` and `stsz` within one
/// `stbl` must agree, and chunk offset tables must not be orphaned.
///
/// Evidence is collected while the `stbl` is open and resolved when it
/// closes, so the rule sees every table regardless of their order.
#[derive(Default)]
pub struct SampleTableCorrelationRule {
    open: Vec<SampleTables>,
}

impl ValidationRule for SampleTableCorrelationRule {
    fn id(&self) -> &'static str {
        "VR-007"
    }

    fn issues(
        &mut self,
        event: &ParseEvent,
        reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue> {
        match &event.kind {
            ParseEventKind::WillStart { header, .. } => {
                if header.typ == FourCC(*b"stbl") {
                    self.open.push(SampleTables::default());
                } else if let Some(tables) = self.open.last_mut() {
                    let range = header.payload_range.clone();
                    match &header.typ.0 {
                        b"stts" => tables.stts = Some(range),
                        b"stsz" => tables.stsz = Some(range),
                        b"stco" | b"co64" => tables.chunk_offsets = Some(range),
                        _ => {}
                    }
                }
                Vec::new()
            }
            ParseEventKind::DidFinish { header, .. } => {
                if header.typ != FourCC(*b"stbl") {
                    return Vec::new();
                }
                let Some(tables) = self.open.pop() else {
                    return Vec::new();
                };
                match self.resolve(&tables, reader) {
                    Ok(issues) => issues,
                    Err(ReaderError::Io(_)) => vec![read_failure(self.id())],
                    Err(ReaderError::OutOfRange { .. }) => Vec::new(),
                }
            }
        }
    }
}

impl SampleTableCorrelationRule {
    fn resolve(
        &self,
        tables: &SampleTables,
        reader: &dyn RandomAccessReader,
    ) -> Result<Vec<ValidationIssue>, ReaderError> {
        let mut out = Vec::new();

        let stts_total = match &tables.stts {
            Some(range) => Some(stts_sample_total(range, reader)?),
            None => None,
        };
        let stsz_count = match &tables.stsz {
            Some(range) if range.end - range.start >= 12 => {
                Some(reader.read_u32(range.start + 8)? as u64)
            }
            _ => None,
        };

        if let (Some(total), Some(count)) = (stts_total, stsz_count) {
            if total != count {
                out.push(ValidationIssue::new(
                    self.id(),
                    Severity::Error,
                    format!(
                        "`stts` describes {total} samples but `stsz` declares {count}"
                    ),
                ));
            }
        }

        if let Some(range) = &tables.chunk_offsets {
            let entry_count = if range.end - range.start >= 8 {
                reader.read_u32(range.start + 4)? as u64
            } else {
                0
            };
            if entry_count > 0 && stsz_count.unwrap_or(0) == 0 {
                out.push(ValidationIssue::new(
                    self.id(),
                    Severity::Warning,
                    format!(
                        "chunk offset table declares {entry_count} chunks but no samples \
                         are described"
                    ),
                ));
            }
        } else if stsz_count.unwrap_or(0) > 0 {
            out.push(ValidationIssue::new(
                self.id(),
                Severity::Warning,
                "samples are described but no chunk offset table is present".to_string(),
            ));
        }

        Ok(out)
    }
}

/// Sum of `sample_count` over all `stts` entries, bounded by the table's
/// actual payload.
fn stts_sample_total(
    range: &ByteRange,
    reader: &dyn RandomAccessReader,
) -> Result<u64, ReaderError> {
    let len = range.end - range.start;
    if len < 8 {
        return Ok(0);
    }
    let entry_count = reader.read_u32(range.start + 4)? as u64;
    let table_len = (entry_count * 8).min(len - 8).min(MAX_TABLE_BYTES);
    let data = reader.read(range.start + 8, table_len as usize)?;
    let mut cursor = Cursor::new(&data);
    let mut total: u64 = 0;
    for _ in 0..table_len / 8 {
        let sample_count = cursor.read_u32::<BigEndian>().unwrap_or(0) as u64;
        let _delta = cursor.read_u32::<BigEndian>().unwrap_or(0);
        total += sample_count;
    }
    Ok(total)
}

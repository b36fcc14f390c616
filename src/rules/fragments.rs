//! Fragmented-file rules: movie fragment sequencing and track run sanity.

use crate::boxes::FourCC;
use crate::issues::{Severity, ValidationIssue};
use crate::payload::trun_entry_len;
use crate::pipeline::{ParseEvent, ParseEventKind};
use crate::reader::{RandomAccessReader, ReaderError};
use crate::rules::{ValidationRule, read_failure};

/// VR-008: `mfhd` sequence numbers must increase across the file. Decoders
/// use them to detect dropped fragments, so a regression is worth flagging
/// even though playback usually survives it.
#[derive(Default)]
pub struct FragmentSequenceRule {
    last_sequence: Option<u32>,
}

impl ValidationRule for FragmentSequenceRule {
    fn id(&self) -> &'static str {
        "VR-008"
    }

    fn issues(
        &mut self,
        event: &ParseEvent,
        reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStart { header, .. } = &event.kind else {
            return Vec::new();
        };
        if header.typ != FourCC(*b"mfhd") || header.payload_len() < 8 {
            return Vec::new();
        }
        let sequence = match reader.read_u32(header.payload_range.start + 4) {
            Ok(sequence) => sequence,
            Err(ReaderError::OutOfRange { .. }) => return Vec::new(),
            Err(ReaderError::Io(_)) => return vec![read_failure(self.id())],
        };
        let out = match self.last_sequence {
            Some(last) if sequence <= last => vec![ValidationIssue::new(
                self.id(),
                Severity::Warning,
                format!(
                    "fragment sequence number {sequence} does not increase past {last}"
                ),
            )],
            _ => Vec::new(),
        };
        self.last_sequence = Some(sequence);
        out
    }
}

/// VR-009: a `trun` must declare a sample table that fits its own payload,
/// and an empty run is suspicious.
pub struct FragmentRunRule;

impl ValidationRule for FragmentRunRule {
    fn id(&self) -> &'static str {
        "VR-009"
    }

    fn issues(
        &mut self,
        event: &ParseEvent,
        reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStart { header, .. } = &event.kind else {
            return Vec::new();
        };
        if header.typ != FourCC(*b"trun") || header.payload_len() < 8 {
            return Vec::new();
        }
        let (word, sample_count) = match (
            reader.read_u32(header.payload_range.start),
            reader.read_u32(header.payload_range.start + 4),
        ) {
            (Ok(word), Ok(count)) => (word, count),
            (Err(ReaderError::Io(_)), _) | (_, Err(ReaderError::Io(_))) => {
                return vec![read_failure(self.id())];
            }
            _ => return Vec::new(),
        };
        let flags = word & 0x00ff_ffff;

        let mut needed: u64 = 8;
        if flags & 0x000001 != 0 {
            needed += 4; // data_offset
        }
        if flags & 0x000004 != 0 {
            needed += 4; // first_sample_flags
        }
        needed += sample_count as u64 * trun_entry_len(flags);

        let mut out = Vec::new();
        if needed > header.payload_len() {
            out.push(ValidationIssue::new(
                self.id(),
                Severity::Error,
                format!(
                    "`trun` declares {sample_count} samples needing {needed} bytes but its \
                     payload holds {}",
                    header.payload_len()
                ),
            ));
        }
        if sample_count == 0 {
            out.push(ValidationIssue::new(
                self.id(),
                Severity::Warning,
                "`trun` declares zero samples".to_string(),
            ));
        }
        out
    }
}

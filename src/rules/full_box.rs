//! Rules driven by catalog metadata: full-box version/flags conformance and
//! coverage of the catalog itself.

use crate::issues::{Severity, ValidationIssue};
use crate::pipeline::{ParseEvent, ParseEventKind};
use crate::reader::{RandomAccessReader, ReaderError};
use crate::rules::{ValidationRule, read_failure};

/// VR-003: a full box's version and flags must match what the catalog
/// expects for its type. Advisory only; files with vendor extensions bend
/// these fields routinely.
pub struct VersionFlagsRule;

impl ValidationRule for VersionFlagsRule {
    fn id(&self) -> &'static str {
        "VR-003"
    }

    fn issues(
        &mut self,
        event: &ParseEvent,
        reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStart { header, .. } = &event.kind else {
            return Vec::new();
        };
        let Some(meta) = &event.metadata else {
            return Vec::new();
        };
        if meta.version.is_none() && meta.flags.is_none() {
            return Vec::new();
        }
        if header.payload_len() < 4 {
            return vec![ValidationIssue::new(
                self.id(),
                Severity::Warning,
                format!(
                    "full box `{}` is too small to hold its version and flags",
                    header.identifier_string()
                ),
            )];
        }
        let word = match reader.read_u32(header.payload_range.start) {
            Ok(word) => word,
            Err(ReaderError::OutOfRange { .. }) => return Vec::new(),
            Err(ReaderError::Io(_)) => return vec![read_failure(self.id())],
        };
        let version = (word >> 24) as u8;
        let flags = word & 0x00ff_ffff;

        let mut out = Vec::new();
        if let Some(expected) = meta.version {
            if version != expected {
                out.push(ValidationIssue::new(
                    self.id(),
                    Severity::Warning,
                    format!(
                        "box `{}` has version {version}, expected {expected}",
                        header.identifier_string()
                    ),
                ));
            }
        }
        if let Some(expected) = meta.flags {
            if flags != expected {
                out.push(ValidationIssue::new(
                    self.id(),
                    Severity::Warning,
                    format!(
                        "box `{}` has flags {flags:#08x}, expected {expected:#08x}",
                        header.identifier_string()
                    ),
                ));
            }
        }
        out
    }
}

/// VR-006: types absent from the catalog are surfaced as informational
/// findings so coverage gaps are visible without drowning real errors.
pub struct UnknownBoxRule;

impl ValidationRule for UnknownBoxRule {
    fn id(&self) -> &'static str {
        "VR-006"
    }

    fn issues(
        &mut self,
        event: &ParseEvent,
        _reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStart { header, .. } = &event.kind else {
            return Vec::new();
        };
        if event.metadata.is_some() {
            return Vec::new();
        }
        vec![ValidationIssue::new(
            self.id(),
            Severity::Info,
            format!("box type `{}` is not in the catalog", header.identifier_string()),
        )]
    }
}

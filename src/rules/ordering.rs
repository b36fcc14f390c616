//! Top-level box ordering rules.

use crate::boxes::FourCC;
use crate::issues::{Severity, ValidationIssue};
use crate::pipeline::{ParseEvent, ParseEventKind};
use crate::reader::RandomAccessReader;
use crate::rules::ValidationRule;

/// VR-004: `ftyp` should precede any media structure box at the top level.
/// Players routinely cope with late brands, so this is advisory.
#[derive(Default)]
pub struct FileTypeOrderingRule {
    seen_ftyp: bool,
    reported: bool,
}

const MEDIA_TYPES: [&[u8; 4]; 10] = [
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"moof", b"traf", b"mvex", b"mdat", b"sidx",
];

impl ValidationRule for FileTypeOrderingRule {
    fn id(&self) -> &'static str {
        "VR-004"
    }

    fn issues(
        &mut self,
        event: &ParseEvent,
        _reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStart { header, depth } = &event.kind else {
            return Vec::new();
        };
        if *depth != 0 {
            return Vec::new();
        }
        if header.typ == FourCC(*b"ftyp") {
            self.seen_ftyp = true;
            return Vec::new();
        }
        if !self.seen_ftyp
            && !self.reported
            && MEDIA_TYPES.iter().any(|t| header.typ == FourCC(**t))
        {
            self.reported = true;
            return vec![ValidationIssue::new(
                self.id(),
                Severity::Warning,
                format!(
                    "media box `{}` appears before any `ftyp` declaration",
                    header.identifier_string()
                ),
            )];
        }
        Vec::new()
    }
}

/// VR-005: `mdat` before `moov` makes progressive playback impossible unless
/// the file signals a streaming layout. The finding attaches to the offending
/// `mdat` itself, so a file with no `moov` at all is still reported.
#[derive(Default)]
pub struct MovieDataOrderingRule {
    seen_moov: bool,
    streaming_indicator: bool,
    reported: bool,
}

const STREAMING_TYPES: [&[u8; 4]; 6] = [b"moof", b"mvex", b"sidx", b"styp", b"ssix", b"prft"];

impl ValidationRule for MovieDataOrderingRule {
    fn id(&self) -> &'static str {
        "VR-005"
    }

    fn issues(
        &mut self,
        event: &ParseEvent,
        _reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStart { header, depth } = &event.kind else {
            return Vec::new();
        };
        if *depth != 0 {
            return Vec::new();
        }
        if STREAMING_TYPES.iter().any(|t| header.typ == FourCC(**t)) {
            self.streaming_indicator = true;
        } else if header.typ == FourCC(*b"moov") {
            self.seen_moov = true;
        } else if header.typ == FourCC(*b"mdat")
            && !self.seen_moov
            && !self.streaming_indicator
            && !self.reported
        {
            self.reported = true;
            return vec![ValidationIssue::new(
                self.id(),
                Severity::Warning,
                "`mdat` appears before `moov` without a streaming indicator; progressive \
                 playback requires the full file"
                    .to_string(),
            )];
        }
        Vec::new()
    }
}

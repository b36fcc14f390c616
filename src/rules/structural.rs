//! Structural rules: declared sizes versus physical reality.

use crate::issues::{Severity, ValidationIssue};
use crate::pipeline::{ParseEvent, ParseEventKind};
use crate::reader::RandomAccessReader;
use crate::rules::ValidationRule;

/// VR-001: a box must fit inside the bytes that actually exist.
///
/// The pipeline already clamps an oversized box; this rule turns the clamp
/// into a reportable finding on the box itself.
pub struct StructuralSizeRule;

impl ValidationRule for StructuralSizeRule {
    fn id(&self) -> &'static str {
        "VR-001"
    }

    fn issues(
        &mut self,
        event: &ParseEvent,
        _reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue> {
        let ParseEventKind::WillStart { header, .. } = &event.kind else {
            return Vec::new();
        };
        if header.is_clamped() {
            vec![ValidationIssue::new(
                self.id(),
                Severity::Error,
                format!(
                    "box `{}` declares {} bytes but only {} are available",
                    header.identifier_string(),
                    header.declared_size,
                    header.total_size()
                ),
            )]
        } else {
            Vec::new()
        }
    }
}

/// VR-002: every child must lie entirely within its parent's payload, and a
/// container's children must collectively close exactly at its payload end.
///
/// Tracks the payload extents of open containers on a stack mirroring the
/// pipeline's own.
#[derive(Default)]
pub struct ContainerBoundaryRule {
    open: Vec<OpenBox>,
}

struct OpenBox {
    payload_start: u64,
    payload_end: u64,
    last_child_end: Option<u64>,
}

impl ValidationRule for ContainerBoundaryRule {
    fn id(&self) -> &'static str {
        "VR-002"
    }

    fn issues(
        &mut self,
        event: &ParseEvent,
        _reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue> {
        match &event.kind {
            ParseEventKind::WillStart { header, .. } => {
                let id = self.id();
                let mut out = Vec::new();
                if let Some(parent) = self.open.last_mut() {
                    // The pipeline clamps `range`, so judge the declared extent.
                    let declared_end =
                        header.start_offset().saturating_add(header.declared_size);
                    if header.start_offset() < parent.payload_start
                        || declared_end > parent.payload_end
                    {
                        out.push(ValidationIssue::new(
                            id,
                            Severity::Error,
                            format!(
                                "box `{}` spans {}..{}, crossing its parent's payload {}..{}",
                                header.identifier_string(),
                                header.start_offset(),
                                declared_end,
                                parent.payload_start,
                                parent.payload_end
                            ),
                        ));
                    }
                    parent.last_child_end = Some(header.range.end);
                }
                self.open.push(OpenBox {
                    payload_start: header.payload_range.start,
                    payload_end: header.payload_range.end,
                    last_child_end: None,
                });
                out
            }
            ParseEventKind::DidFinish { header, .. } => {
                let Some(closed) = self.open.pop() else {
                    return Vec::new();
                };
                match closed.last_child_end {
                    Some(last) if last != closed.payload_end => {
                        vec![ValidationIssue::new(
                            self.id(),
                            Severity::Error,
                            format!(
                                "children of `{}` end at {last}, {} bytes before the end of \
                                 its payload at {}",
                                header.identifier_string(),
                                closed.payload_end - last,
                                closed.payload_end
                            ),
                        )]
                    }
                    _ => Vec::new(),
                }
            }
        }
    }
}

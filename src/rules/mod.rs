//! Validation rule engine.
//!
//! Rules observe the event stream and report semantic non-conformance as
//! [`ValidationIssue`]s attached to the triggering event. Rules never alter
//! parsing behavior. A rule may keep private state across the events of one
//! session (ordering and correlation rules need to), but rules share no state
//! with each other and a validator is single-session.

mod fragments;
mod full_box;
mod ordering;
mod sample_tables;
mod structural;

pub use fragments::{FragmentRunRule, FragmentSequenceRule};
pub use full_box::{UnknownBoxRule, VersionFlagsRule};
pub use ordering::{FileTypeOrderingRule, MovieDataOrderingRule};
pub use sample_tables::SampleTableCorrelationRule;
pub use structural::{ContainerBoundaryRule, StructuralSizeRule};

use crate::issues::{Severity, ValidationIssue};
use crate::pipeline::ParseEvent;
use crate::reader::RandomAccessReader;

pub trait ValidationRule {
    /// Stable identifier, `VR-` followed by a three-digit number.
    fn id(&self) -> &'static str;

    fn issues(
        &mut self,
        event: &ParseEvent,
        reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue>;
}

/// Runs a fixed roster of rules, in ascending rule-ID order, against every
/// event of one parse session.
pub struct BoxValidator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl BoxValidator {
    pub fn new(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    pub fn with_default_rules() -> Self {
        Self::new(vec![
            Box::new(StructuralSizeRule),
            Box::new(ContainerBoundaryRule::default()),
            Box::new(VersionFlagsRule),
            Box::new(FileTypeOrderingRule::default()),
            Box::new(MovieDataOrderingRule::default()),
            Box::new(UnknownBoxRule),
            Box::new(SampleTableCorrelationRule::default()),
            Box::new(FragmentSequenceRule::default()),
            Box::new(FragmentRunRule),
        ])
    }

    pub fn run(
        &mut self,
        event: &ParseEvent,
        reader: &dyn RandomAccessReader,
    ) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        for rule in &mut self.rules {
            out.extend(rule.issues(event, reader));
        }
        out
    }
}

/// Single warning standing in for findings a rule could not compute because
/// the payload bytes were unreadable.
pub(crate) fn read_failure(rule_id: &'static str) -> ValidationIssue {
    ValidationIssue::new(
        rule_id,
        Severity::Warning,
        format!("{rule_id} could not inspect payload bytes; checks skipped"),
    )
}

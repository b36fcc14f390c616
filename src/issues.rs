use serde::Serialize;

use crate::boxes::ByteRange;

/// Severity shared by both issue taxonomies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }
}

/// A finding from the validation rule engine.
///
/// Validation issues describe semantic non-conformance. They never affect
/// control flow and are always attached to the event that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub rule_id: &'static str,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn new(rule_id: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self { rule_id, message: message.into(), severity }
    }
}

/// A structural, recoverable corruption recorded by the tolerant-recovery
/// policy itself, as distinct from rule-engine findings.
///
/// Carries the byte range of the repaired region whenever one could be
/// determined, and the identifiers of tree nodes it affects so that clients
/// can navigate to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseIssue {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
    pub byte_range: Option<ByteRange>,
    pub affected_node_ids: Vec<u64>,
}

impl ParseIssue {
    pub fn new(
        severity: Severity,
        code: &'static str,
        message: impl Into<String>,
        byte_range: Option<ByteRange>,
    ) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            byte_range,
            affected_node_ids: Vec::new(),
        }
    }
}

/// Externally-owned receiver for parse issues, fed in real time as the
/// pipeline produces them.
pub trait IssueSink {
    fn record(&mut self, issue: &ParseIssue);
}

/// Sink that accumulates issues into a vector.
#[derive(Default)]
pub struct VecSink {
    pub issues: Vec<ParseIssue>,
}

impl IssueSink for VecSink {
    fn record(&mut self, issue: &ParseIssue) {
        self.issues.push(issue.clone());
    }
}

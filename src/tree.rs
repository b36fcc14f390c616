//! Incremental parse tree construction.
//!
//! The builder consumes the event stream and maintains an arena of nodes
//! plus a stack of open indices. Snapshots freeze the arena into an
//! immutable value tree; snapshotting never disturbs builder state, so
//! repeated snapshots without intervening events are identical.

use serde::Serialize;

use crate::boxes::BoxHeader;
use crate::catalog::BoxDescriptor;
use crate::issues::{ParseIssue, Severity, ValidationIssue};
use crate::payload::ParsedBoxPayload;
use crate::pipeline::{ParseEvent, ParseEventKind};

/// `Partial` marks a node whose bytes could not be fully trusted: an
/// error-severity parse issue touched it, or its DidFinish never arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Valid,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseTreeNode {
    pub id: u64,
    pub header: BoxHeader,
    pub metadata: Option<BoxDescriptor>,
    pub payload: Option<ParsedBoxPayload>,
    pub status: NodeStatus,
    pub validation: Vec<ValidationIssue>,
    pub issues: Vec<ParseIssue>,
    pub children: Vec<ParseTreeNode>,
}

impl ParseTreeNode {
    /// Pre-order count of this node and all its descendants.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(ParseTreeNode::subtree_len).sum::<usize>()
    }
}

/// Immutable snapshot of the tree at some point in the event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseTree {
    pub roots: Vec<ParseTreeNode>,
    /// All rule findings in stream order.
    pub validation: Vec<ValidationIssue>,
    /// All recovery issues in stream order.
    pub issues: Vec<ParseIssue>,
    /// Events folded into this snapshot; later snapshots of the same
    /// session always carry a greater or equal count.
    pub events_consumed: u64,
}

impl ParseTree {
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.roots.iter().map(ParseTreeNode::subtree_len).sum()
    }

    /// Depth-first search over all nodes.
    pub fn find(&self, mut pred: impl FnMut(&ParseTreeNode) -> bool) -> Option<&ParseTreeNode> {
        fn walk<'a>(
            nodes: &'a [ParseTreeNode],
            pred: &mut impl FnMut(&ParseTreeNode) -> bool,
        ) -> Option<&'a ParseTreeNode> {
            for node in nodes {
                if pred(node) {
                    return Some(node);
                }
                if let Some(hit) = walk(&node.children, pred) {
                    return Some(hit);
                }
            }
            None
        }
        walk(&self.roots, &mut pred)
    }
}

struct MutableNode {
    id: u64,
    header: BoxHeader,
    metadata: Option<BoxDescriptor>,
    payload: Option<ParsedBoxPayload>,
    validation: Vec<ValidationIssue>,
    issues: Vec<ParseIssue>,
    children: Vec<usize>,
    closed: bool,
}

impl MutableNode {
    fn status(&self) -> NodeStatus {
        let damaged =
            !self.closed || self.issues.iter().any(|i| i.severity == Severity::Error);
        if damaged { NodeStatus::Partial } else { NodeStatus::Valid }
    }
}

/// Folds parse events into a tree. One builder per session; events must be
/// fed in stream order.
#[derive(Default)]
pub struct ParseTreeBuilder {
    nodes: Vec<MutableNode>,
    open: Vec<usize>,
    roots: Vec<usize>,
    validation: Vec<ValidationIssue>,
    issues: Vec<ParseIssue>,
    events_consumed: u64,
}

impl ParseTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&mut self, event: &ParseEvent) {
        self.events_consumed += 1;
        match &event.kind {
            ParseEventKind::WillStart { header, .. } => {
                let id = self.nodes.len() as u64 + 1;
                let mut issues = event.issues.clone();
                for issue in &mut issues {
                    if issue.affected_node_ids.is_empty() {
                        issue.affected_node_ids.push(id);
                    }
                }
                self.validation.extend(event.validation.iter().cloned());
                self.issues.extend(issues.iter().cloned());
                let index = self.nodes.len();
                self.nodes.push(MutableNode {
                    id,
                    header: header.clone(),
                    metadata: event.metadata.clone(),
                    payload: event.payload.clone(),
                    validation: event.validation.clone(),
                    issues,
                    children: Vec::new(),
                    closed: false,
                });
                match self.open.last() {
                    Some(&parent) => self.nodes[parent].children.push(index),
                    None => self.roots.push(index),
                }
                self.open.push(index);
            }
            ParseEventKind::DidFinish { header, .. } => {
                self.validation.extend(event.validation.iter().cloned());
                // A finish for a box that is not on top of the stack means
                // events were dropped; close intervening nodes as-is and
                // resynchronize.
                while let Some(&top) = self.open.last() {
                    let matches = self.nodes[top].header.range == header.range
                        && self.nodes[top].header.typ == header.typ;
                    self.open.pop();
                    if matches {
                        let node = &mut self.nodes[top];
                        node.closed = true;
                        if node.payload.is_none() {
                            node.payload = event.payload.clone();
                        }
                        node.validation.extend(event.validation.iter().cloned());
                        let id = node.id;
                        for issue in &event.issues {
                            let mut issue = issue.clone();
                            if issue.affected_node_ids.is_empty() {
                                issue.affected_node_ids.push(id);
                            }
                            self.issues.push(issue.clone());
                            self.nodes[top].issues.push(issue);
                        }
                        return;
                    }
                    tracing::warn!(
                        typ = %self.nodes[top].header.typ,
                        "finish event did not match open box; resynchronizing"
                    );
                }
            }
        }
    }

    /// Freeze the current state. Open boxes appear with `Partial` status.
    pub fn snapshot(&self) -> ParseTree {
        ParseTree {
            roots: self.roots.iter().map(|&i| self.freeze(i)).collect(),
            validation: self.validation.clone(),
            issues: self.issues.clone(),
            events_consumed: self.events_consumed,
        }
    }

    /// Snapshot retaining only the validation issues matching `pred`, per
    /// node and in the aggregate list. Structure and parse issues are kept
    /// in full.
    pub fn snapshot_filtered(&self, pred: impl Fn(&ValidationIssue) -> bool) -> ParseTree {
        fn prune(nodes: &mut [ParseTreeNode], pred: &impl Fn(&ValidationIssue) -> bool) {
            for node in nodes {
                node.validation.retain(|v| pred(v));
                prune(&mut node.children, pred);
            }
        }
        let mut tree = self.snapshot();
        prune(&mut tree.roots, &pred);
        tree.validation.retain(|v| pred(v));
        tree
    }

    fn freeze(&self, index: usize) -> ParseTreeNode {
        let node = &self.nodes[index];
        ParseTreeNode {
            id: node.id,
            header: node.header.clone(),
            metadata: node.metadata.clone(),
            payload: node.payload.clone(),
            status: node.status(),
            validation: node.validation.clone(),
            issues: node.issues.clone(),
            children: node.children.iter().map(|&c| self.freeze(c)).collect(),
        }
    }
}

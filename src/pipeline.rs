//! Streaming parse pipeline.
//!
//! Walks the byte source with an explicit frame stack (no call recursion),
//! decoding headers, descending into containers, and yielding a pull-based
//! event stream. Malformed boxes are repaired by the tolerant-recovery
//! policy: the damage is recorded as a [`ParseIssue`], the effective range is
//! clamped or the region skipped, and parsing continues. Only an I/O failure
//! on the byte source itself terminates the stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::boxes::{BoxHeader, BoxKey, ByteRange};
use crate::catalog::{BoxCatalog, BoxDescriptor};
use crate::classify::BoxClassifier;
use crate::header::{self, DeclaredSize, HeaderError};
use crate::issues::{IssueSink, ParseIssue, Severity, ValidationIssue};
use crate::payload::{DecoderRegistry, MAX_DECODE_PAYLOAD, ParsedBoxPayload, default_registry};
use crate::reader::RandomAccessReader;
use crate::rules::BoxValidator;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseEventKind {
    WillStart { header: BoxHeader, depth: usize },
    DidFinish { header: BoxHeader, depth: usize },
}

/// The only channel between the pipeline and its consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseEvent {
    pub kind: ParseEventKind,
    pub offset: u64,
    pub metadata: Option<BoxDescriptor>,
    pub payload: Option<ParsedBoxPayload>,
    pub validation: Vec<ValidationIssue>,
    pub issues: Vec<ParseIssue>,
}

impl ParseEvent {
    pub fn header(&self) -> &BoxHeader {
        match &self.kind {
            ParseEventKind::WillStart { header, .. } => header,
            ParseEventKind::DidFinish { header, .. } => header,
        }
    }

    pub fn depth(&self) -> usize {
        match &self.kind {
            ParseEventKind::WillStart { depth, .. } => *depth,
            ParseEventKind::DidFinish { depth, .. } => *depth,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, ParseEventKind::WillStart { .. })
    }
}

/// Cooperative cancellation flag, checked between header decodes.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Terminal failure states of the event stream. `Cancelled` and `Fatal` are
/// distinct; neither synthesizes additional issues.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("parse cancelled")]
    Cancelled,
    #[error("fatal read failure: {0}")]
    Fatal(#[source] std::io::Error),
}

/// Per-session parse context: cancellation token plus an optional
/// externally-owned sink that receives every [`ParseIssue`] in real time.
#[derive(Default)]
pub struct ParseContext<'s> {
    pub token: CancellationToken,
    pub sink: Option<&'s mut dyn IssueSink>,
}

impl<'s> ParseContext<'s> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_sink(mut self, sink: &'s mut dyn IssueSink) -> Self {
        self.sink = Some(sink);
        self
    }
}

/// Parse session factory. The catalog is injected at construction and shared
/// read-only; decoders and classifier are per-pipeline policy.
pub struct ParsePipeline {
    catalog: Arc<BoxCatalog>,
    decoders: DecoderRegistry,
    classifier: BoxClassifier,
}

impl ParsePipeline {
    pub fn new(catalog: Arc<BoxCatalog>) -> Self {
        Self { catalog, decoders: default_registry(), classifier: BoxClassifier::default() }
    }

    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn with_classifier(mut self, classifier: BoxClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Lazily walk `reader`, yielding one event per pull. The reader handle
    /// is owned by the returned session for its duration.
    pub fn events<'a, R: RandomAccessReader>(
        &'a self,
        reader: &'a R,
        ctx: ParseContext<'a>,
    ) -> ParseEvents<'a, R> {
        ParseEvents {
            reader,
            catalog: Arc::clone(&self.catalog),
            decoders: &self.decoders,
            classifier: &self.classifier,
            validator: BoxValidator::with_default_rules(),
            ctx,
            stack: vec![Frame::root(reader.length())],
            session_issues: Vec::new(),
            done: false,
        }
    }
}

struct Frame {
    header: Option<BoxHeader>,
    /// Region children are scanned within (the box's payload range).
    bounds: ByteRange,
    cursor: u64,
    depth: usize,
    scan_children: bool,
    /// Recovery issues to attach to this box's DidFinish event.
    pending_issues: Vec<ParseIssue>,
}

impl Frame {
    fn root(length: u64) -> Self {
        Frame {
            header: None,
            bounds: 0..length,
            cursor: 0,
            depth: 0,
            scan_children: true,
            pending_issues: Vec::new(),
        }
    }
}

/// Lazy event stream over one parse session. Neither the stream nor its
/// pipeline is reusable across sessions.
pub struct ParseEvents<'a, R: RandomAccessReader> {
    reader: &'a R,
    catalog: Arc<BoxCatalog>,
    decoders: &'a DecoderRegistry,
    classifier: &'a BoxClassifier,
    validator: BoxValidator,
    ctx: ParseContext<'a>,
    stack: Vec<Frame>,
    session_issues: Vec<ParseIssue>,
    done: bool,
}

impl<R: RandomAccessReader> ParseEvents<'_, R> {
    /// Every `ParseIssue` recorded so far, including region-level issues that
    /// had no box event to ride on.
    pub fn session_issues(&self) -> &[ParseIssue] {
        &self.session_issues
    }

    fn record_issue(&mut self, issue: &ParseIssue) {
        tracing::debug!(
            code = issue.code,
            severity = issue.severity.label(),
            range = ?issue.byte_range,
            "tolerant recovery"
        );
        if let Some(sink) = self.ctx.sink.as_mut() {
            sink.record(issue);
        }
        self.session_issues.push(issue.clone());
    }

    /// Record `issue` and park it on the innermost open box so it rides that
    /// box's DidFinish event. Root-level issues stay in the session list.
    fn record_region_issue(&mut self, issue: ParseIssue) {
        self.record_issue(&issue);
        if let Some(frame) = self.stack.iter_mut().rev().find(|f| f.header.is_some()) {
            frame.pending_issues.push(issue);
        }
    }

    fn annotated(
        &mut self,
        kind: ParseEventKind,
        offset: u64,
        payload: Option<ParsedBoxPayload>,
        issues: Vec<ParseIssue>,
    ) -> ParseEvent {
        let metadata = match &kind {
            ParseEventKind::WillStart { header, .. } | ParseEventKind::DidFinish { header, .. } => {
                self.catalog.descriptor_for(header).cloned()
            }
        };
        let mut event =
            ParseEvent { kind, offset, metadata, payload, validation: Vec::new(), issues };
        let findings = self.validator.run(&event, self.reader);
        event.validation = findings;
        event
    }

    fn decode_payload(&self, header: &BoxHeader) -> Option<ParsedBoxPayload> {
        let key = BoxKey::for_header(header);
        if !self.decoders.has_decoder(&key) || header.payload_len() == 0 {
            return None;
        }
        let len = header.payload_len().min(MAX_DECODE_PAYLOAD as u64) as usize;
        let data = match self.reader.read(header.payload_range.start, len) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(typ = %header.typ, error = %e, "payload read failed");
                return None;
            }
        };
        match self.decoders.decode(&key, &data, header) {
            Some(Ok(payload)) => Some(payload),
            Some(Err(e)) => {
                tracing::debug!(typ = %header.typ, error = %e, "payload decode failed");
                None
            }
            None => None,
        }
    }

    /// Recovery for a header whose type bytes are unreadable: when the size
    /// field is still usable the box is skipped in place, keeping later
    /// siblings; otherwise the container remainder is abandoned.
    fn recover_invalid_type(&mut self, offset: u64, bounds_end: u64) {
        let declared_end = match self.reader.read_u32(offset) {
            Ok(0) => Some(bounds_end),
            Ok(1) => match self.reader.read_u64(offset + 8) {
                Ok(large) if large >= 16 => offset.checked_add(large).filter(|e| *e <= bounds_end),
                _ => None,
            },
            Ok(n) if n >= 8 => offset.checked_add(n as u64).filter(|e| *e <= bounds_end),
            _ => None,
        };

        match declared_end {
            Some(end) => {
                self.record_region_issue(ParseIssue::new(
                    Severity::Info,
                    "recovery.invalid_type",
                    format!("box at offset {offset} has an unreadable type code; skipped"),
                    Some(offset..end),
                ));
                let frame = self.stack.last_mut().unwrap();
                frame.cursor = end;
            }
            None => {
                self.record_region_issue(ParseIssue::new(
                    Severity::Error,
                    "recovery.invalid_type",
                    format!(
                        "box at offset {offset} has an unreadable type code and no usable size; \
                         remainder of the region abandoned"
                    ),
                    Some(offset..bounds_end),
                ));
                let frame = self.stack.last_mut().unwrap();
                frame.cursor = frame.bounds.end;
            }
        }
    }

    /// Abandon the remainder of the current region with an error issue.
    fn recover_abandon(&mut self, code: &'static str, message: String, offset: u64) {
        let bounds_end = self.stack.last().unwrap().bounds.end;
        self.record_region_issue(ParseIssue::new(
            Severity::Error,
            code,
            message,
            Some(offset..bounds_end),
        ));
        let frame = self.stack.last_mut().unwrap();
        frame.cursor = frame.bounds.end;
    }

    fn step(&mut self) -> Option<Result<ParseEvent, StreamError>> {
        loop {
            let frame = self.stack.last()?;

            // Close the current box (or finish the session) when its child
            // region is exhausted.
            if !frame.scan_children || frame.cursor >= frame.bounds.end {
                let finished = self.stack.pop().unwrap();
                match finished.header {
                    Some(header) => {
                        let offset = header.end_offset();
                        let depth = finished.depth;
                        let event = self.annotated(
                            ParseEventKind::DidFinish { header, depth },
                            offset,
                            None,
                            finished.pending_issues,
                        );
                        return Some(Ok(event));
                    }
                    None => {
                        self.done = true;
                        return None;
                    }
                }
            }

            let offset = frame.cursor;
            let bounds_end = frame.bounds.end;

            // A region tail too small for even a fixed header is truncation,
            // regardless of what bytes follow the region in the file.
            if bounds_end - offset < header::FIXED_HEADER_LEN {
                self.recover_abandon(
                    "recovery.truncated",
                    format!(
                        "region tail at offset {offset} holds {} bytes, fewer than a box header",
                        bounds_end - offset
                    ),
                    offset,
                );
                continue;
            }

            let raw = match header::decode_header(self.reader, offset) {
                Ok(raw) => raw,
                Err(HeaderError::Io(e)) => {
                    self.done = true;
                    return Some(Err(StreamError::Fatal(e)));
                }
                Err(HeaderError::TruncatedHeader { expected, available, .. }) => {
                    self.recover_abandon(
                        "recovery.truncated",
                        format!(
                            "truncated box header at offset {offset}: needed {expected} bytes, \
                             {available} available"
                        ),
                        offset,
                    );
                    continue;
                }
                Err(HeaderError::InvalidTypeCode { .. }) => {
                    self.recover_invalid_type(offset, bounds_end);
                    continue;
                }
            };

            let declared_size = match raw.size {
                DeclaredSize::ToEnd => bounds_end - offset,
                DeclaredSize::Bytes(n) => n,
            };
            if declared_size < raw.header_size {
                self.recover_abandon(
                    "recovery.invalid_size",
                    format!(
                        "box `{}` at offset {offset} declares size {declared_size}, smaller than \
                         its {}-byte header; remainder of the region abandoned",
                        raw.typ, raw.header_size
                    ),
                    offset,
                );
                continue;
            }

            let declared_end = match offset.checked_add(declared_size) {
                Some(end) => end,
                None => {
                    self.recover_abandon(
                        "recovery.invalid_size",
                        format!(
                            "box `{}` at offset {offset} declares size {declared_size}, which \
                             overflows the file offset space",
                            raw.typ
                        ),
                        offset,
                    );
                    continue;
                }
            };
            let effective_end = declared_end.min(bounds_end);
            if effective_end < offset + raw.header_size {
                // The header itself crosses the region boundary.
                self.recover_abandon(
                    "recovery.invalid_size",
                    format!(
                        "box `{}` at offset {offset} has a header crossing its region boundary",
                        raw.typ
                    ),
                    offset,
                );
                continue;
            }

            let header = BoxHeader {
                typ: raw.typ,
                uuid: raw.uuid,
                declared_size,
                header_size: raw.header_size,
                payload_range: offset + raw.header_size..effective_end,
                range: offset..effective_end,
            };

            let mut start_issues = Vec::new();
            if declared_end > bounds_end {
                let issue = ParseIssue::new(
                    Severity::Error,
                    "recovery.size_overflow",
                    format!(
                        "box `{}` at offset {offset} declares size {declared_size} but only {} \
                         bytes remain; clamped",
                        header.identifier_string(),
                        bounds_end - offset
                    ),
                    Some(offset..effective_end),
                );
                self.record_issue(&issue);
                start_issues.push(issue);
            }

            // Resume after this box regardless of what its payload holds.
            let frame = self.stack.last_mut().unwrap();
            frame.cursor = effective_end;
            let depth = self.stack.len() - 1;

            let is_container =
                self.classifier.is_container(&header, &self.catalog, self.reader);
            let payload =
                if is_container { None } else { self.decode_payload(&header) };

            let child_cursor = self.classifier.child_scan_start(&header);
            self.stack.push(Frame {
                bounds: header.payload_range.clone(),
                cursor: child_cursor,
                depth,
                scan_children: is_container,
                header: Some(header.clone()),
                pending_issues: Vec::new(),
            });

            let event = self.annotated(
                ParseEventKind::WillStart { header: header.clone(), depth },
                header.start_offset(),
                payload,
                start_issues,
            );
            return Some(Ok(event));
        }
    }
}

impl<R: RandomAccessReader> Iterator for ParseEvents<'_, R> {
    type Item = Result<ParseEvent, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.ctx.token.is_cancelled() {
            self.done = true;
            return Some(Err(StreamError::Cancelled));
        }
        self.step()
    }
}

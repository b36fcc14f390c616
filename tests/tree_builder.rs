use isoinspect::{
    BoxCatalog, BoxHeader, FourCC, MemoryReader, NodeStatus, ParseContext, ParseEvent,
    ParseEventKind, ParsePipeline, ParseTreeBuilder, ParseTreeNode, RandomAccessReader,
    ReaderError, Severity, StreamError,
};

fn boxed(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
    out.extend_from_slice(typ);
    out.extend_from_slice(payload);
    out
}

fn fixture_events(data: Vec<u8>) -> Vec<ParseEvent> {
    let reader = MemoryReader::new(data);
    let pipeline = ParsePipeline::new(BoxCatalog::bundled());
    pipeline
        .events(&reader, ParseContext::new())
        .collect::<Result<_, _>>()
        .unwrap()
}

fn nested_fixture() -> Vec<u8> {
    let mut data = boxed(b"ftyp", b"isom\0\0\0\0");
    data.extend_from_slice(&boxed(b"moov", &boxed(b"trak", &boxed(b"udta", &[]))));
    data
}

#[test]
fn snapshot_mirrors_nesting() {
    let mut builder = ParseTreeBuilder::new();
    for event in fixture_events(nested_fixture()) {
        builder.consume(&event);
    }
    let tree = builder.snapshot();

    assert_eq!(tree.roots.len(), 2);
    assert_eq!(tree.roots[0].header.typ.as_str_lossy(), "ftyp");
    assert_eq!(tree.roots[1].header.typ.as_str_lossy(), "moov");
    assert_eq!(tree.roots[1].children.len(), 1);
    assert_eq!(tree.roots[1].children[0].header.typ.as_str_lossy(), "trak");
    assert_eq!(tree.node_count(), 4);
    assert!(tree.roots.iter().all(|n| n.status == NodeStatus::Valid));
}

#[test]
fn repeated_snapshots_are_identical() {
    let mut builder = ParseTreeBuilder::new();
    for event in fixture_events(nested_fixture()) {
        builder.consume(&event);
    }
    assert_eq!(builder.snapshot(), builder.snapshot());
}

#[test]
fn open_boxes_appear_partial_in_early_snapshots() {
    let events = fixture_events(nested_fixture());
    let mut builder = ParseTreeBuilder::new();

    let mut last_consumed = 0;
    for event in &events {
        builder.consume(event);
        let snap = builder.snapshot();
        assert!(snap.events_consumed > last_consumed);
        last_consumed = snap.events_consumed;
    }

    // Replay only up to moov's start: moov is open, hence partial.
    let mut partial = ParseTreeBuilder::new();
    for event in events
        .iter()
        .take_while(|e| !(e.is_start() && e.header().typ.as_str_lossy() == "trak"))
    {
        partial.consume(event);
    }
    let snap = partial.snapshot();
    assert_eq!(snap.roots[0].status, NodeStatus::Valid);
    assert_eq!(snap.roots[1].status, NodeStatus::Partial);
}

#[test]
fn error_issue_marks_node_partial_and_links_it() {
    let mut data = Vec::new();
    data.extend_from_slice(&255u32.to_be_bytes());
    data.extend_from_slice(b"mdat");

    let mut builder = ParseTreeBuilder::new();
    for event in fixture_events(data) {
        builder.consume(&event);
    }
    let tree = builder.snapshot();

    assert_eq!(tree.roots.len(), 1);
    let node = &tree.roots[0];
    assert_eq!(node.status, NodeStatus::Partial);
    assert_eq!(node.issues.len(), 1);
    assert_eq!(node.issues[0].affected_node_ids, vec![node.id]);
}

#[test]
fn filtered_snapshot_drops_unmatched_findings() {
    // An unknown type draws an info finding; the mdat clamp draws errors.
    let mut data = boxed(b"zzzz", &[0u8; 4]);
    data.extend_from_slice(&255u32.to_be_bytes());
    data.extend_from_slice(b"mdat");

    let mut builder = ParseTreeBuilder::new();
    for event in fixture_events(data) {
        builder.consume(&event);
    }

    let full = builder.snapshot();
    assert!(full.validation.iter().any(|v| v.severity == Severity::Info));
    assert!(full.validation.iter().any(|v| v.severity == Severity::Error));

    let errors_only = builder.snapshot_filtered(|v| v.severity == Severity::Error);
    assert!(errors_only.validation.iter().all(|v| v.severity == Severity::Error));
    assert!(!errors_only.validation.is_empty());
    let mut per_node_ok = true;
    for root in &errors_only.roots {
        if root.validation.iter().any(|v| v.severity != Severity::Error) {
            per_node_ok = false;
        }
    }
    assert!(per_node_ok);
    // Parse issues survive the filter untouched.
    assert_eq!(errors_only.issues, full.issues);
    // The filter does not disturb the builder.
    assert_eq!(builder.snapshot(), full);
}

fn assert_children_tile(node: &ParseTreeNode) {
    if node.children.is_empty() {
        return;
    }
    assert_eq!(
        node.children[0].header.range.start,
        node.header.payload_range.start,
        "first child of `{}` starts at its payload",
        node.header.typ.as_str_lossy()
    );
    for pair in node.children.windows(2) {
        assert_eq!(
            pair[0].header.range.end,
            pair[1].header.range.start,
            "siblings inside `{}` leave no gap",
            node.header.typ.as_str_lossy()
        );
    }
    assert_eq!(
        node.children.last().unwrap().header.range.end,
        node.header.payload_range.end,
        "last child of `{}` closes its payload",
        node.header.typ.as_str_lossy()
    );
    for child in &node.children {
        assert_children_tile(child);
    }
}

#[test]
fn children_tile_their_parents_payload() {
    let mut moov_payload = boxed(b"trak", &boxed(b"udta", &[]));
    moov_payload.extend_from_slice(&boxed(b"free", &[0u8; 4]));
    let mut data = boxed(b"ftyp", b"isom\0\0\0\0");
    data.extend_from_slice(&boxed(b"moov", &moov_payload));

    let mut builder = ParseTreeBuilder::new();
    for event in fixture_events(data) {
        builder.consume(&event);
    }
    let tree = builder.snapshot();

    assert_eq!(tree.node_count(), 5);
    assert!(tree.issues.is_empty());
    for root in &tree.roots {
        assert_children_tile(root);
    }
}

struct FailingReader {
    inner: MemoryReader,
    fail_past: u64,
}

impl RandomAccessReader for FailingReader {
    fn length(&self) -> u64 {
        self.inner.length()
    }

    fn read(&self, offset: u64, count: usize) -> Result<Vec<u8>, ReaderError> {
        if offset + count as u64 > self.fail_past {
            return Err(ReaderError::Io(std::io::Error::other("device gone")));
        }
        self.inner.read(offset, count)
    }
}

#[test]
fn fatal_read_failure_keeps_the_partial_snapshot() {
    let mut data = boxed(b"ftyp", b"isom\0\0\0\0");
    data.extend_from_slice(&boxed(b"moov", &boxed(b"trak", &[])));
    // Everything past ftyp is unreadable.
    let reader = FailingReader { inner: MemoryReader::new(data), fail_past: 16 };
    let pipeline = ParsePipeline::new(BoxCatalog::bundled());

    let mut builder = ParseTreeBuilder::new();
    let mut fatal = None;
    for item in pipeline.events(&reader, ParseContext::new()) {
        match item {
            Ok(event) => builder.consume(&event),
            Err(e) => {
                fatal = Some(e);
                break;
            }
        }
    }

    assert!(matches!(fatal, Some(StreamError::Fatal(_))));
    let tree = builder.snapshot();
    assert_eq!(tree.roots.len(), 1);
    assert_eq!(tree.roots[0].header.typ.as_str_lossy(), "ftyp");
    assert_eq!(tree.roots[0].status, NodeStatus::Valid);
}

fn synthetic_event(kind: ParseEventKind) -> ParseEvent {
    ParseEvent {
        kind,
        offset: 0,
        metadata: None,
        payload: None,
        validation: Vec::new(),
        issues: Vec::new(),
    }
}

fn synthetic_header(typ: &[u8; 4], start: u64, end: u64) -> BoxHeader {
    BoxHeader {
        typ: FourCC(*typ),
        uuid: None,
        declared_size: end - start,
        header_size: 8,
        payload_range: start + 8..end,
        range: start..end,
    }
}

#[test]
fn missing_finish_resynchronizes_and_leaves_partial() {
    let moov = synthetic_header(b"moov", 0, 40);
    let trak = synthetic_header(b"trak", 8, 40);

    let mut builder = ParseTreeBuilder::new();
    builder.consume(&synthetic_event(ParseEventKind::WillStart {
        header: moov.clone(),
        depth: 0,
    }));
    builder.consume(&synthetic_event(ParseEventKind::WillStart {
        header: trak.clone(),
        depth: 1,
    }));
    // trak's finish never arrives; moov's does.
    builder.consume(&synthetic_event(ParseEventKind::DidFinish {
        header: moov,
        depth: 0,
    }));

    let tree = builder.snapshot();
    assert_eq!(tree.roots.len(), 1);
    assert_eq!(tree.roots[0].status, NodeStatus::Valid);
    assert_eq!(tree.roots[0].children[0].status, NodeStatus::Partial);
}

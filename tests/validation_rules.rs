use isoinspect::{
    BoxCatalog, MemoryReader, ParseContext, ParseEvent, ParsePipeline, Severity,
};

fn boxed(typ: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
    out.extend_from_slice(typ);
    out.extend_from_slice(payload);
    out
}

fn parse(data: Vec<u8>) -> Vec<ParseEvent> {
    let reader = MemoryReader::new(data);
    let pipeline = ParsePipeline::new(BoxCatalog::bundled());
    pipeline
        .events(&reader, ParseContext::new())
        .collect::<Result<_, _>>()
        .unwrap()
}

fn findings<'a>(events: &'a [ParseEvent], rule_id: &str) -> Vec<&'a ParseEvent> {
    events
        .iter()
        .filter(|e| e.validation.iter().any(|v| v.rule_id == rule_id))
        .collect()
}

#[test]
fn boundary_violation_when_parent_is_too_short() {
    // moov's declared size leaves its second child 4 bytes short.
    let stco = boxed(b"stco", &[0u8; 8]);
    let mut stsz_full = boxed(b"stsz", &[0u8; 8]);
    let moov_size = 8 + stco.len() + stsz_full.len() - 4;
    stsz_full.truncate(stsz_full.len() - 4);

    let mut data = Vec::new();
    data.extend_from_slice(&(moov_size as u32).to_be_bytes());
    data.extend_from_slice(b"moov");
    data.extend_from_slice(&stco);
    data.extend_from_slice(&stsz_full);

    let events = parse(data);
    let hits = findings(&events, "VR-002");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].header().typ.as_str_lossy(), "stsz");
    assert!(
        hits[0]
            .validation
            .iter()
            .any(|v| v.rule_id == "VR-002" && v.severity == Severity::Error)
    );
    // The clamp also registers as a structural size finding on the child.
    assert!(!findings(&events, "VR-001").is_empty());
}

#[test]
fn short_closure_is_reported_on_the_container() {
    // moov declares 4 bytes of payload beyond its last child.
    let stco = boxed(b"stco", &[0u8; 8]);
    let mut data = Vec::new();
    data.extend_from_slice(&((8 + stco.len() + 4) as u32).to_be_bytes());
    data.extend_from_slice(b"moov");
    data.extend_from_slice(&stco);
    data.extend_from_slice(&[0u8; 4]);
    let events = parse(data);

    let hits = findings(&events, "VR-002");
    assert_eq!(hits.len(), 1);
    let event = hits[0];
    assert!(!event.is_start());
    assert_eq!(event.header().typ.as_str_lossy(), "moov");
    let finding = event.validation.iter().find(|v| v.rule_id == "VR-002").unwrap();
    assert_eq!(finding.severity, Severity::Error);
    // The stray tail is also too small for a header, so recovery records it.
    assert_eq!(event.issues.len(), 1);
    assert_eq!(event.issues[0].code, "recovery.truncated");
    // The child parsed before the damage stays in the stream.
    assert!(
        events
            .iter()
            .any(|e| e.is_start() && e.header().typ.as_str_lossy() == "stco")
    );
}

#[test]
fn media_box_before_ftyp_is_flagged() {
    let events = parse(boxed(b"mdat", &[0u8; 8]));
    let hits = findings(&events, "VR-004");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].header().typ.as_str_lossy(), "mdat");
}

#[test]
fn toplevel_structure_box_before_ftyp_is_flagged() {
    // Any media structure box counts, not just the common top-level four.
    let mut data = boxed(b"trak", &[]);
    data.extend_from_slice(&boxed(b"ftyp", b"isom\0\0\0\0"));
    let events = parse(data);

    let hits = findings(&events, "VR-004");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].header().typ.as_str_lossy(), "trak");
}

#[test]
fn ftyp_first_satisfies_ordering() {
    let mut data = boxed(b"ftyp", b"isom\0\0\0\0");
    data.extend_from_slice(&boxed(b"mdat", &[0u8; 8]));
    let events = parse(data);
    assert!(findings(&events, "VR-004").is_empty());
}

#[test]
fn mdat_before_moov_without_streaming_indicator_warns() {
    let mut data = boxed(b"ftyp", b"isom\0\0\0\0");
    data.extend_from_slice(&boxed(b"mdat", &[0u8; 8]));
    data.extend_from_slice(&boxed(b"moov", &[]));
    let events = parse(data);

    let hits = findings(&events, "VR-005");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].header().typ.as_str_lossy(), "mdat");
    assert!(
        hits[0]
            .validation
            .iter()
            .any(|v| v.rule_id == "VR-005" && v.severity == Severity::Warning)
    );
}

#[test]
fn mdat_with_no_moov_at_all_still_warns() {
    let mut data = boxed(b"ftyp", b"isom\0\0\0\0");
    data.extend_from_slice(&boxed(b"mdat", &[0u8; 8]));
    let events = parse(data);

    let hits = findings(&events, "VR-005");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].header().typ.as_str_lossy(), "mdat");
}

#[test]
fn indicator_after_mdat_does_not_suppress_the_warning() {
    let mut data = boxed(b"ftyp", b"isom\0\0\0\0");
    data.extend_from_slice(&boxed(b"mdat", &[0u8; 8]));
    data.extend_from_slice(&boxed(b"sidx", &[0u8; 8]));
    data.extend_from_slice(&boxed(b"moov", &[]));
    let events = parse(data);

    let hits = findings(&events, "VR-005");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].header().typ.as_str_lossy(), "mdat");
}

#[test]
fn streaming_indicator_suppresses_ordering_warning() {
    let mut data = boxed(b"styp", b"msdh\0\0\0\0");
    data.extend_from_slice(&boxed(b"mdat", &[0u8; 8]));
    data.extend_from_slice(&boxed(b"moov", &[]));
    let events = parse(data);
    assert!(findings(&events, "VR-005").is_empty());
}

#[test]
fn ssix_counts_as_a_streaming_indicator() {
    let mut data = boxed(b"ssix", &[0u8; 8]);
    data.extend_from_slice(&boxed(b"mdat", &[0u8; 8]));
    let events = parse(data);
    assert!(findings(&events, "VR-005").is_empty());
}

#[test]
fn unexpected_full_box_flags_warn() {
    // vmhd is expected to carry flags 0x000001; zero flags trip the rule.
    let events = parse(boxed(b"vmhd", &[0u8; 12]));
    let hits = findings(&events, "VR-003");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].header().typ.as_str_lossy(), "vmhd");
}

#[test]
fn conforming_full_box_passes() {
    let mut payload = vec![0x00, 0x00, 0x00, 0x01];
    payload.extend_from_slice(&[0u8; 8]);
    let events = parse(boxed(b"vmhd", &payload));
    assert!(findings(&events, "VR-003").is_empty());
}

#[test]
fn uncataloged_type_is_informational() {
    let events = parse(boxed(b"zzzz", &[0u8; 4]));
    let hits = findings(&events, "VR-006");
    assert_eq!(hits.len(), 1);
    assert!(
        hits[0]
            .validation
            .iter()
            .any(|v| v.rule_id == "VR-006" && v.severity == Severity::Info)
    );
}

fn full_box(typ: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(body);
    boxed(typ, &payload)
}

#[test]
fn sample_count_mismatch_is_an_error() {
    // stts describes two samples, stsz declares three.
    let mut stts_body = Vec::new();
    stts_body.extend_from_slice(&1u32.to_be_bytes()); // entry_count
    stts_body.extend_from_slice(&2u32.to_be_bytes()); // sample_count
    stts_body.extend_from_slice(&100u32.to_be_bytes()); // sample_delta
    let mut stsz_body = Vec::new();
    stsz_body.extend_from_slice(&0u32.to_be_bytes()); // sample_size
    stsz_body.extend_from_slice(&3u32.to_be_bytes()); // sample_count
    let mut stco_body = Vec::new();
    stco_body.extend_from_slice(&1u32.to_be_bytes());
    stco_body.extend_from_slice(&0u32.to_be_bytes());

    let mut stbl_payload = full_box(b"stts", &stts_body);
    stbl_payload.extend_from_slice(&full_box(b"stsz", &stsz_body));
    stbl_payload.extend_from_slice(&full_box(b"stco", &stco_body));
    let events = parse(boxed(b"stbl", &stbl_payload));

    let hits = findings(&events, "VR-007");
    assert_eq!(hits.len(), 1);
    // The correlation resolves when the sample table closes.
    assert!(!hits[0].is_start());
    assert_eq!(hits[0].header().typ.as_str_lossy(), "stbl");
    let finding = hits[0]
        .validation
        .iter()
        .find(|v| v.rule_id == "VR-007")
        .unwrap();
    assert_eq!(finding.severity, Severity::Error);
    assert!(finding.message.contains('2') && finding.message.contains('3'));
}

#[test]
fn consistent_sample_tables_pass() {
    let mut stts_body = Vec::new();
    stts_body.extend_from_slice(&1u32.to_be_bytes());
    stts_body.extend_from_slice(&3u32.to_be_bytes());
    stts_body.extend_from_slice(&100u32.to_be_bytes());
    let mut stsz_body = Vec::new();
    stsz_body.extend_from_slice(&0u32.to_be_bytes());
    stsz_body.extend_from_slice(&3u32.to_be_bytes());
    let mut stco_body = Vec::new();
    stco_body.extend_from_slice(&1u32.to_be_bytes());
    stco_body.extend_from_slice(&0u32.to_be_bytes());

    let mut stbl_payload = full_box(b"stts", &stts_body);
    stbl_payload.extend_from_slice(&full_box(b"stsz", &stsz_body));
    stbl_payload.extend_from_slice(&full_box(b"stco", &stco_body));
    let events = parse(boxed(b"stbl", &stbl_payload));
    assert!(findings(&events, "VR-007").is_empty());
}

#[test]
fn regressing_fragment_sequence_warns() {
    let mfhd = |seq: u32| full_box(b"mfhd", &seq.to_be_bytes());
    let mut data = boxed(b"moof", &mfhd(5));
    data.extend_from_slice(&boxed(b"moof", &mfhd(5)));
    let events = parse(data);

    let hits = findings(&events, "VR-008");
    assert_eq!(hits.len(), 1);
    assert!(hits[0].header().start_offset() > 0, "second fragment is the offender");
}

#[test]
fn increasing_fragment_sequence_passes() {
    let mfhd = |seq: u32| full_box(b"mfhd", &seq.to_be_bytes());
    let mut data = boxed(b"moof", &mfhd(1));
    data.extend_from_slice(&boxed(b"moof", &mfhd(2)));
    let events = parse(data);
    assert!(findings(&events, "VR-008").is_empty());
}

#[test]
fn trun_sample_table_overflow_is_an_error() {
    // flags request data_offset plus duration and size per sample; ten
    // samples cannot fit a 12-byte payload.
    let mut body = Vec::new();
    body.extend_from_slice(&0x0000_0301u32.to_be_bytes()); // version 0, flags
    body.extend_from_slice(&10u32.to_be_bytes()); // sample_count
    body.extend_from_slice(&0u32.to_be_bytes()); // data_offset
    let events = parse(boxed(b"trun", &body));

    let hits = findings(&events, "VR-009");
    assert_eq!(hits.len(), 1);
    let finding = hits[0]
        .validation
        .iter()
        .find(|v| v.rule_id == "VR-009")
        .unwrap();
    assert_eq!(finding.severity, Severity::Error);
}

#[test]
fn empty_trun_warns() {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes());
    let events = parse(boxed(b"trun", &body));

    let hits = findings(&events, "VR-009");
    assert_eq!(hits.len(), 1);
    let finding = hits[0]
        .validation
        .iter()
        .find(|v| v.rule_id == "VR-009")
        .unwrap();
    assert_eq!(finding.severity, Severity::Warning);
}

//! Per-type payload decoders.
//!
//! Decoding is a capability lookup: a [`DecoderRegistry`] maps a box key to a
//! decoder function. Unknown types have no decoder and carry no payload.
//! Decoders receive the raw payload bytes (capped, see
//! [`MAX_DECODE_PAYLOAD`]) and return an ordered field list; they tolerate
//! short payloads by reporting what they could read.

use std::collections::HashMap;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;

use crate::boxes::{BoxHeader, BoxKey, ByteRange, FourCC};

/// Payload bytes handed to a decoder are capped at this many bytes; table
/// decoders summarise instead of materialising oversized entry lists.
pub const MAX_DECODE_PAYLOAD: usize = 1 << 20;

/// One named, display-ready field decoded from a box payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadField {
    pub name: String,
    pub value: String,
    pub description: Option<String>,
    /// Absolute byte sub-range the field was decoded from.
    pub range: Option<ByteRange>,
}

/// Ordered sequence of decoded fields for one box.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedBoxPayload {
    pub fields: Vec<PayloadField>,
}

impl ParsedBoxPayload {
    pub fn field(&self, name: &str) -> Option<&PayloadField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A decoder for one specific box type.
pub trait PayloadDecoder: Send + Sync {
    fn decode(&self, data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload>;
}

impl<F> PayloadDecoder for F
where
    F: Fn(&[u8], &BoxHeader) -> anyhow::Result<ParsedBoxPayload> + Send + Sync,
{
    fn decode(&self, data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
        self(data, header)
    }
}

/// Registry of decoders keyed by [`BoxKey`]. Immutable once constructed; use
/// [`DecoderRegistry::with_decoder`] to build it fluently.
#[derive(Default)]
pub struct DecoderRegistry {
    map: HashMap<BoxKey, Box<dyn PayloadDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decoder(mut self, key: BoxKey, decoder: Box<dyn PayloadDecoder>) -> Self {
        self.map.insert(key, decoder);
        self
    }

    pub fn has_decoder(&self, key: &BoxKey) -> bool {
        self.map.contains_key(key)
    }

    /// `None` when no decoder is registered for the key.
    pub fn decode(
        &self,
        key: &BoxKey,
        data: &[u8],
        header: &BoxHeader,
    ) -> Option<anyhow::Result<ParsedBoxPayload>> {
        self.map.get(key).map(|d| d.decode(data, header))
    }
}

// ---------- Decoding helpers ----------

/// Builds the field list while tracking the absolute offset of each field.
struct FieldWriter<'a> {
    data: &'a [u8],
    base: u64,
    pos: usize,
    out: ParsedBoxPayload,
}

impl<'a> FieldWriter<'a> {
    fn new(data: &'a [u8], header: &BoxHeader) -> Self {
        Self { data, base: header.payload_range.start, pos: 0, out: ParsedBoxPayload::default() }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn push(&mut self, name: &str, value: String, len: usize, description: Option<&str>) {
        let start = self.base + self.pos as u64;
        self.out.fields.push(PayloadField {
            name: name.to_string(),
            value,
            description: description.map(str::to_string),
            range: Some(start..start + len as u64),
        });
        self.pos += len;
    }

    fn note(&mut self, name: &str, value: impl Into<String>) {
        self.out.fields.push(PayloadField {
            name: name.to_string(),
            value: value.into(),
            description: None,
            range: None,
        });
    }

    fn u8(&mut self, name: &str, description: Option<&str>) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let v = self.data[self.pos];
        self.push(name, v.to_string(), 1, description);
        Some(v)
    }

    fn u16(&mut self, name: &str, description: Option<&str>) -> Option<u16> {
        if self.remaining() < 2 {
            return None;
        }
        let v = u16::from_be_bytes(self.data[self.pos..self.pos + 2].try_into().unwrap());
        self.push(name, v.to_string(), 2, description);
        Some(v)
    }

    fn u32(&mut self, name: &str, description: Option<&str>) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = u32::from_be_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.push(name, v.to_string(), 4, description);
        Some(v)
    }

    fn u64(&mut self, name: &str, description: Option<&str>) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let v = u64::from_be_bytes(self.data[self.pos..self.pos + 8].try_into().unwrap());
        self.push(name, v.to_string(), 8, description);
        Some(v)
    }

    fn fourcc(&mut self, name: &str, description: Option<&str>) -> Option<FourCC> {
        if self.remaining() < 4 {
            return None;
        }
        let cc = FourCC(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.push(name, cc.to_string(), 4, description);
        Some(cc)
    }

    /// Version + 24-bit flags, the FullBox preamble.
    fn version_flags(&mut self) -> Option<(u8, u32)> {
        if self.remaining() < 4 {
            self.note("note", format!("payload too short ({} bytes)", self.data.len()));
            return None;
        }
        let version = self.data[self.pos];
        self.push("version", version.to_string(), 1, None);
        let f = &self.data[self.pos..self.pos + 3];
        let flags = ((f[0] as u32) << 16) | ((f[1] as u32) << 8) | f[2] as u32;
        self.push("flags", format!("0x{flags:06x}"), 3, None);
        Some((version, flags))
    }

    fn skip(&mut self, len: usize) -> bool {
        if self.remaining() < len {
            return false;
        }
        self.pos += len;
        true
    }

    fn finish(self) -> ParsedBoxPayload {
        self.out
    }
}

// ---------- Decoders ----------

fn decode_ftyp(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    if w.fourcc("major_brand", None).is_none() {
        w.note("note", format!("payload too short ({} bytes)", data.len()));
        return Ok(w.finish());
    }
    w.u32("minor_version", None);
    let mut brands = Vec::new();
    let start = w.base + w.pos as u64;
    let mut len = 0usize;
    while w.remaining() >= 4 {
        let cc = FourCC(data[w.pos..w.pos + 4].try_into().unwrap());
        brands.push(cc.to_string());
        w.skip(4);
        len += 4;
    }
    if !brands.is_empty() {
        w.out.fields.push(PayloadField {
            name: "compatible_brands".into(),
            value: brands.join(", "),
            description: None,
            range: Some(start..start + len as u64),
        });
    }
    Ok(w.finish())
}

fn decode_mvhd(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    let Some((version, _)) = w.version_flags() else { return Ok(w.finish()) };
    if version == 1 {
        w.u64("creation_time", None);
        w.u64("modification_time", None);
        w.u32("timescale", Some("time units per second"));
        w.u64("duration", None);
    } else {
        w.u32("creation_time", None);
        w.u32("modification_time", None);
        w.u32("timescale", Some("time units per second"));
        w.u32("duration", None);
    }
    // rate (16.16) + volume (8.8)
    if let Some(rate) = w.u32("rate", Some("16.16 fixed point")) {
        if let Some(last) = w.out.fields.last_mut() {
            last.value = format!("{:.2}", rate as f64 / 65536.0);
        }
    }
    if w.skip(2 + 2 + 8 + 36 + 24) {
        w.u32("next_track_id", None);
    }
    Ok(w.finish())
}

fn decode_tkhd(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    let Some((version, _)) = w.version_flags() else { return Ok(w.finish()) };
    if version == 1 {
        w.u64("creation_time", None);
        w.u64("modification_time", None);
        w.u32("track_id", None);
        w.skip(4);
        w.u64("duration", None);
    } else {
        w.u32("creation_time", None);
        w.u32("modification_time", None);
        w.u32("track_id", None);
        w.skip(4);
        w.u32("duration", None);
    }
    // reserved[2] + layer/alternate_group/volume/reserved + matrix
    if !w.skip(8 + 8 + 36) {
        return Ok(w.finish());
    }
    if let Some(width) = w.u32("width", Some("16.16 fixed point")) {
        if let Some(last) = w.out.fields.last_mut() {
            last.value = format!("{:.0}", width as f64 / 65536.0);
        }
    }
    if let Some(height) = w.u32("height", Some("16.16 fixed point")) {
        if let Some(last) = w.out.fields.last_mut() {
            last.value = format!("{:.0}", height as f64 / 65536.0);
        }
    }
    Ok(w.finish())
}

fn language_from_packed(code: u16) -> String {
    if code == 0 {
        return "und".into();
    }
    let c1 = (((code >> 10) & 0x1F) as u8 + 0x60) as char;
    let c2 = (((code >> 5) & 0x1F) as u8 + 0x60) as char;
    let c3 = ((code & 0x1F) as u8 + 0x60) as char;
    format!("{c1}{c2}{c3}")
}

fn decode_mdhd(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    let Some((version, _)) = w.version_flags() else { return Ok(w.finish()) };
    if version == 1 {
        w.u64("creation_time", None);
        w.u64("modification_time", None);
        w.u32("timescale", None);
        w.u64("duration", None);
    } else {
        w.u32("creation_time", None);
        w.u32("modification_time", None);
        w.u32("timescale", None);
        w.u32("duration", None);
    }
    if let Some(packed) = w.u16("language", Some("ISO 639-2, packed 5-bit")) {
        if let Some(last) = w.out.fields.last_mut() {
            last.value = language_from_packed(packed);
        }
    }
    Ok(w.finish())
}

fn decode_hdlr(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    if w.version_flags().is_none() {
        return Ok(w.finish());
    }
    w.skip(4); // pre_defined
    w.fourcc("handler_type", Some("vide, soun, hint, meta, ..."));
    if w.skip(12) {
        let start = w.base + w.pos as u64;
        let mut name_bytes = &data[w.pos..];
        while name_bytes.last() == Some(&0) {
            name_bytes = &name_bytes[..name_bytes.len() - 1];
        }
        let name = String::from_utf8_lossy(name_bytes).to_string();
        let len = data.len() - w.pos;
        w.out.fields.push(PayloadField {
            name: "name".into(),
            value: name,
            description: None,
            range: Some(start..start + len as u64),
        });
    }
    Ok(w.finish())
}

fn decode_elst(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    let Some((version, _)) = w.version_flags() else { return Ok(w.finish()) };
    let Some(entry_count) = w.u32("entry_count", None) else { return Ok(w.finish()) };
    let mut cur = Cursor::new(&data[w.pos..]);
    let mut summaries = Vec::new();
    let shown = entry_count.min(16);
    for _ in 0..shown {
        let (duration, media_time) = if version == 1 {
            match (cur.read_u64::<BigEndian>(), cur.read_i64::<BigEndian>()) {
                (Ok(d), Ok(t)) => (d, t),
                _ => break,
            }
        } else {
            match (cur.read_u32::<BigEndian>(), cur.read_i32::<BigEndian>()) {
                (Ok(d), Ok(t)) => (d as u64, t as i64),
                _ => break,
            }
        };
        let Ok(rate_int) = cur.read_i16::<BigEndian>() else { break };
        let Ok(_rate_frac) = cur.read_i16::<BigEndian>() else { break };
        summaries.push(format!(
            "duration={duration} media_time={media_time} rate={rate_int}"
        ));
    }
    let decoded = summaries.len() as u32;
    for (i, s) in summaries.into_iter().enumerate() {
        w.note(&format!("entry[{i}]"), s);
    }
    if decoded < shown {
        w.note(
            "note",
            format!("entry table truncated: {decoded} of {entry_count} entries present"),
        );
    } else if entry_count > 16 {
        w.note("note", format!("{} further entries elided", entry_count - 16));
    }
    Ok(w.finish())
}

fn decode_stts(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    if w.version_flags().is_none() {
        return Ok(w.finish());
    }
    let Some(entry_count) = w.u32("entry_count", None) else { return Ok(w.finish()) };
    let mut cur = Cursor::new(&data[w.pos..]);
    let mut total: u64 = 0;
    let mut decoded = 0u32;
    for _ in 0..entry_count {
        let Ok(sample_count) = cur.read_u32::<BigEndian>() else { break };
        let Ok(_delta) = cur.read_u32::<BigEndian>() else { break };
        total += sample_count as u64;
        decoded += 1;
    }
    if decoded < entry_count {
        w.note(
            "note",
            format!("entry table truncated: {decoded} of {entry_count} entries present"),
        );
    }
    w.note("total_samples", total.to_string());
    Ok(w.finish())
}

fn decode_stsc(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    if w.version_flags().is_none() {
        return Ok(w.finish());
    }
    w.u32("entry_count", None);
    Ok(w.finish())
}

fn decode_stsz(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    if w.version_flags().is_none() {
        return Ok(w.finish());
    }
    let sample_size = w.u32("sample_size", Some("0 means per-sample sizes follow"));
    let sample_count = w.u32("sample_count", None);
    if let (Some(0), Some(count)) = (sample_size, sample_count) {
        let available = (w.remaining() / 4) as u32;
        if available < count {
            w.note(
                "note",
                format!("size table truncated: {available} of {count} entries present"),
            );
        }
    }
    Ok(w.finish())
}

fn decode_chunk_offsets32(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    if w.version_flags().is_none() {
        return Ok(w.finish());
    }
    w.u32("entry_count", None);
    Ok(w.finish())
}

fn decode_chunk_offsets64(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    if w.version_flags().is_none() {
        return Ok(w.finish());
    }
    w.u32("entry_count", None);
    Ok(w.finish())
}

fn decode_stss(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    if w.version_flags().is_none() {
        return Ok(w.finish());
    }
    w.u32("entry_count", Some("sync (random access) samples"));
    Ok(w.finish())
}

fn decode_sidx(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    let Some((version, _)) = w.version_flags() else { return Ok(w.finish()) };
    w.u32("reference_id", None);
    w.u32("timescale", None);
    if version == 1 {
        w.u64("earliest_presentation_time", None);
        w.u64("first_offset", None);
    } else {
        w.u32("earliest_presentation_time", None);
        w.u32("first_offset", None);
    }
    w.skip(2);
    w.u16("reference_count", None);
    Ok(w.finish())
}

fn decode_mfhd(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    if w.version_flags().is_none() {
        return Ok(w.finish());
    }
    w.u32("sequence_number", Some("increments per movie fragment"));
    Ok(w.finish())
}

fn decode_tfdt(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    let Some((version, _)) = w.version_flags() else { return Ok(w.finish()) };
    if version == 1 {
        w.u64("base_media_decode_time", None);
    } else {
        w.u32("base_media_decode_time", None);
    }
    Ok(w.finish())
}

/// Byte width of one trun table entry for the given tr_flags.
pub fn trun_entry_len(flags: u32) -> u64 {
    let mut len = 0u64;
    if flags & 0x000100 != 0 {
        len += 4; // sample_duration
    }
    if flags & 0x000200 != 0 {
        len += 4; // sample_size
    }
    if flags & 0x000400 != 0 {
        len += 4; // sample_flags
    }
    if flags & 0x000800 != 0 {
        len += 4; // sample_composition_time_offset
    }
    len
}

fn decode_trun(data: &[u8], header: &BoxHeader) -> anyhow::Result<ParsedBoxPayload> {
    let mut w = FieldWriter::new(data, header);
    let Some((_, flags)) = w.version_flags() else { return Ok(w.finish()) };
    let Some(sample_count) = w.u32("sample_count", None) else { return Ok(w.finish()) };
    if flags & 0x000001 != 0 {
        w.u32("data_offset", Some("relative to the moof base"));
    }
    if flags & 0x000004 != 0 {
        w.u32("first_sample_flags", None);
    }
    let entry_len = trun_entry_len(flags);
    w.note(
        "entry_table",
        format!("{sample_count} samples x {entry_len} bytes"),
    );
    Ok(w.finish())
}

/// Registry covering the well-known leaf boxes this crate decodes.
pub fn default_registry() -> DecoderRegistry {
    fn key(typ: &[u8; 4]) -> BoxKey {
        BoxKey::FourCC(FourCC(*typ))
    }

    DecoderRegistry::new()
        .with_decoder(key(b"ftyp"), Box::new(decode_ftyp))
        .with_decoder(key(b"styp"), Box::new(decode_ftyp))
        .with_decoder(key(b"mvhd"), Box::new(decode_mvhd))
        .with_decoder(key(b"tkhd"), Box::new(decode_tkhd))
        .with_decoder(key(b"mdhd"), Box::new(decode_mdhd))
        .with_decoder(key(b"hdlr"), Box::new(decode_hdlr))
        .with_decoder(key(b"elst"), Box::new(decode_elst))
        .with_decoder(key(b"stts"), Box::new(decode_stts))
        .with_decoder(key(b"stsc"), Box::new(decode_stsc))
        .with_decoder(key(b"stsz"), Box::new(decode_stsz))
        .with_decoder(key(b"stco"), Box::new(decode_chunk_offsets32))
        .with_decoder(key(b"co64"), Box::new(decode_chunk_offsets64))
        .with_decoder(key(b"stss"), Box::new(decode_stss))
        .with_decoder(key(b"sidx"), Box::new(decode_sidx))
        .with_decoder(key(b"mfhd"), Box::new(decode_mfhd))
        .with_decoder(key(b"tfdt"), Box::new(decode_tfdt))
        .with_decoder(key(b"trun"), Box::new(decode_trun))
}

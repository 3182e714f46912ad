//! The wire-format version upgrade pipeline.
//!
//! A frame at revision N re-parses as a flat sequence of primitive values
//! (`klasses, stores, len, doc, len, payload, ...`; each length prefix is
//! itself a MessagePack integer and each payload span is exactly one
//! MessagePack value). An upgrade stage is a pure transformation of that
//! sequence from revision N to revision N+1, needing only the class/store
//! metadata it finds in the sequence itself, never the typed object model.
//!
//! Stages are pull-based iterators and compose by chaining, so a 1→3
//! upgrade streams through revision 2 section by section instead of
//! materializing the intermediate frame. The registry is a plain ordered
//! list resolved by source revision; adding a future revision means adding
//! one stage, not touching the existing ones.
//!
//! Revisions defined:
//!
//! 1. original (implicit on the wire)
//! 2. slice traits become presence markers; slice stops become lengths
//! 3. ambiguous raw values split into text vs binary by UTF-8 validity

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};

use log::debug;

use crate::codec;
use crate::constants::{CURRENT_VERSION, IS_SLICE};
use crate::error::{DocrepError, Result};
use crate::frame::Value;

/// A pull-based stream of primitive values, one frame's worth.
pub type Messages<'a> = Box<dyn Iterator<Item = Result<Value>> + 'a>;

/// One single-revision transformer stage.
pub trait UpgradeStage {
    /// The revision this stage consumes; it produces `source_version() + 1`.
    fn source_version(&self) -> u32;

    /// Wraps `input` (a frame's value sequence at the source revision,
    /// version value already stripped) into the equivalent sequence at the
    /// next revision. Stages do not emit a version value.
    fn apply<'a>(&self, input: Messages<'a>) -> Messages<'a>;
}

/// The ordered stage list, indexed by source revision.
pub fn registry() -> &'static [&'static dyn UpgradeStage] {
    const STAGES: &[&dyn UpgradeStage] = &[&SliceRelativeStage, &StringTypeStage];
    STAGES
}

fn stage_for(version: u32) -> Result<&'static dyn UpgradeStage> {
    registry()
        .iter()
        .find(|s| s.source_version() == version)
        .copied()
        .ok_or_else(|| {
            DocrepError::UnsupportedUpgrade(format!("no stage upgrades from revision {version}"))
        })
}

/// Upgrades every frame read from `input` to `target`, writing the result
/// to `output`. Returns the number of frames processed.
///
/// Frames already at `target` are copied through with their payload bytes
/// untouched. A frame whose declared revision exceeds `target` is a fatal
/// [`DocrepError::UnsupportedUpgrade`], as is a `target` above
/// [`CURRENT_VERSION`] (rejected before anything is read). Each frame is
/// staged into a buffer and written whole, so no partial frame ever reaches
/// the output.
pub fn upgrade_stream<R: Read, W: Write>(
    mut input: R,
    mut output: W,
    target: u32,
) -> Result<u64> {
    if target < 1 || target > CURRENT_VERSION {
        return Err(DocrepError::UnsupportedUpgrade(format!(
            "target revision {target} is outside the supported range 1..={CURRENT_VERSION}"
        )));
    }

    let mut frames = 0u64;
    loop {
        let first = match codec::read_value_opt(&mut input)? {
            None => break,
            Some(v) => v,
        };
        let version = match &first {
            Value::Integer(n) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v >= 1)
                .ok_or_else(|| DocrepError::Codec(format!("invalid frame version {n}")))?,
            _ => 1,
        };
        if version > target {
            return Err(DocrepError::UnsupportedUpgrade(format!(
                "frame at revision {version} cannot be downgraded to {target}"
            )));
        }
        debug!("frame {frames}: revision {version} -> {target}");

        let mut buf = Vec::new();
        if version == target {
            // Nothing to transform; the raw-frame codec keeps the payload
            // sections packed, so the copy is byte-preserving.
            let mut frame = codec::decode_frame_rest(first, &mut input)?;
            codec::encode_frame(&mut frame, &mut buf)?;
        } else {
            // An explicit version integer (1 included) was consumed as the
            // version; only an implicit-revision frame opens with the
            // klasses message, which must be replayed into the stages.
            let pushback = match first {
                Value::Integer(_) => None,
                other => Some(other),
            };
            let mut messages: Messages<'_> =
                Box::new(FrameMessages::new(&mut input, pushback));
            for v in version..target {
                messages = stage_for(v)?.apply(messages);
            }
            codec::write_value(&mut buf, &Value::from(target))?;
            for message in messages {
                codec::write_value(&mut buf, &message?)?;
            }
        }
        output.write_all(&buf)?;
        frames += 1;
    }
    Ok(frames)
}

/// Bounded view of one frame as a value sequence: klasses, stores, then a
/// length/payload value pair for the document and for each store. Ends
/// after the last payload; exhaustion of the underlying stream anywhere
/// inside is a truncation.
struct FrameMessages<'a, R: Read> {
    input: &'a mut R,
    pushback: Option<Value>,
    state: FrameState,
    sections_left: usize,
    failed: bool,
}

enum FrameState {
    Klasses,
    Stores,
    Len,
    Payload,
    Done,
}

impl<'a, R: Read> FrameMessages<'a, R> {
    fn new(input: &'a mut R, pushback: Option<Value>) -> Self {
        Self {
            input,
            pushback,
            state: FrameState::Klasses,
            sections_left: 0,
            failed: false,
        }
    }

    fn pull(&mut self) -> Result<Value> {
        match self.pushback.take() {
            Some(v) => Ok(v),
            None => codec::read_value_mid(self.input),
        }
    }
}

impl<R: Read> Iterator for FrameMessages<'_, R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let step = |this: &mut Self| -> Result<Option<Value>> {
            match this.state {
                FrameState::Klasses => {
                    let v = this.pull()?;
                    this.state = FrameState::Stores;
                    Ok(Some(v))
                }
                FrameState::Stores => {
                    let v = this.pull()?;
                    let nstores = v.as_array().map(Vec::len).ok_or_else(|| {
                        DocrepError::Codec(format!("stores must be an array, got {v}"))
                    })?;
                    this.sections_left = nstores + 1;
                    this.state = FrameState::Len;
                    Ok(Some(v))
                }
                FrameState::Len => {
                    let v = this.pull()?;
                    this.state = FrameState::Payload;
                    Ok(Some(v))
                }
                FrameState::Payload => {
                    let v = this.pull()?;
                    this.sections_left -= 1;
                    this.state = if this.sections_left == 0 {
                        FrameState::Done
                    } else {
                        FrameState::Len
                    };
                    Ok(Some(v))
                }
                FrameState::Done => Ok(None),
            }
        };
        match step(self) {
            Ok(Some(v)) => Some(Ok(v)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn ended_early() -> DocrepError {
    DocrepError::TruncatedFrame("values ended mid-document".into())
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Nil => false,
        Value::Boolean(b) => *b,
        Value::Integer(n) => n.as_i64() != Some(0) && n.as_u64() != Some(0),
        _ => true,
    }
}

/// Re-encodes `value` and returns the integer message carrying its new
/// byte length.
fn recomputed_len(value: &Value) -> Result<Value> {
    let mut buf = Vec::new();
    codec::write_value(&mut buf, value)?;
    Ok(Value::from(buf.len() as u64))
}

// --- Stage 1 -> 2: relative slice stops, marker-form slice traits ---

/// Revision 1→2: every truthy `IS_SLICE` trait becomes the nil presence
/// marker, and every non-nil slice value in affected sections has its final
/// component rewritten from an absolute stop to a length. Sections whose
/// class has no flagged field pass through, original length message
/// included.
pub struct SliceRelativeStage;

impl UpgradeStage for SliceRelativeStage {
    fn source_version(&self) -> u32 {
        1
    }

    fn apply<'a>(&self, input: Messages<'a>) -> Messages<'a> {
        Box::new(SliceRelative {
            input,
            out: VecDeque::new(),
            step: SliceStep::Klasses,
            slice_fields: HashMap::new(),
            nklasses: 0,
            pending: VecDeque::new(),
            done: false,
        })
    }
}

enum SliceStep {
    Klasses,
    Stores,
    Sections,
}

struct SliceRelative<'a> {
    input: Messages<'a>,
    out: VecDeque<Value>,
    step: SliceStep,
    /// Class index -> positions of its slice fields.
    slice_fields: HashMap<u64, Vec<u64>>,
    nklasses: usize,
    /// Class index per remaining section: the meta class first (positional
    /// class 0 by convention), then each store's class in store order.
    pending: VecDeque<u64>,
    done: bool,
}

impl SliceRelative<'_> {
    fn pull(&mut self) -> Result<Value> {
        self.input.next().unwrap_or_else(|| Err(ended_early()))
    }

    fn advance(&mut self) -> Result<()> {
        match self.step {
            SliceStep::Klasses => {
                let mut klasses = self.pull()?;
                self.flag_slice_fields(&mut klasses)?;
                self.out.push_back(klasses);
                self.step = SliceStep::Stores;
            }
            SliceStep::Stores => {
                let stores = self.pull()?;
                let entries = stores.as_array().ok_or_else(|| {
                    DocrepError::Codec(format!("stores must be an array, got {stores}"))
                })?;
                // The document section is interpreted with class 0.
                self.pending.push_back(0);
                for entry in entries {
                    let klass = entry
                        .as_array()
                        .and_then(|parts| parts.get(1))
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            DocrepError::Codec(format!("malformed store definition {entry}"))
                        })?;
                    if klass as usize >= self.nklasses {
                        return Err(DocrepError::MalformedHeader(format!(
                            "store references class {klass} but only {} classes are defined",
                            self.nklasses
                        )));
                    }
                    self.pending.push_back(klass);
                }
                self.out.push_back(stores);
                self.step = SliceStep::Sections;
            }
            SliceStep::Sections => {
                let klass = match self.pending.pop_front() {
                    Some(k) => k,
                    None => {
                        self.done = true;
                        return Ok(());
                    }
                };
                let len = self.pull()?;
                let mut payload = self.pull()?;
                match self.slice_fields.get(&klass) {
                    Some(fields) if !fields.is_empty() => {
                        let fields = fields.clone();
                        rewrite_section_slices(&mut payload, &fields);
                        self.out.push_back(recomputed_len(&payload)?);
                        self.out.push_back(payload);
                    }
                    _ => {
                        // Untouched: keep the original length message so the
                        // section stays byte-identical.
                        self.out.push_back(len);
                        self.out.push_back(payload);
                    }
                }
            }
        }
        Ok(())
    }

    /// Rewrites truthy `IS_SLICE` trait values to nil in place, recording
    /// which (class, field) positions carry the flag.
    fn flag_slice_fields(&mut self, klasses: &mut Value) -> Result<()> {
        let classes = match klasses {
            Value::Array(classes) => classes,
            other => {
                return Err(DocrepError::Codec(format!(
                    "klasses must be an array, got {other}"
                )))
            }
        };
        self.nklasses = classes.len();
        for (knum, klass) in classes.iter_mut().enumerate() {
            let fields = match klass {
                Value::Array(parts) => match parts.get_mut(1) {
                    Some(Value::Array(fields)) => fields,
                    _ => {
                        return Err(DocrepError::Codec(
                            "class definition has no field list".into(),
                        ))
                    }
                },
                _ => {
                    return Err(DocrepError::Codec(
                        "class definition must be an array".into(),
                    ))
                }
            };
            for (fnum, field) in fields.iter_mut().enumerate() {
                let entries = match field {
                    Value::Map(entries) => entries,
                    _ => {
                        return Err(DocrepError::Codec(
                            "field definition must be a map".into(),
                        ))
                    }
                };
                for (key, value) in entries.iter_mut() {
                    if key.as_i64() == Some(IS_SLICE) && is_truthy(value) {
                        // Nil is the new true: presence of the key is the flag.
                        *value = Value::Nil;
                        self.slice_fields
                            .entry(knum as u64)
                            .or_default()
                            .push(fnum as u64);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Iterator for SliceRelative<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(v) = self.out.pop_front() {
                return Some(Ok(v));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.advance() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

/// Rewrites the flagged slice fields of every item in a section payload.
/// A lone map is a single item encoded unwrapped.
fn rewrite_section_slices(payload: &mut Value, fields: &[u64]) {
    match payload {
        Value::Map(_) => rewrite_item_slices(payload, fields),
        Value::Array(items) => {
            for item in items {
                rewrite_item_slices(item, fields);
            }
        }
        _ => {}
    }
}

fn rewrite_item_slices(item: &mut Value, fields: &[u64]) {
    let entries = match item {
        Value::Map(entries) => entries,
        _ => return,
    };
    for (key, value) in entries.iter_mut() {
        let fnum = match key.as_u64() {
            Some(f) => f,
            None => continue,
        };
        if !fields.contains(&fnum) || !is_truthy(value) {
            continue;
        }
        if let Value::Array(parts) = value {
            let n = parts.len();
            if n >= 2 {
                if let (Some(start), Some(stop)) =
                    (parts[n - 2].as_i64(), parts[n - 1].as_i64())
                {
                    parts[n - 1] = Value::from(stop - start);
                }
            }
        }
    }
}

// --- Stage 2 -> 3: text/binary disambiguation ---

/// Revision 2→3: every value decoded from the codec's ambiguous raw type is
/// re-typed: valid UTF-8 becomes the distinguished text type, anything
/// else the distinguished binary type. Applied recursively through arrays
/// and map keys/values in every section, so every section's length is
/// recomputed.
pub struct StringTypeStage;

impl UpgradeStage for StringTypeStage {
    fn source_version(&self) -> u32 {
        2
    }

    fn apply<'a>(&self, input: Messages<'a>) -> Messages<'a> {
        Box::new(StringType {
            input,
            out: VecDeque::new(),
            step: StringStep::Klasses,
            sections_left: 0,
            done: false,
        })
    }
}

enum StringStep {
    Klasses,
    Stores,
    Sections,
}

struct StringType<'a> {
    input: Messages<'a>,
    out: VecDeque<Value>,
    step: StringStep,
    sections_left: usize,
    done: bool,
}

impl StringType<'_> {
    fn pull(&mut self) -> Result<Value> {
        self.input.next().unwrap_or_else(|| Err(ended_early()))
    }

    fn advance(&mut self) -> Result<()> {
        match self.step {
            StringStep::Klasses => {
                let klasses = promote_strings(self.pull()?);
                self.out.push_back(klasses);
                self.step = StringStep::Stores;
            }
            StringStep::Stores => {
                let stores = promote_strings(self.pull()?);
                self.sections_left = stores
                    .as_array()
                    .map(Vec::len)
                    .ok_or_else(|| {
                        DocrepError::Codec(format!("stores must be an array, got {stores}"))
                    })?
                    + 1;
                self.out.push_back(stores);
                self.step = StringStep::Sections;
            }
            StringStep::Sections => {
                if self.sections_left == 0 {
                    self.done = true;
                    return Ok(());
                }
                let _old_len = self.pull()?;
                let payload = promote_strings(self.pull()?);
                self.out.push_back(recomputed_len(&payload)?);
                self.out.push_back(payload);
                self.sections_left -= 1;
            }
        }
        Ok(())
    }
}

impl Iterator for StringType<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(v) = self.out.pop_front() {
                return Some(Ok(v));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.advance() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

/// Recursively re-types ambiguous raw values: valid UTF-8 stays text,
/// invalid UTF-8 becomes binary.
fn promote_strings(value: Value) -> Value {
    match value {
        Value::String(s) => {
            if s.as_str().is_some() {
                Value::String(s)
            } else {
                Value::Binary(s.into_bytes())
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(promote_strings).collect()),
        Value::Map(pairs) => Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (promote_strings(k), promote_strings(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::{decode_frame, encode_frame};
    use crate::constants::NAME;
    use crate::frame::{ClassDef, FieldDef, RawFrame, Section, StoreDef};

    /// A revision-1 frame: `__meta__` plus a `Token` class with one slice
    /// field, one store with one item whose slice is `(5, 10, 25)`.
    fn slice_frame_v1() -> RawFrame {
        let mut meta = ClassDef::new("__meta__");
        meta.fields.push(FieldDef::named("name"));

        let mut token = ClassDef::new("Token");
        let mut span = FieldDef::named("span");
        span.set(IS_SLICE, Value::from(true));
        token.fields.push(span);

        RawFrame {
            version: 1,
            klasses: vec![meta, token],
            stores: vec![StoreDef {
                name: "tokens".into(),
                klass: 1,
                count: 1,
            }],
            doc: Section::from_value(Value::Map(vec![(
                Value::from(0u64),
                Value::from("doc-1"),
            )])),
            store_payloads: vec![Section::from_value(Value::Map(vec![(
                Value::from(0u64),
                Value::Array(vec![
                    Value::from(5u64),
                    Value::from(10u64),
                    Value::from(25u64),
                ]),
            )]))],
        }
    }

    fn to_bytes(frame: &mut RawFrame) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_frame(frame, &mut buf).unwrap();
        buf
    }

    fn upgraded(bytes: &[u8], target: u32) -> Vec<u8> {
        let mut out = Vec::new();
        upgrade_stream(bytes, &mut out, target).unwrap();
        out
    }

    fn single_frame(bytes: &[u8]) -> RawFrame {
        let mut cursor = bytes;
        let frame = decode_frame(&mut cursor).unwrap().unwrap();
        assert!(cursor.is_empty());
        frame
    }

    #[test]
    fn slice_stop_becomes_length() {
        let bytes = to_bytes(&mut slice_frame_v1());
        let mut frame = single_frame(&upgraded(&bytes, 2));

        assert_eq!(frame.version, 2);
        // The trait switched from boolean true to the nil marker.
        assert_eq!(
            frame.klasses[1].fields[0].get(IS_SLICE),
            Some(&Value::Nil)
        );
        assert!(frame.klasses[1].fields[0].is_slice());
        // (pointer=5, start=10, stop=25) -> (pointer=5, start=10, length=15)
        let item = frame.store_payloads[0].decoded().unwrap();
        let slice = &item.as_map().unwrap()[0].1;
        assert_eq!(
            slice,
            &Value::Array(vec![
                Value::from(5u64),
                Value::from(10u64),
                Value::from(15u64)
            ])
        );
    }

    #[test]
    fn unflagged_sections_pass_through_byte_identical() {
        let mut frame = slice_frame_v1();
        let doc_bytes = frame.doc.packed().unwrap().to_vec();
        let bytes = to_bytes(&mut frame);
        let mut out = single_frame(&upgraded(&bytes, 2));
        // __meta__ has no slice field, so the doc section is untouched.
        assert_eq!(out.doc.packed().unwrap(), doc_bytes.as_slice());
    }

    #[test]
    fn meta_class_slices_are_rewritten_too() {
        let mut frame = slice_frame_v1();
        let mut span = FieldDef::named("title_span");
        span.set(IS_SLICE, Value::from(true));
        frame.klasses[0].fields.push(span);
        frame.doc.set_decoded(Value::Map(vec![
            (Value::from(0u64), Value::from("doc-1")),
            (
                Value::from(1u64),
                Value::Array(vec![Value::from(3u64), Value::from(9u64)]),
            ),
        ]));

        let bytes = to_bytes(&mut frame);
        let mut out = single_frame(&upgraded(&bytes, 2));
        let doc = out.doc.decoded().unwrap();
        // 2-component slice: stop 9 relative to start 3.
        assert_eq!(
            doc.as_map().unwrap()[1].1,
            Value::Array(vec![Value::from(3u64), Value::from(6u64)])
        );
    }

    #[test]
    fn nil_slice_values_are_skipped() {
        let mut frame = slice_frame_v1();
        frame.stores[0].count = 2;
        frame.store_payloads[0].set_decoded(Value::Array(vec![
            Value::Map(vec![(Value::from(0u64), Value::Nil)]),
            Value::Map(vec![(
                Value::from(0u64),
                Value::Array(vec![
                    Value::from(1u64),
                    Value::from(2u64),
                    Value::from(8u64),
                ]),
            )]),
        ]));
        let bytes = to_bytes(&mut frame);
        let mut out = single_frame(&upgraded(&bytes, 2));
        let items = out.store_payloads[0].decoded().unwrap();
        let items = items.as_array().unwrap();
        assert_eq!(items[0].as_map().unwrap()[0].1, Value::Nil);
        assert_eq!(
            items[1].as_map().unwrap()[0].1,
            Value::Array(vec![
                Value::from(1u64),
                Value::from(2u64),
                Value::from(6u64)
            ])
        );
    }

    #[test]
    fn utf8_raw_becomes_text_and_invalid_becomes_binary() {
        let mut frame = slice_frame_v1();
        frame.version = 2;
        frame.klasses[1].fields[0].set(IS_SLICE, Value::Nil);
        // Raw msgpack: {0: str(b"caf\xc3\xa9"), 1: str(b"\xff\xfe")}; the
        // second string is not valid UTF-8.
        frame.doc = Section::from_packed(vec![
            0x82, 0x00, 0xa5, 0x63, 0x61, 0x66, 0xc3, 0xa9, 0x01, 0xa2, 0xff, 0xfe,
        ]);

        let bytes = to_bytes(&mut frame);
        let mut out = single_frame(&upgraded(&bytes, 3));
        assert_eq!(out.version, 3);
        let doc = out.doc.decoded().unwrap().as_map().unwrap().clone();
        assert_eq!(doc[0].1, Value::from("caf\u{e9}"));
        assert_eq!(doc[1].1, Value::Binary(vec![0xff, 0xfe]));
    }

    #[test]
    fn direct_upgrade_matches_staged_upgrade() {
        let bytes = to_bytes(&mut slice_frame_v1());
        let direct = upgraded(&bytes, 3);
        let via_two = upgraded(&upgraded(&bytes, 2), 3);
        assert_eq!(direct, via_two);
    }

    #[test]
    fn explicit_version_one_upgrades_like_implicit() {
        let implicit = to_bytes(&mut slice_frame_v1());
        // The same frame with revision 1 spelled out on the wire.
        let mut explicit = vec![0x01];
        explicit.extend_from_slice(&implicit);
        assert_eq!(single_frame(&explicit).version, 1);

        let out = upgraded(&explicit, 3);
        assert_eq!(out, upgraded(&implicit, 3));
        assert_eq!(single_frame(&out).version, 3);
    }

    #[test]
    fn upgrade_at_ceiling_is_byte_identical() {
        let mut frame = slice_frame_v1();
        frame.version = CURRENT_VERSION;
        frame.klasses[1].fields[0].set(IS_SLICE, Value::Nil);
        let bytes = to_bytes(&mut frame);
        assert_eq!(upgraded(&bytes, CURRENT_VERSION), bytes);
    }

    #[test]
    fn empty_stream_upgrades_to_nothing() {
        let mut out = Vec::new();
        assert_eq!(upgrade_stream(&[][..], &mut out, 3).unwrap(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn downgrade_and_unknown_targets_are_rejected() {
        let mut frame = slice_frame_v1();
        frame.version = 3;
        let bytes = to_bytes(&mut frame);

        let mut out = Vec::new();
        assert!(matches!(
            upgrade_stream(bytes.as_slice(), &mut out, 2),
            Err(DocrepError::UnsupportedUpgrade(_))
        ));
        assert!(out.is_empty());

        assert!(matches!(
            upgrade_stream(bytes.as_slice(), &mut Vec::new(), CURRENT_VERSION + 1),
            Err(DocrepError::UnsupportedUpgrade(_))
        ));
    }

    #[test]
    fn truncated_frame_fails_mid_upgrade() {
        let bytes = to_bytes(&mut slice_frame_v1());
        // Drop the payload sections entirely: klasses + stores survive.
        let mut cursor = bytes.as_slice();
        codec::read_value_mid(&mut cursor).unwrap();
        codec::read_value_mid(&mut cursor).unwrap();
        let header_len = bytes.len() - cursor.len();

        let mut out = Vec::new();
        assert!(matches!(
            upgrade_stream(&bytes[..header_len], &mut out, 2),
            Err(DocrepError::TruncatedFrame(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn multi_frame_streams_upgrade_frame_by_frame() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&to_bytes(&mut slice_frame_v1()));
        let mut second = slice_frame_v1();
        second.doc.set_decoded(Value::Map(vec![(
            Value::from(0u64),
            Value::from("doc-2"),
        )]));
        stream.extend_from_slice(&to_bytes(&mut second));

        let out = upgraded(&stream, 3);
        let mut cursor = out.as_slice();
        let mut a = decode_frame(&mut cursor).unwrap().unwrap();
        let mut b = decode_frame(&mut cursor).unwrap().unwrap();
        assert!(decode_frame(&mut cursor).unwrap().is_none());
        assert_eq!(a.version, 3);
        assert_eq!(b.version, 3);
        let name = |f: &mut RawFrame| {
            f.doc
                .decoded()
                .map(|d| d.as_map().unwrap()[0].1.clone())
                .unwrap()
        };
        assert_eq!(name(&mut a), Value::from("doc-1"));
        assert_eq!(name(&mut b), Value::from("doc-2"));
        // Field names are still resolvable after re-typing.
        assert_eq!(a.klasses[1].fields[0].get(NAME), Some(&Value::from("span")));
    }
}

//! The frame codec: one document frame to and from a byte stream.
//!
//! A frame is a plain sequence of MessagePack values with no outer framing:
//!
//! ```text
//! [version?] [klasses] [stores] [doc_len] [doc_bytes]
//!            ([payload_len] [payload_bytes])*  -- one pair per store
//! ```
//!
//! `version` is omitted when it equals 1; the decoder tells the two layouts
//! apart by the type of the first value (integer vs array). Payload sections
//! are length-prefixed byte spans and are captured *packed*, not decoded.
//! Deferring the decode is what lets a pass-through copy skip it entirely
//! and lets the upgrade pipeline recompute lengths only for sections it
//! actually rewrites.
//!
//! End-of-input handling is strict: running out of bytes before any byte of
//! a new frame was consumed is a clean end ([`decode_frame`] returns
//! `Ok(None)`); running out anywhere after that is a fatal
//! [`DocrepError::TruncatedFrame`].

use std::io::{self, Read, Write};

use crate::error::{DocrepError, Result};
use crate::frame::{ClassDef, RawFrame, Section, StoreDef, Value};

/// Decodes the next frame from `input`.
///
/// Returns `Ok(None)` only when the stream is exhausted exactly on a frame
/// boundary. The decoded frame's headers are validated; payload sections
/// stay packed.
pub fn decode_frame<R: Read>(input: &mut R) -> Result<Option<RawFrame>> {
    match read_value_opt(input)? {
        None => Ok(None),
        Some(first) => decode_frame_rest(first, input).map(Some),
    }
}

/// Decodes a frame whose first value has already been read. From here on,
/// every shortfall is a truncation, never a clean end.
pub(crate) fn decode_frame_rest<R: Read>(first: Value, input: &mut R) -> Result<RawFrame> {
    let (version, klasses_value) = match first {
        Value::Integer(n) => {
            let version = n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v >= 1)
                .ok_or_else(|| DocrepError::Codec(format!("invalid frame version {n}")))?;
            (version, read_value_mid(input)?)
        }
        other => (1, other),
    };

    let klasses = match klasses_value {
        Value::Array(raw) => raw
            .into_iter()
            .map(ClassDef::from_value)
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(DocrepError::Codec(format!(
                "klasses must be an array, got {other}"
            )))
        }
    };

    let stores = match read_value_mid(input)? {
        Value::Array(raw) => raw
            .into_iter()
            .map(StoreDef::from_value)
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(DocrepError::Codec(format!(
                "stores must be an array, got {other}"
            )))
        }
    };

    let doc = Section::from_packed(read_len_prefixed(input)?);
    let mut store_payloads = Vec::with_capacity(stores.len());
    for _ in &stores {
        store_payloads.push(Section::from_packed(read_len_prefixed(input)?));
    }

    let frame = RawFrame {
        version,
        klasses,
        stores,
        doc,
        store_payloads,
    };
    frame.validate()?;
    Ok(frame)
}

/// Encodes one frame to `output`.
///
/// The exact inverse of [`decode_frame`]: the version is omitted when it
/// equals 1, and each payload section is written from its packed form
/// (packing is cached on the frame).
pub fn encode_frame<W: Write>(frame: &mut RawFrame, output: &mut W) -> Result<()> {
    if frame.stores.len() != frame.store_payloads.len() {
        return Err(DocrepError::MalformedHeader(format!(
            "{} stores but {} payload sections",
            frame.stores.len(),
            frame.store_payloads.len()
        )));
    }
    if frame.version != 1 {
        write_value(output, &Value::from(frame.version))?;
    }
    write_value(
        output,
        &Value::Array(frame.klasses.iter().map(ClassDef::to_value).collect()),
    )?;
    write_value(
        output,
        &Value::Array(frame.stores.iter().map(StoreDef::to_value).collect()),
    )?;
    write_section(output, &mut frame.doc)?;
    for section in &mut frame.store_payloads {
        write_section(output, section)?;
    }
    Ok(())
}

fn write_section<W: Write>(output: &mut W, section: &mut Section) -> Result<()> {
    let bytes = section.packed()?;
    write_value(output, &Value::from(bytes.len() as u64))?;
    output.write_all(bytes)?;
    Ok(())
}

/// Writes one primitive value.
pub(crate) fn write_value<W: Write>(output: &mut W, value: &Value) -> Result<()> {
    rmpv::encode::write_value(output, value)
        .map_err(|e| DocrepError::Codec(format!("value encode failed: {e}")))
}

/// Reads one primitive value, or `None` on a clean end of input (zero bytes
/// consumed).
pub(crate) fn read_value_opt<R: Read>(input: &mut R) -> Result<Option<Value>> {
    let mut first = [0u8; 1];
    if let Err(e) = input.read_exact(&mut first) {
        return if e.kind() == io::ErrorKind::UnexpectedEof {
            Ok(None)
        } else {
            Err(e.into())
        };
    }
    let mut chained = first.as_slice().chain(input);
    rmpv::decode::read_value(&mut chained)
        .map(Some)
        .map_err(map_decode_err)
}

/// Reads one primitive value mid-frame; end of input here is a truncation.
pub(crate) fn read_value_mid<R: Read>(input: &mut R) -> Result<Value> {
    rmpv::decode::read_value(input).map_err(map_decode_err)
}

/// Reads a length-prefixed opaque byte span: an integer value `n` followed
/// by exactly `n` raw bytes.
pub(crate) fn read_len_prefixed<R: Read>(input: &mut R) -> Result<Vec<u8>> {
    let len_value = read_value_mid(input)?;
    let len = len_value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            DocrepError::Codec(format!(
                "expected integer payload length, got {len_value}"
            ))
        })?;
    // Read through a bounded handle: the buffer grows with the bytes that
    // actually arrive, so a corrupt length prefix surfaces as a truncation
    // rather than a giant up-front allocation.
    let mut buf = Vec::new();
    input.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() < len {
        return Err(DocrepError::TruncatedFrame(format!(
            "payload span short of {len} bytes"
        )));
    }
    Ok(buf)
}

fn map_decode_err(e: rmpv::decode::Error) -> DocrepError {
    use rmpv::decode::Error as MpError;
    let eof = matches!(
        &e,
        MpError::InvalidMarkerRead(io) | MpError::InvalidDataRead(io)
            if io.kind() == io::ErrorKind::UnexpectedEof
    );
    if eof {
        DocrepError::TruncatedFrame(format!("stream ended mid-frame: {e}"))
    } else {
        DocrepError::Codec(format!("value decode failed: {e}"))
    }
}

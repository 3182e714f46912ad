//! Stream-level I/O: iterating frames off a byte source, writing them to a
//! byte sink, and opening files with transparent gzip wrapping.
//!
//! Frames concatenate with zero separator, so the reader is just the frame
//! codec in a loop; it stops cleanly when the input ends on a frame
//! boundary and surfaces a [`crate::DocrepError::TruncatedFrame`] otherwise.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;

use crate::codec::{decode_frame, encode_frame};
use crate::error::Result;
use crate::frame::RawFrame;

/// Pull-based frame iterator over a byte stream.
///
/// Yields `Err` once on failure and then fuses: corrupt input cannot be
/// resynchronized, so there is never a next frame after an error.
#[derive(Debug)]
pub struct FrameReader<R: Read> {
    inner: R,
    failed: bool,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            failed: false,
        }
    }

    /// Unwraps the underlying byte source.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match decode_frame(&mut self.inner) {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Writes frames to a byte sink.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps a byte sink.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one frame. The frame is encoded into a buffer first, so on
    /// error nothing reaches the sink: a frame is written whole or not at
    /// all.
    pub fn write(&mut self, frame: &mut RawFrame) -> Result<()> {
        let mut buf = Vec::new();
        encode_frame(frame, &mut buf)?;
        self.inner.write_all(&buf)?;
        Ok(())
    }

    /// Flushes the underlying sink.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Unwraps the underlying byte sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Copies every frame from `input` to `output` unmodified, returning how
/// many were copied. Payload sections are never decoded, so the output is
/// byte-identical for canonical input.
pub fn copy_frames<R: Read, W: Write>(input: R, output: W) -> Result<u64> {
    let mut writer = FrameWriter::new(output);
    let mut copied = 0u64;
    for frame in FrameReader::new(input) {
        writer.write(&mut frame?)?;
        copied += 1;
    }
    Ok(copied)
}

fn is_gz_suffix(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("drz"))
        .unwrap_or(false)
}

/// Opens a file for reading, transparently ungzipping `.gz`/`.drz` inputs.
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn Read>> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path)?);
    if is_gz_suffix(path) {
        debug!("opening {} as gzip", path.display());
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Creates a file for writing, transparently gzipping `.gz`/`.drz` outputs.
pub fn open_output<P: AsRef<Path>>(path: P) -> Result<Box<dyn Write>> {
    let path = path.as_ref();
    let file = BufWriter::new(File::create(path)?);
    if is_gz_suffix(path) {
        debug!("opening {} as gzip", path.display());
        Ok(Box::new(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(Box::new(file))
    }
}

//! Centralized error handling for docrep.
//!
//! All failure conditions are propagated through the [`Result`] type; the
//! library never panics (enforced by clippy lints at the crate root).
//!
//! ## Error Categories
//!
//! - **I/O Errors** ([`DocrepError::Io`]): low-level stream operations
//! - **Codec Errors** ([`DocrepError::Codec`]): the primitive (MessagePack)
//!   codec rejected a value, or a value had an unexpected shape
//! - **Truncated Frames** ([`DocrepError::TruncatedFrame`]): the stream ended
//!   in the middle of a document frame
//! - **Malformed Headers** ([`DocrepError::MalformedHeader`]): a class or
//!   store index points outside the frame's own metadata
//! - **Unsupported Upgrades** ([`DocrepError::UnsupportedUpgrade`]): the
//!   requested target revision cannot be reached from the input
//!
//! A clean end of stream is *not* an error: frame-reading entry points
//! return `Ok(None)` when the input is exhausted exactly on a frame
//! boundary.
//!
//! The type is `Clone` so errors can be stored or shared across threads;
//! I/O errors are wrapped in `Arc` to keep cloning cheap.

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for docrep operations.
pub type Result<T> = std::result::Result<T, DocrepError>;

/// The master error enum covering all failure domains in docrep.
///
/// Retrying is never useful for any of these: truncated or malformed input
/// cannot be repaired by reading it again, so callers are expected to
/// surface the error and stop.
#[derive(Debug, Clone)]
pub enum DocrepError {
    /// Low-level I/O failure on the underlying byte stream.
    ///
    /// The underlying `io::Error` is wrapped in an `Arc` to make the error
    /// `Clone`.
    Io(Arc<io::Error>),

    /// The primitive codec could not decode or encode a value, or a decoded
    /// value did not have the shape the container format requires (e.g. a
    /// non-integer payload length).
    Codec(String),

    /// The stream ended after a frame had started but before it was
    /// complete: a header, payload length, or payload byte span was cut
    /// short. Always fatal; never silently treated as end of stream.
    TruncatedFrame(String),

    /// A `klass` index in a store definition, or a `POINTER_TO` trait value,
    /// refers outside the frame's own class/store tables.
    ///
    /// The frame codec and the upgrade pipeline treat this as fatal; only
    /// the diagnostic projector degrades gracefully instead.
    MalformedHeader(String),

    /// The requested target revision is below the frame's declared revision
    /// or above the highest revision this crate knows about.
    UnsupportedUpgrade(String),
}

impl fmt::Display for DocrepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Codec(s) => write!(f, "Codec Error: {s}"),
            Self::TruncatedFrame(s) => write!(f, "Truncated Frame: {s}"),
            Self::MalformedHeader(s) => write!(f, "Malformed Header: {s}"),
            Self::UnsupportedUpgrade(s) => write!(f, "Unsupported Upgrade: {s}"),
        }
    }
}

impl std::error::Error for DocrepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for DocrepError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

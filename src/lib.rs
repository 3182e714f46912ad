//! # docrep
//!
//! A streaming, self-describing binary document container.
//!
//! A docrep stream is an unbounded concatenation of independent *document
//! frames*. Each frame carries its own type metadata (a class table and a
//! store table) followed by length-prefixed payload sections: one record
//! for the document itself and one homogeneous collection per store. No
//! external schema is ever needed to read a frame, and frames are processed
//! one at a time without buffering the stream.
//!
//! ## Key Properties
//!
//! *   **Lazy frames:** payload sections stay packed until something asks
//!     for their values, so forwarding, subsetting, or header-rewriting a
//!     stream never pays for a full decode/re-encode cycle.
//! *   **Selective rewriting:** mutating one section re-encodes only that
//!     section; everything else is copied through byte-identically.
//! *   **Wire-format upgrades:** frames written under an earlier format
//!     revision are upgraded to the current one by a chain of streaming,
//!     single-revision stages that rewrite only what each revision changed.
//! *   **Diagnostics:** the projector folds headers into per-item data for
//!     human-readable dumps, degrading gracefully on malformed indices.
//!
//! ## Architecture
//!
//! Values are MessagePack, handled generically through [`Value`]. On top of
//! that sit, in order: the frame codec ([`codec`]), the lazy frame model
//! ([`frame`]), the upgrade pipeline ([`upgrade`]), and the projector
//! ([`project`]). Stream plumbing (frame iteration, gzip-wrapped file
//! handles) lives in [`io`].
//!
//! Typed document models, CLIs, and data-munging tools are deliberate
//! non-goals: they are external layers consuming [`RawFrame`] and the
//! reader/writer interfaces here.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docrep::{FrameReader, FrameWriter, open_input, open_output};
//!
//! # fn main() -> docrep::Result<()> {
//! let reader = FrameReader::new(open_input("corpus.dr.gz")?);
//! let mut writer = FrameWriter::new(open_output("out.dr")?);
//! for frame in reader {
//!     let mut frame = frame?;
//!     // Inspect or rewrite frame.klasses / frame.stores here.
//!     writer.write(&mut frame)?;
//! }
//! writer.flush()?;
//! # Ok(())
//! # }
//! ```
//!
//! Upgrading a stream to the current revision:
//!
//! ```rust,no_run
//! use docrep::{constants::CURRENT_VERSION, upgrade_stream, open_input, open_output};
//!
//! # fn main() -> docrep::Result<()> {
//! let input = open_input("old.dr")?;
//! let output = open_output("new.dr")?;
//! upgrade_stream(input, output, CURRENT_VERSION)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! No panics ([`DocrepError`] covers every failure domain); a clean end of
//! input is `Ok(None)`/iterator exhaustion, while a stream that stops
//! mid-frame is always a fatal [`DocrepError::TruncatedFrame`].

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod io;
pub mod project;
pub mod upgrade;

pub use codec::{decode_frame, encode_frame};
pub use error::{DocrepError, Result};
pub use frame::{ClassDef, FieldDef, RawFrame, Section, StoreDef, Value};
pub use io::{copy_frames, open_input, open_output, FrameReader, FrameWriter};
pub use project::{project, DocView, FieldView, ItemView, ProjectOptions, StoreView};
pub use upgrade::{upgrade_stream, UpgradeStage};

/// Constants used throughout the library.
pub mod constants {
    /// The highest wire-format revision this crate reads and writes.
    pub const CURRENT_VERSION: u32 = 3;

    /// Field trait key: the field's name (string). Required.
    pub const NAME: i64 = 0;
    /// Field trait key: the field references items of the store at this
    /// index.
    pub const POINTER_TO: i64 = 1;
    /// Field trait key: the field is a contiguous-range reference. Boolean
    /// before revision 2; a nil presence marker from revision 2 on.
    pub const IS_SLICE: i64 = 2;
    /// Field trait key: the field references another item within its own
    /// store.
    pub const IS_SELF_POINTER: i64 = 3;
    /// Field trait key: the field holds a sequence of references rather
    /// than a single one.
    pub const IS_COLLECTION: i64 = 4;
}

// SPDX-License-Identifier: MPL-2.0

//! A paged byte buffer for editor-like workloads.
//!
//! The buffer presents an arbitrarily large byte sequence as one flat
//! address space while keeping only a bounded number of pages resident;
//! everything else lives in an injected [`PageStore`]. On top of the paged
//! storage sit named marks that stay put under unrelated edits, line-number
//! queries over cached newline tables, and an undo log that coalesces
//! bursts of adjacent edits into single undoable units.
//!
//! # Example
//!
//! ```
//! use pagedbuf::{MemStore, PagedBuffer};
//!
//! # fn main() -> Result<(), pagedbuf::Error> {
//! let mut buf = PagedBuffer::new(MemStore::new())?;
//! buf.load_content(b"hello world")?;
//! buf.set_mark("cursor", 6)?;
//!
//! buf.insert_bytes(5, b",")?;
//! assert_eq!(buf.read_range(0, 12)?, b"hello, world");
//! assert_eq!(buf.get_mark("cursor"), Some(7));
//!
//! buf.undo()?;
//! assert_eq!(buf.read_range(0, 11)?, b"hello world");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod buffer;
mod cache;
mod error;
mod events;
mod index;
mod lines;
mod marks;
mod page;
mod prelude;
mod store;
mod undo;
mod vpm;

pub use self::{
    buffer::{BufferConfig, PagedBuffer},
    error::{Errno, Error},
    lines::LineInfo,
    store::{MemStore, PageKey, PageStore},
    undo::UndoStats,
    vpm::MemoryStats,
};

/// The crate-wide result type.
pub type Result<T> = core::result::Result<T, Error>;

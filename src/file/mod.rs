//! Spec sources and low-level binary access.
//!
//! A data specification can come from an in-memory buffer or from a file on
//! disk; [`SpecSource`] abstracts over both so the executor only ever sees a
//! byte slice. File-backed sources are memory-mapped rather than read into a
//! heap buffer, since specs for a large machine are executed by the thousand
//! and the same file may feed many executors.
//!
//! # Key Components
//!
//! - [`SpecSource`] - owned spec bytes, either a buffer or a mapped file
//! - [`Parser`](parser::Parser) - cursor used to decode the stream
//! - [`io`] - bounds-checked little-endian primitives

pub mod io;
pub mod parser;

use std::{fs, path::Path};

use memmap2::Mmap;

use crate::Result;

/// The bytes of a data specification, however they were obtained.
///
/// `close()` on the owning [`Executor`](crate::Executor) drops the mapped
/// file if there is one; region buffers produced by execution are owned by
/// the executor and are unaffected.
pub(crate) enum SpecSource {
    /// Spec provided as an in-memory buffer.
    Buffer(Vec<u8>),
    /// Spec memory-mapped from a file. `None` once closed.
    Mapped(Option<Mmap>),
}

impl SpecSource {
    /// Wrap an in-memory spec buffer.
    pub(crate) fn from_bytes(data: Vec<u8>) -> Self {
        SpecSource::Buffer(data)
    }

    /// Memory-map a spec file.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub(crate) fn from_file(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        // Safety: the mapping is read-only and lives as long as this source;
        // concurrent truncation of the underlying file is the caller's hazard,
        // as with any mmap.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(SpecSource::Mapped(Some(mmap)))
    }

    /// The spec bytes. Empty once a mapped source has been closed.
    pub(crate) fn data(&self) -> &[u8] {
        match self {
            SpecSource::Buffer(data) => data,
            SpecSource::Mapped(Some(mmap)) => mmap,
            SpecSource::Mapped(None) => &[],
        }
    }

    /// Release the mapped file, if any. Idempotent.
    pub(crate) fn close(&mut self) {
        if let SpecSource::Mapped(mmap) = self {
            *mmap = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_source() {
        let src = SpecSource::from_bytes(vec![1, 2, 3]);
        assert_eq!(src.data(), &[1, 2, 3]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut src = SpecSource::from_bytes(vec![1]);
        src.close();
        src.close();
        // Buffers survive close; only mappings are released
        assert_eq!(src.data(), &[1]);
    }

    #[test]
    fn test_missing_file_propagates() {
        assert!(SpecSource::from_file(Path::new("/nonexistent/spec.bin")).is_err());
    }
}

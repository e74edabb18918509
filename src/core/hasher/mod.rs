//! # Hasher Module
//!
//! Content digests for the identical-file short circuit.
//!
//! Two images with the same digest are byte-identical for our purposes and
//! skip pixel comparison entirely. The digest is xxh3-128: it only has to
//! detect accidental differences, not resist crafted collisions.
//!
//! Files of 1MB or more are memory-mapped instead of read into a buffer.

use crate::error::DiffError;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use xxhash_rust::xxh3::xxh3_128;

/// Minimum file size to use memory-mapped I/O (1MB)
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// 128-bit content digest of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest(u128);

impl ContentDigest {
    /// Digest an in-memory buffer
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(xxh3_128(bytes))
    }

    /// Digest a file's bytes
    pub fn of_file(path: &Path) -> Result<Self, DiffError> {
        let read_error = |source| DiffError::Read {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(read_error)?;
        let len = file.metadata().map_err(read_error)?.len();

        if len >= MMAP_THRESHOLD {
            // SAFETY: the mapping is read-only and dropped before `file`.
            // Each worker only reads the images named in its own task.
            let mmap = unsafe { Mmap::map(&file) }.map_err(read_error)?;
            Ok(Self::of_bytes(&mmap))
        } else {
            let bytes = std::fs::read(path).map_err(read_error)?;
            Ok(Self::of_bytes(&bytes))
        }
    }
}

//! Blake3 hashing of derived artifacts

use std::io;
use std::path::Path;

/// Hash a file's contents with blake3 (memory-mapped for large volumes).
pub fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_mmap(path)?;
    Ok(hasher.finalize())
}

//! BLAKE3 fingerprint engine with streaming support.
//!
//! # Overview
//!
//! Two digests are produced for a file:
//!
//! - **Prehash**: BLAKE3 over the file size followed by the first
//!   [`PREHASH_SIZE`] bytes. Cheap, and only computed once two indexed files
//!   share a size.
//! - **Fingerprint**: BLAKE3 over the whole content. Only computed once two
//!   files of the same size also share a prehash.
//!
//! Both are 32 bytes. Equal fingerprints are treated as equal content.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Serialize, Serializer};

use super::HashError;

/// Width of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// Default number of leading bytes covered by the prehash.
pub const PREHASH_SIZE: usize = 4096;

/// Read buffer for streaming hashing.
const BUFFER_SIZE: usize = 64 * 1024;

/// Files at least this large are hashed through a memory map.
const MMAP_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Domain separation for prehashes so they never collide with fingerprints.
const PREHASH_CONTEXT: &str = "dupler prehash v1: size + leading bytes";

/// A fixed-width BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, which must be exactly [`FINGERPRINT_LEN`] bytes.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; FINGERPRINT_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Lowercase hex representation (64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Short form for logs and prompts.
    #[must_use]
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl From<blake3::Hash> for Fingerprint {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Computes prehashes and full fingerprints.
///
/// Cheap to clone; safe to share across worker threads.
#[derive(Debug, Clone)]
pub struct Hasher {
    prehash_size: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher with the default prehash window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prehash_size: PREHASH_SIZE,
            shutdown_flag: None,
        }
    }

    /// Set the number of leading bytes covered by the prehash (min 1).
    #[must_use]
    pub fn with_prehash_size(mut self, size: usize) -> Self {
        self.prehash_size = size.max(1);
        self
    }

    /// Abort streaming reads once `flag` becomes true.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Number of leading bytes covered by the prehash.
    #[must_use]
    pub fn prehash_size(&self) -> usize {
        self.prehash_size
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Cheap pre-hash: `size` followed by the first `prehash_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or read.
    pub fn prehash(&self, path: &Path, size: u64) -> Result<Fingerprint, HashError> {
        let mut file = open(path)?;
        let mut hasher = blake3::Hasher::new_derive_key(PREHASH_CONTEXT);
        hasher.update(&size.to_le_bytes());

        let mut buffer = vec![0u8; self.prehash_size];
        let mut filled = 0;
        while filled < buffer.len() {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io(path, e)),
            }
        }
        hasher.update(&buffer[..filled]);

        log::trace!("Prehash {} ({} bytes read)", path.display(), filled);
        Ok(hasher.finalize().into())
    }

    /// Full content fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be read, or
    /// [`HashError::Interrupted`] if shutdown was requested mid-read.
    pub fn full_hash(&self, path: &Path) -> Result<Fingerprint, HashError> {
        let mut file = open(path)?;
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut hasher = blake3::Hasher::new();

        if len >= MMAP_THRESHOLD {
            if self.is_shutdown_requested() {
                return Err(HashError::Interrupted(path.to_path_buf()));
            }
            hasher.update_mmap(path).map_err(|e| map_io(path, e))?;
        } else {
            let mut buffer = vec![0u8; BUFFER_SIZE];
            loop {
                if self.is_shutdown_requested() {
                    return Err(HashError::Interrupted(path.to_path_buf()));
                }
                match file.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        hasher.update(&buffer[..n]);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(map_io(path, e)),
                }
            }
        }

        log::trace!("Fingerprint {} ({} bytes)", path.display(), len);
        Ok(hasher.finalize().into())
    }

    /// Engine contract: strong digest of a file of the given size.
    ///
    /// Empty files are never read.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] on read failure.
    pub fn fingerprint(&self, path: &Path, size: u64) -> Result<Fingerprint, HashError> {
        if size == 0 {
            return Ok(blake3::hash(&[]).into());
        }
        self.full_hash(path)
    }
}

fn open(path: &Path) -> Result<File, HashError> {
    File::open(path).map_err(|e| map_io(path, e))
}

fn map_io(path: &Path, error: io::Error) -> HashError {
    match error.kind() {
        io::ErrorKind::NotFound => HashError::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => HashError::PermissionDenied(path.to_path_buf()),
        _ => HashError::Io {
            path: path.to_path_buf(),
            source: error,
        },
    }
}

//! Fixed-width keys, the bucket routing function, and MD5 digest helpers.
//!
//! Everything in the archive is addressed by one of two key widths: full
//! 16-byte hashes (content hashes and storage keys) and the 9-byte prefix
//! that the local index stores. Both share the same representation here.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use md5::{Digest, Md5};

use crate::errors::Error;

/// A fixed-width binary key with a canonical lowercase hex form.
///
/// Keys order by their byte sequence, which is the unsigned big-endian
/// integer ordering the on-disk tables are sorted in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key<const N: usize>([u8; N]);

/// A full 16-byte content hash or storage key.
pub type FullKey = Key<16>;

/// The 9-byte storage key prefix used inside index shards.
pub type IndexKey = Key<9>;

impl<const N: usize> Key<N> {
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let arr: [u8; N] = bytes
            .try_into()
            .map_err(|_| Error::format(format!("expected {} key bytes, got {}", N, bytes.len())))?;
        Ok(Key(arr))
    }

    /// The same key with its bytes in reverse order. Archive record headers
    /// store keys this way.
    pub fn reversed(&self) -> Self {
        let mut arr = self.0;
        arr.reverse();
        Key(arr)
    }
}

impl FullKey {
    /// Truncate to the 9-byte prefix the local index is keyed by.
    pub fn index_key(&self) -> IndexKey {
        let mut arr = [0u8; 9];
        arr.copy_from_slice(&self.0[..9]);
        Key(arr)
    }
}

impl IndexKey {
    /// Which of the 16 index shards holds this key.
    pub fn bucket(&self) -> u8 {
        bucket(self.0)
    }
}

impl<const N: usize> From<[u8; N]> for Key<N> {
    fn from(bytes: [u8; N]) -> Self {
        Key(bytes)
    }
}

impl<const N: usize> AsRef<[u8]> for Key<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> fmt::Display for Key<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl<const N: usize> fmt::Debug for Key<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key<{}>({})", N, hex::encode(self.0))
    }
}

impl<const N: usize> FromStr for Key<N> {
    type Err = Error;

    /// Parses hex of either case; output formatting is always lowercase.
    fn from_str(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s).map_err(|e| Error::format(format!("bad hex key: {}", e)))?;
        Key::from_slice(&bytes)
    }
}

/// XOR-fold a key down to its 4-bit bucket id.
///
/// Works over any byte-sequence view; the result only depends on the bytes,
/// never on the container presenting them.
pub fn bucket<B: AsRef<[u8]>>(key: B) -> u8 {
    let folded = key.as_ref().iter().fold(0u8, |acc, b| acc ^ b);
    (folded >> 4) ^ (folded & 0x0F)
}

/// MD5 of an in-memory byte range.
pub fn md5_bytes(data: &[u8]) -> FullKey {
    let mut hasher = Md5::new();
    hasher.update(data);
    Key(hasher.finalize().into())
}

/// MD5 over the next `len` bytes of a stream.
pub fn md5_window<R: Read>(reader: &mut R, len: u64) -> std::io::Result<FullKey> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    let mut remaining = len;

    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let got = reader.read(&mut buf[..want])?;
        if got == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "digest window ran past end of stream",
            ));
        }
        hasher.update(&buf[..got]);
        remaining -= got as u64;
    }
    Ok(Key(hasher.finalize().into()))
}

//! Local index: storage key → (data file, offset, size).
//!
//! The index is split into 16 shards, one per bucket of the key space
//! (see [`crate::hash::bucket`]). The active shard for bucket `b` is the
//! file `<bb><vvvvvvvv>.idx` named by the bucket and the version the shmem
//! descriptor records for it.
//!
//! Shard layout:
//!
//! | Type   | Name          | Description |
//! | -----: | ------------- | ----------- |
//! | u32 LE | entries_size  | byte length of the entry block |
//! | u32 LE | entries_hash  | reserved |
//! | u8     | key_size      | `9` |
//! | u8     | location_size | `5` |
//! | u8     | length_size   | `4` |
//! | u8     | bucket        | bucket this shard covers |
//! | u32 LE | reserved      | |
//! | 18 × n | entries       | sorted by key |
//!
//! Each entry is a 9-byte key, a 40-bit big-endian location, and a 32-bit
//! little-endian length of which the low 30 bits are significant. The
//! location packs a data-file ordinal above a byte offset; the split point
//! is the shift derived from the shmem data-file capacity.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use log::debug;

use crate::errors::{Error, Result};
use crate::hash::{FullKey, IndexKey, Key};
use crate::shmem::Shmem;

const KEY_SIZE: u8 = 9;
const LOCATION_SIZE: u8 = 5;
const LENGTH_SIZE: u8 = 4;
const ENTRY_SIZE: u32 = 18;
const SIZE_MASK: u32 = (1 << 30) - 1;

/// Physical placement of one stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Ordinal of the `data.NNN` file.
    pub file: u16,
    /// Byte offset of the archive record inside the data file.
    pub offset: u32,
    /// Byte length of the archive record, header included.
    pub size: u32,
}

/// All shards merged into one ordered map.
#[derive(Debug)]
pub struct Index {
    entries: BTreeMap<IndexKey, IndexEntry>,
}

impl Index {
    /// Load the 16 active shards named by the shmem descriptor and merge
    /// them. Duplicate keys keep the entry from the higher generation.
    pub fn load<P: AsRef<Path>>(dir: P, shmem: &Shmem) -> Result<Self> {
        let dir = dir.as_ref();
        let shift = shmem.offset_bits();
        let mut merged: BTreeMap<IndexKey, (u32, IndexEntry)> = BTreeMap::new();

        for bucket in 0..16u8 {
            let version = shmem.versions()[bucket as usize];
            let generation = shmem.generations()[bucket as usize];
            let name = shard_file_name(bucket, version);

            let file = File::open(dir.join(&name))?;
            let entries = parse_shard(&mut BufReader::new(file), bucket, shift)?;
            debug!("index shard {}: {} entries (gen {})", name, entries.len(), generation);

            for (key, entry) in entries {
                let newer = match merged.get(&key) {
                    Some((existing, _)) => *existing < generation,
                    None => true,
                };
                if newer {
                    merged.insert(key, (generation, entry));
                }
            }
        }

        Ok(Index {
            entries: merged.into_iter().map(|(k, (_, e))| (k, e)).collect(),
        })
    }

    /// Resolve a full storage key by its 9-byte prefix.
    pub fn find(&self, key: &FullKey) -> Result<&IndexEntry> {
        self.find_short(&key.index_key())
    }

    pub fn find_short(&self, key: &IndexKey) -> Result<&IndexEntry> {
        self.entries
            .get(key)
            .ok_or_else(|| Error::not_found(format!("index key {}", key)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All merged entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, &IndexEntry)> {
        self.entries.iter()
    }
}

/// File name of the active shard for a bucket at a version.
pub fn shard_file_name(bucket: u8, version: u32) -> String {
    format!("{:02x}{:08x}.idx", bucket, version)
}

/// Parse one shard. `shift` is the offset-bit count from shmem.
pub fn parse_shard<R: Read>(
    reader: &mut R,
    bucket: u8,
    shift: u32,
) -> Result<Vec<(IndexKey, IndexEntry)>> {
    let entries_size = reader.read_u32::<LittleEndian>()?;
    let _entries_hash = reader.read_u32::<LittleEndian>()?;

    let key_size = reader.read_u8()?;
    let location_size = reader.read_u8()?;
    let length_size = reader.read_u8()?;
    let shard_bucket = reader.read_u8()?;
    let _reserved = reader.read_u32::<LittleEndian>()?;

    if (key_size, location_size, length_size) != (KEY_SIZE, LOCATION_SIZE, LENGTH_SIZE) {
        return Err(Error::format(format!(
            "index shard layout {}/{}/{}, expected 9/5/4",
            key_size, location_size, length_size
        )));
    }
    if shard_bucket != bucket {
        return Err(Error::format(format!(
            "index shard covers bucket {}, expected {}",
            shard_bucket, bucket
        )));
    }
    if entries_size % ENTRY_SIZE != 0 {
        return Err(Error::format(format!(
            "index entry block of {} bytes is not a multiple of {}",
            entries_size, ENTRY_SIZE
        )));
    }

    let count = (entries_size / ENTRY_SIZE) as usize;
    let mask = (1u64 << shift) - 1;
    let mut entries = Vec::with_capacity(count);

    for _ in 0..count {
        let mut key_bytes = [0u8; 9];
        reader.read_exact(&mut key_bytes)?;

        let location = reader.read_uint::<BigEndian>(LOCATION_SIZE as usize)?;
        let length = reader.read_u32::<LittleEndian>()?;

        entries.push((
            Key::from(key_bytes),
            IndexEntry {
                file: (location >> shift) as u16,
                offset: (location & mask) as u32,
                size: length & SIZE_MASK,
            },
        ));
    }

    Ok(entries)
}


#[cfg(test)]
mod test_index {
    use super::test_shard::shard_bytes;
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write as _;

    /// Write a full 16-shard index plus shmem into a directory.
    fn write_install(
        dir: &Path,
        per_bucket: impl Fn(u8) -> Vec<([u8; 9], u64, u32)>,
        generations: [u32; 16],
    ) {
        let mut shmem = Vec::new();
        shmem.write_u32::<LittleEndian>(4).unwrap();
        shmem.write_u32::<LittleEndian>(0x1A8).unwrap();
        shmem.extend_from_slice(&[0u8; 0x100]);
        for _ in 0..16 {
            shmem.write_u32::<LittleEndian>(1).unwrap();
        }
        for generation in generations {
            shmem.write_u32::<LittleEndian>(generation).unwrap();
        }
        shmem.write_u64::<LittleEndian>(1 << 30).unwrap();
        shmem.write_u32::<LittleEndian>(1).unwrap();
        shmem.write_u32::<LittleEndian>(0).unwrap();
        std::fs::File::create(dir.join("shmem"))
            .unwrap()
            .write_all(&shmem)
            .unwrap();

        for bucket in 0..16u8 {
            let bytes = shard_bytes(bucket, &per_bucket(bucket));
            std::fs::File::create(dir.join(shard_file_name(bucket, 1)))
                .unwrap()
                .write_all(&bytes)
                .unwrap();
        }
    }

    // A 9-byte key that routes to `bucket`: the fold of [b << 4, 0, ..]
    // is b << 4, whose nibbles XOR to b. The tag cancels itself out.
    fn key_in_bucket(bucket: u8, tag: u8) -> [u8; 9] {
        let mut key = [0u8; 9];
        key[0] = bucket << 4;
        key[7] = tag;
        key[8] = tag;
        key
    }

    #[test]
    fn all_shards_merge_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        write_install(
            dir.path(),
            |bucket| vec![(key_in_bucket(bucket, 0), u64::from(bucket) << 30 | 10, 100)],
            [0; 16],
        );

        let shmem = Shmem::open(dir.path().join("shmem")).unwrap();
        let index = Index::load(dir.path(), &shmem).unwrap();
        assert_eq!(index.len(), 16);

        let key = Key::from(key_in_bucket(3, 0));
        let entry = index.find_short(&key).unwrap();
        assert_eq!(entry.file, 3);
        assert_eq!(entry.offset, 10);
        assert_eq!(entry.size, 100);
    }

    #[test]
    fn higher_generation_wins_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        // The same key appears in shard 0 and shard 1 with different
        // placements; shard 1 carries the higher generation.
        let dup = [0u8; 9];
        let mut generations = [0u32; 16];
        generations[1] = 5;
        write_install(
            dir.path(),
            move |bucket| match bucket {
                0 => vec![(dup, 111, 1)],
                1 => vec![(dup, 222, 2)],
                _ => vec![],
            },
            generations,
        );

        let shmem = Shmem::open(dir.path().join("shmem")).unwrap();
        let index = Index::load(dir.path(), &shmem).unwrap();
        let entry = index.find_short(&Key::from(dup)).unwrap();
        assert_eq!(entry.offset, 222);
        assert_eq!(entry.size, 2);
    }

    #[test]
    fn absent_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        write_install(dir.path(), |_| vec![], [0; 16]);

        let shmem = Shmem::open(dir.path().join("shmem")).unwrap();
        let index = Index::load(dir.path(), &shmem).unwrap();
        assert!(index.is_empty());

        let missing: FullKey = "41ee1986acc533ccd86a5e39bb5cb1e8".parse().unwrap();
        assert!(index.find(&missing).unwrap_err().is_not_found());
    }
}

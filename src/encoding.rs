//! Encoding table: content hash → storage key(s).
//!
//! The table is a blob inside the archive itself, reached through the
//! build configuration's `encoding` entry. It holds two independent
//! chunked maps (A and B); each map is a run of 32-byte chunk heads
//! followed by a run of 4 KiB chunk bodies. A head records the smallest
//! key present in its body and the MD5 of the body, so a lookup touches
//! exactly one body and verifies it before trusting a single entry.
//!
//! Header, 22 bytes:
//!
//! | Type    | Name              | Description |
//! | ------: | ----------------- | ----------- |
//! | u16 LE  | signature         | `"EN"` (`0x4E45`) |
//! | u8      | reserved          | |
//! | u8      | hash_size_a       | key width in table A |
//! | u8      | hash_size_b       | key width in table B |
//! | u32     | reserved          | |
//! | u32 BE  | table_size_a      | chunk count of table A |
//! | u32 BE  | table_size_b      | chunk count of table B |
//! | u8      | reserved          | |
//! | u32 BE  | string_table_size | skipped |
//!
//! Within a body, entries are packed as `key_count: u16 LE`,
//! `file_size: u32 BE`, the content hash, then `key_count` storage keys;
//! `key_count == 0` terminates the body.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use log::debug;
use parking_lot::Mutex;

use crate::errors::{Error, Result};
use crate::hash::{md5_bytes, FullKey, Key};

const SIGNATURE: u16 = 0x4E45;
const HEADER_SIZE: u64 = 22;
const CHUNK_HEAD_SIZE: u64 = 32;
pub const CHUNK_BODY_SIZE: usize = 4096;

/// Key width this reader supports. The format is self-describing but every
/// known archive uses 16-byte hashes throughout.
const HASH_SIZE: u8 = 16;

/// Upper bound on the chunk count of one table, to keep a corrupt header
/// from driving allocation.
const MAX_TABLE_SIZE: u32 = 1 << 20;

#[derive(Debug, Clone, Copy)]
struct ChunkHead {
    first: FullKey,
    hash: FullKey,
}

struct Table {
    heads: Vec<ChunkHead>,
    bodies_offset: u64,
}

/// Parsed encoding table over a seekable stream. Chunk heads are resident;
/// bodies are read and verified per lookup.
pub struct Encoding<R: Read + Seek> {
    stream: Mutex<R>,
    table_a: Table,
    table_b: Table,
}

impl<R: Read + Seek> Encoding<R> {
    pub fn parse(mut stream: R) -> Result<Self> {
        let signature = stream.read_u16::<LittleEndian>()?;
        if signature != SIGNATURE {
            return Err(Error::InvalidSignature {
                actual: signature as u32,
                expected: SIGNATURE as u32,
            });
        }

        stream.seek(SeekFrom::Current(1))?;
        let hash_size_a = stream.read_u8()?;
        let hash_size_b = stream.read_u8()?;
        stream.seek(SeekFrom::Current(4))?;
        let table_size_a = stream.read_u32::<BigEndian>()?;
        let table_size_b = stream.read_u32::<BigEndian>()?;
        stream.seek(SeekFrom::Current(1))?;
        let string_table_size = stream.read_u32::<BigEndian>()?;

        for (table, size, hash_size) in [
            ("A", table_size_a, hash_size_a),
            ("B", table_size_b, hash_size_b),
        ] {
            if size > MAX_TABLE_SIZE {
                return Err(Error::format(format!(
                    "encoding table {} claims {} chunks",
                    table, size
                )));
            }
            if size > 0 && hash_size != HASH_SIZE {
                return Err(Error::format(format!(
                    "encoding table {} uses {}-byte hashes, expected {}",
                    table, hash_size, HASH_SIZE
                )));
            }
        }

        stream.seek(SeekFrom::Current(string_table_size as i64))?;

        let heads_a_offset = HEADER_SIZE + string_table_size as u64;
        let heads_a = read_heads(&mut stream, table_size_a)?;
        let bodies_a_offset = heads_a_offset + u64::from(table_size_a) * CHUNK_HEAD_SIZE;

        let bodies_a_len = u64::from(table_size_a) * CHUNK_BODY_SIZE as u64;
        stream.seek(SeekFrom::Start(bodies_a_offset + bodies_a_len))?;
        let heads_b = read_heads(&mut stream, table_size_b)?;
        let bodies_b_offset =
            bodies_a_offset + bodies_a_len + u64::from(table_size_b) * CHUNK_HEAD_SIZE;

        debug!(
            "encoding: table A {} chunks, table B {} chunks",
            heads_a.len(),
            heads_b.len()
        );

        Ok(Encoding {
            stream: Mutex::new(stream),
            table_a: Table {
                heads: heads_a,
                bodies_offset: bodies_a_offset,
            },
            table_b: Table {
                heads: heads_b,
                bodies_offset: bodies_b_offset,
            },
        })
    }

    /// The storage keys for a content hash.
    ///
    /// Table A is consulted first; table B only after A misses. A content
    /// hash present in neither raises `NotFound`.
    pub fn find(&self, hash: &FullKey) -> Result<Vec<FullKey>> {
        if let Some(keys) = self.search(&self.table_a, hash)? {
            return Ok(keys);
        }
        if let Some(keys) = self.search(&self.table_b, hash)? {
            return Ok(keys);
        }
        Err(Error::not_found(format!("content hash {}", hash)))
    }

    fn search(&self, table: &Table, target: &FullKey) -> Result<Option<Vec<FullKey>>> {
        // Heads are sorted ascending by first key; the candidate chunk is
        // the highest one whose first key is <= the target.
        let below = table.heads.partition_point(|head| head.first <= *target);
        if below == 0 {
            return Ok(None);
        }
        let chunk = below - 1;

        let mut body = vec![0u8; CHUNK_BODY_SIZE];
        {
            let mut stream = self.stream.lock();
            stream.seek(SeekFrom::Start(
                table.bodies_offset + (chunk * CHUNK_BODY_SIZE) as u64,
            ))?;
            stream.read_exact(&mut body)?;
        }

        let actual = md5_bytes(&body);
        let expected = table.heads[chunk].hash;
        if actual != expected {
            return Err(Error::invalid_hash(
                expected,
                actual,
                format!("encoding chunk {}", chunk),
            ));
        }

        scan_body(&body, target)
    }
}

fn read_heads<R: Read>(stream: &mut R, count: u32) -> Result<Vec<ChunkHead>> {
    let mut heads = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut first = [0u8; 16];
        let mut hash = [0u8; 16];
        stream.read_exact(&mut first)?;
        stream.read_exact(&mut hash)?;
        heads.push(ChunkHead {
            first: Key::from(first),
            hash: Key::from(hash),
        });
    }
    Ok(heads)
}

/// Walk a verified chunk body looking for `target`.
fn scan_body(body: &[u8], target: &FullKey) -> Result<Option<Vec<FullKey>>> {
    let mut cursor = &body[..];

    loop {
        if cursor.len() < 2 {
            return Ok(None);
        }
        let key_count = cursor.read_u16::<LittleEndian>()?;
        if key_count == 0 {
            return Ok(None);
        }

        let entry_len = 4 + 16 + usize::from(key_count) * 16;
        if cursor.len() < entry_len {
            return Err(Error::format(format!(
                "encoding entry with {} keys overruns its chunk",
                key_count
            )));
        }

        let _file_size = cursor.read_u32::<BigEndian>()?;
        let mut content_hash = [0u8; 16];
        cursor.read_exact(&mut content_hash)?;

        if FullKey::from(content_hash) == *target {
            let mut keys = Vec::with_capacity(usize::from(key_count));
            for _ in 0..key_count {
                let mut key = [0u8; 16];
                cursor.read_exact(&mut key)?;
                keys.push(FullKey::from(key));
            }
            return Ok(Some(keys));
        }

        // Skip this entry's keys.
        cursor = &cursor[usize::from(key_count) * 16..];
    }
}

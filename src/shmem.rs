//! Shared-memory descriptor.
//!
//! The writer process keeps a small descriptor file (`shmem`) next to the
//! data files. Readers consult it for three things: the path the writer
//! recorded for the data directory, the per-bucket shard versions and
//! generations that name the active `.idx` files, and the data-file
//! capacity that fixes how many bits of an index location hold the byte
//! offset.
//!
//! On-disk layout, little-endian throughout:
//!
//! | Type        | Name               | Description |
//! | ----------: | ------------------ | ----------- |
//! | u32         | block_type         | `4`, header block |
//! | u32         | block_size         | byte length of the header block |
//! | [u8; 0x100] | data_path          | NUL-padded writer path |
//! | u32 × 16    | versions           | per-bucket shard version |
//! | u32 × 16    | generations        | per-bucket generation tag |
//! | u64         | data_file_size_max | capacity of one `data.NNN` file |
//! | u32         | block_type         | `1`, free-space block |
//! | u32         | count              | number of data files |
//! | u64 × count | sizes              | current size of each data file |

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;

use crate::errors::{Error, Result};

const HEADER_BLOCK: u32 = 4;
const FREE_SPACE_BLOCK: u32 = 1;
const PATH_FIELD_LEN: usize = 0x100;

/// Offset-bit shift used when a data-file capacity is absent.
const DEFAULT_OFFSET_BITS: u32 = 30;

/// Parsed shared-memory descriptor.
#[derive(Debug, Clone)]
pub struct Shmem {
    data_path: String,
    versions: [u32; 16],
    generations: [u32; 16],
    data_file_size_max: u64,
    data_file_sizes: Vec<u64>,
}

impl Shmem {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::parse(&mut BufReader::new(file))
    }

    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let block_type = reader.read_u32::<LittleEndian>()?;
        if block_type != HEADER_BLOCK {
            return Err(Error::format(format!(
                "shmem header block type {}, expected {}",
                block_type, HEADER_BLOCK
            )));
        }
        let _block_size = reader.read_u32::<LittleEndian>()?;

        let mut path_field = [0u8; PATH_FIELD_LEN];
        reader.read_exact(&mut path_field)?;
        let path_len = path_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PATH_FIELD_LEN);
        let data_path = String::from_utf8_lossy(&path_field[..path_len]).into_owned();

        let mut versions = [0u32; 16];
        for slot in versions.iter_mut() {
            *slot = reader.read_u32::<LittleEndian>()?;
        }
        let mut generations = [0u32; 16];
        for slot in generations.iter_mut() {
            *slot = reader.read_u32::<LittleEndian>()?;
        }
        let data_file_size_max = reader.read_u64::<LittleEndian>()?;

        let block_type = reader.read_u32::<LittleEndian>()?;
        if block_type != FREE_SPACE_BLOCK {
            return Err(Error::format(format!(
                "shmem free-space block type {}, expected {}",
                block_type, FREE_SPACE_BLOCK
            )));
        }
        let count = reader.read_u32::<LittleEndian>()? as usize;
        let mut data_file_sizes = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            data_file_sizes.push(reader.read_u64::<LittleEndian>()?);
        }

        debug!(
            "shmem: {} data files, capacity {:#x}, path {:?}",
            data_file_sizes.len(),
            data_file_size_max,
            data_path
        );

        Ok(Shmem {
            data_path,
            versions,
            generations,
            data_file_size_max,
            data_file_sizes,
        })
    }

    /// The path string the writer recorded for the data-file directory.
    pub fn data_path(&self) -> &str {
        &self.data_path
    }

    /// Per-bucket shard versions; names the active `.idx` per bucket.
    pub fn versions(&self) -> &[u32; 16] {
        &self.versions
    }

    /// Per-bucket generation tags; the higher generation wins a merge.
    pub fn generations(&self) -> &[u32; 16] {
        &self.generations
    }

    pub fn data_file_size_max(&self) -> u64 {
        self.data_file_size_max
    }

    /// Current sizes of `data.000`, `data.001`, …
    pub fn data_file_sizes(&self) -> &[u64] {
        &self.data_file_sizes
    }

    /// How many low bits of a 40-bit index location hold the byte offset.
    ///
    /// `ceil(log2(capacity))`; installs without a recorded capacity get the
    /// conventional 30-bit split.
    pub fn offset_bits(&self) -> u32 {
        match self.data_file_size_max {
            0 => DEFAULT_OFFSET_BITS,
            max => 64 - (max - 1).leading_zeros(),
        }
    }
}

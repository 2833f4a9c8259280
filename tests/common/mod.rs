//! Builders that assemble a miniature installed archive on disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use casket::hash::{md5_bytes, FullKey};
use casket::index::shard_file_name;

pub const RECORD_HEADER_SIZE: usize = 30;

/// Build configuration hash every test install is keyed by.
pub const CONFIG_HASH: &str = "0da08d69484c74c91e50aab485f5b4ba";

pub enum FrameSpec<'a> {
    Raw(&'a [u8]),
    Zlib(&'a [u8]),
}

fn encode_frame(frame: &FrameSpec) -> (Vec<u8>, u32) {
    match frame {
        FrameSpec::Raw(body) => {
            let mut encoded = vec![b'N'];
            encoded.extend_from_slice(body);
            (encoded, body.len() as u32)
        }
        FrameSpec::Zlib(body) => {
            let mut encoder = ZlibEncoder::new(vec![b'Z'], Compression::default());
            encoder.write_all(body).unwrap();
            (encoder.finish().unwrap(), body.len() as u32)
        }
    }
}

/// A framed payload with an explicit frame table.
pub fn blte_payload(frames: &[FrameSpec]) -> Vec<u8> {
    let encoded: Vec<(Vec<u8>, u32)> = frames.iter().map(encode_frame).collect();
    let header_size = 12 + encoded.len() * 24;

    let mut out = Vec::new();
    out.extend_from_slice(b"BLTE");
    out.write_u32::<BigEndian>(header_size as u32).unwrap();
    out.write_u8(0x0F).unwrap();
    out.write_u24::<BigEndian>(encoded.len() as u32).unwrap();
    for (frame, decoded_size) in &encoded {
        out.write_u32::<BigEndian>(frame.len() as u32).unwrap();
        out.write_u32::<BigEndian>(*decoded_size).unwrap();
        out.extend_from_slice(md5_bytes(frame).as_bytes());
    }
    for (frame, _) in &encoded {
        out.extend_from_slice(frame);
    }
    out
}

/// A framed payload in the implicit single-frame form.
pub fn implicit_blte_payload(frame: &FrameSpec) -> Vec<u8> {
    let (encoded, _) = encode_frame(frame);
    let mut out = Vec::new();
    out.extend_from_slice(b"BLTE");
    out.write_u32::<BigEndian>(0).unwrap();
    out.extend_from_slice(&encoded);
    out
}

/// Accumulates blobs and mappings, then writes a complete install:
/// `.build.info`, the build configuration, shmem, sixteen index shards,
/// and `data.000`.
pub struct Install {
    root: PathBuf,
    data: Vec<u8>,
    index_entries: BTreeMap<[u8; 9], (u64, u32)>,
    encoding_map: BTreeMap<FullKey, (u32, Vec<FullKey>)>,
    config_lines: Vec<String>,
    /// Every stored blob: (storage key, record offset, record size).
    pub placed: Vec<(FullKey, u32, u32)>,
}

impl Install {
    pub fn new(root: &Path) -> Self {
        Install {
            root: root.to_path_buf(),
            data: Vec::new(),
            index_entries: BTreeMap::new(),
            encoding_map: BTreeMap::new(),
            config_lines: Vec::new(),
            placed: Vec::new(),
        }
    }

    /// Store a framed payload as an archive record and index it.
    pub fn add_blob(&mut self, payload: &[u8]) -> FullKey {
        let key = md5_bytes(payload);
        let offset = self.data.len() as u32;
        let size = (payload.len() + RECORD_HEADER_SIZE) as u32;

        self.data.extend_from_slice(key.reversed().as_bytes());
        self.data.write_u32::<LittleEndian>(size).unwrap();
        self.data.extend_from_slice(&[0u8; 10]);
        self.data.extend_from_slice(payload);

        self.index_entries
            .insert(*key.index_key().as_bytes(), (u64::from(offset), size));
        self.placed.push((key, offset, size));
        key
    }

    /// Record an encoding-table entry: content hash → storage keys.
    pub fn map(&mut self, content_hash: FullKey, file_size: u32, keys: &[FullKey]) {
        self.encoding_map
            .insert(content_hash, (file_size, keys.to_vec()));
    }

    /// Add a `key = values` line to the build configuration.
    pub fn config_line(&mut self, line: &str) {
        self.config_lines.push(line.to_owned());
    }

    /// Write the install to disk.
    pub fn finish(mut self) {
        // The encoding table itself is a blob in the archive.
        let encoding_bytes = self.encoding_bytes();
        let encoding_payload = blte_payload(&[FrameSpec::Raw(&encoding_bytes)]);
        let encoding_key = self.add_blob(&encoding_payload);

        let data_dir = self.root.join("Data");
        fs::create_dir_all(&data_dir).unwrap();

        // Build configuration, fanned out under config/xx/yy/.
        let config_dir = data_dir
            .join("config")
            .join(&CONFIG_HASH[..2])
            .join(&CONFIG_HASH[2..4]);
        fs::create_dir_all(&config_dir).unwrap();
        let mut config = String::from("# build configuration\n");
        for line in &self.config_lines {
            config.push_str(line);
            config.push('\n');
        }
        config.push_str(&format!(
            "encoding = {:032x} {}\n",
            0x1234u128, encoding_key
        ));
        fs::write(config_dir.join(CONFIG_HASH), config).unwrap();

        // Build info pointing at that configuration.
        fs::write(
            self.root.join(".build.info"),
            format!(
                "Branch!STRING:0|Active!DEC:1|Build Key!HEX:16|CDN Key!HEX:16\n\
                 test|1|{}|{:032x}\n",
                CONFIG_HASH, 0xFEEDu128
            ),
        )
        .unwrap();

        // Shmem: every bucket at version 1, generation 0, 1 GiB capacity.
        let mut shmem = Vec::new();
        shmem.write_u32::<LittleEndian>(4).unwrap();
        shmem.write_u32::<LittleEndian>(0x1A8).unwrap();
        shmem.extend_from_slice(&[0u8; 0x100]);
        for _ in 0..16 {
            shmem.write_u32::<LittleEndian>(1).unwrap();
        }
        for _ in 0..16 {
            shmem.write_u32::<LittleEndian>(0).unwrap();
        }
        shmem.write_u64::<LittleEndian>(1 << 30).unwrap();
        shmem.write_u32::<LittleEndian>(1).unwrap();
        shmem.write_u32::<LittleEndian>(1).unwrap();
        shmem
            .write_u64::<LittleEndian>(self.data.len() as u64)
            .unwrap();
        fs::write(data_dir.join("shmem"), shmem).unwrap();

        // Sixteen shards, entries routed by bucket.
        for bucket in 0..16u8 {
            let entries: Vec<(&[u8; 9], &(u64, u32))> = self
                .index_entries
                .iter()
                .filter(|(key, _)| casket::bucket(&key[..]) == bucket)
                .collect();

            let mut shard = Vec::new();
            shard
                .write_u32::<LittleEndian>(entries.len() as u32 * 18)
                .unwrap();
            shard.write_u32::<LittleEndian>(0).unwrap();
            shard.write_u8(9).unwrap();
            shard.write_u8(5).unwrap();
            shard.write_u8(4).unwrap();
            shard.write_u8(bucket).unwrap();
            shard.write_u32::<LittleEndian>(0).unwrap();
            for (key, (location, size)) in entries {
                shard.extend_from_slice(&key[..]);
                shard.write_uint::<BigEndian>(*location, 5).unwrap();
                shard.write_u32::<LittleEndian>(*size).unwrap();
            }
            fs::write(data_dir.join(shard_file_name(bucket, 1)), shard).unwrap();
        }

        fs::write(data_dir.join("data.000"), &self.data).unwrap();
    }

    fn encoding_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (hash, (file_size, keys)) in &self.encoding_map {
            body.write_u16::<LittleEndian>(keys.len() as u16).unwrap();
            body.write_u32::<BigEndian>(*file_size).unwrap();
            body.extend_from_slice(hash.as_bytes());
            for key in keys {
                body.extend_from_slice(key.as_bytes());
            }
        }
        assert!(body.len() <= 4096, "test encoding table needs one chunk");
        body.resize(4096, 0);

        let first = self
            .encoding_map
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| FullKey::from([0u8; 16]));

        let mut out = Vec::new();
        out.write_u16::<LittleEndian>(0x4E45).unwrap();
        out.write_u8(0).unwrap();
        out.write_u8(16).unwrap();
        out.write_u8(16).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<BigEndian>(1).unwrap();
        out.write_u32::<BigEndian>(0).unwrap();
        out.write_u8(0).unwrap();
        out.write_u32::<BigEndian>(0).unwrap();
        out.extend_from_slice(first.as_bytes());
        out.extend_from_slice(md5_bytes(&body).as_bytes());
        out.extend_from_slice(&body);
        out
    }
}

//! Low-level parsing of archive records and framed-payload headers.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::errors::{Error, Result};
use crate::hash::FullKey;

pub const RECORD_HEADER_SIZE: usize = 30;

const MAGIC: &[u8; 4] = b"BLTE";
const FRAME_TABLE_OFFSET: usize = 12;
const FRAME_DESC_SIZE: usize = 24;

/// The 30-byte header in front of every stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Storage key, already flipped back into canonical byte order.
    pub key: FullKey,
    /// Total record length, header included.
    pub size: u32,
}

impl RecordHeader {
    pub fn parse(bytes: &[u8; RECORD_HEADER_SIZE]) -> Result<Self> {
        let key = FullKey::from_slice(&bytes[..16])?.reversed();
        let size = LittleEndian::read_u32(&bytes[16..20]);
        if (size as usize) < RECORD_HEADER_SIZE {
            return Err(Error::format(format!(
                "archive record of {} bytes cannot hold its own header",
                size
            )));
        }
        Ok(RecordHeader { key, size })
    }

    /// Length of the framed payload that follows the header.
    pub fn payload_size(&self) -> usize {
        self.size as usize - RECORD_HEADER_SIZE
    }
}

/// One frame of a framed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub encoded_size: u32,
    /// Zero until decoded for the implicit single-frame form.
    pub decoded_size: u32,
    /// MD5 of the encoded frame; absent for the implicit form.
    pub checksum: Option<FullKey>,
    /// Where the encoded frame starts inside the payload.
    pub encoded_offset: usize,
    /// Logical position of the frame in the decoded stream; filled in once
    /// all decoded sizes are known.
    pub decoded_offset: u64,
}

/// Parse the framed-payload header and lay out the frame table.
///
/// `payload` is the full raw payload of one archive record, magic first.
pub fn parse_payload_header(payload: &[u8]) -> Result<Vec<Frame>> {
    if payload.len() < 8 {
        return Err(Error::format("framed payload shorter than its fixed header"));
    }
    if &payload[..4] != MAGIC {
        return Err(Error::InvalidSignature {
            actual: BigEndian::read_u32(&payload[..4]),
            expected: BigEndian::read_u32(MAGIC),
        });
    }

    let header_size = BigEndian::read_u32(&payload[4..8]) as usize;

    // header_size == 0: the rest of the payload is one implicit frame.
    if header_size == 0 {
        return Ok(vec![Frame {
            encoded_size: (payload.len() - 8) as u32,
            decoded_size: 0,
            checksum: None,
            encoded_offset: 8,
            decoded_offset: 0,
        }]);
    }

    if payload.len() < FRAME_TABLE_OFFSET || header_size > payload.len() {
        return Err(Error::format("framed payload shorter than its frame table"));
    }

    let _flags = payload[8];
    let frame_count = BigEndian::read_u24(&payload[9..12]) as usize;
    if frame_count == 0 {
        return Err(Error::format("framed payload declares zero frames"));
    }

    let table_end = FRAME_TABLE_OFFSET + frame_count * FRAME_DESC_SIZE;
    if table_end > header_size {
        return Err(Error::format(format!(
            "frame table of {} entries overruns a {}-byte header",
            frame_count, header_size
        )));
    }

    let mut frames = Vec::with_capacity(frame_count);
    let mut encoded_offset = header_size;

    for i in 0..frame_count {
        let desc = &payload[FRAME_TABLE_OFFSET + i * FRAME_DESC_SIZE..];
        let encoded_size = BigEndian::read_u32(&desc[..4]);
        let decoded_size = BigEndian::read_u32(&desc[4..8]);
        let checksum = FullKey::from_slice(&desc[8..24])?;

        frames.push(Frame {
            encoded_size,
            decoded_size,
            checksum: Some(checksum),
            encoded_offset,
            decoded_offset: 0,
        });
        encoded_offset = encoded_offset
            .checked_add(encoded_size as usize)
            .ok_or_else(|| Error::format("frame sizes overflow the payload"))?;
    }

    if encoded_offset > payload.len() {
        return Err(Error::format(format!(
            "frames claim {} bytes but the payload holds {}",
            encoded_offset, payload.len()
        )));
    }

    Ok(frames)
}


/// Assemble a framed payload from pre-encoded frames. Test support.
#[cfg(test)]
pub(crate) fn payload_with_frames(encoded_frames: &[(Vec<u8>, u32)]) -> Vec<u8> {
    use byteorder::WriteBytesExt;

    use crate::hash::md5_bytes;

    let header_size = FRAME_TABLE_OFFSET + encoded_frames.len() * FRAME_DESC_SIZE;

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.write_u32::<BigEndian>(header_size as u32).unwrap();
    out.write_u8(0x0F).unwrap();
    out.write_u24::<BigEndian>(encoded_frames.len() as u32)
        .unwrap();
    for (encoded, decoded_size) in encoded_frames {
        out.write_u32::<BigEndian>(encoded.len() as u32).unwrap();
        out.write_u32::<BigEndian>(*decoded_size).unwrap();
        out.extend_from_slice(md5_bytes(encoded).as_bytes());
    }
    for (encoded, _) in encoded_frames {
        out.extend_from_slice(encoded);
    }
    out
}

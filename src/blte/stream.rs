//! Seekable decoded view over a framed payload.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use log::debug;

use crate::blte::handler::Handlers;
use crate::blte::raw::parse_payload_header;
use crate::blte::raw::Frame;
use crate::errors::{Error, Result};
use crate::hash::md5_bytes;

/// A readable, seekable stream over the logical concatenation of a
/// payload's decoded frames.
///
/// Frames decode lazily on first touch and the most recently used decoded
/// frame stays cached, so seeks within a frame are free and seeks across
/// frames decode only the target. The raw payload was verified against its
/// storage key before this stream was handed out; per-frame checksums are
/// verified here as each frame is first decoded.
#[derive(Debug)]
pub struct BlteStream {
    payload: Vec<u8>,
    frames: Vec<Frame>,
    length: u64,
    pos: u64,
    cache: Option<(usize, Vec<u8>)>,
    handlers: Arc<Handlers>,
}

impl BlteStream {
    /// Parse a raw framed payload into a decoded stream.
    ///
    /// The implicit single-frame form (`header_size == 0`) carries no
    /// decoded size, so that one frame is decoded here; everything else
    /// stays encoded until read.
    pub fn new(payload: Vec<u8>, handlers: Arc<Handlers>) -> Result<Self> {
        let mut frames = parse_payload_header(&payload)?;
        let mut cache = None;

        if frames.len() == 1 && frames[0].checksum.is_none() {
            let frame = &mut frames[0];
            let encoded =
                &payload[frame.encoded_offset..frame.encoded_offset + frame.encoded_size as usize];
            let decoded = handlers.decode(encoded)?;
            frame.decoded_size = decoded.len() as u32;
            cache = Some((0, decoded));
        }

        let mut offset = 0u64;
        for frame in &mut frames {
            frame.decoded_offset = offset;
            offset += u64::from(frame.decoded_size);
        }

        debug!("blte: {} frames, {} decoded bytes", frames.len(), offset);

        Ok(BlteStream {
            payload,
            frames,
            length: offset,
            pos: 0,
            cache,
            handlers,
        })
    }

    /// Total decoded length in bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The frame holding logical position `pos` (`pos < length`).
    fn frame_index(&self, pos: u64) -> usize {
        self.frames
            .partition_point(|frame| frame.decoded_offset <= pos)
            - 1
    }

    /// Decode and verify a frame into the cache unless already there.
    fn ensure_frame(&mut self, index: usize) -> Result<()> {
        if matches!(self.cache, Some((cached, _)) if cached == index) {
            return Ok(());
        }

        let frame = &self.frames[index];
        let encoded =
            &self.payload[frame.encoded_offset..frame.encoded_offset + frame.encoded_size as usize];

        if let Some(expected) = frame.checksum {
            let actual = md5_bytes(encoded);
            if actual != expected {
                return Err(Error::invalid_hash(
                    expected,
                    actual,
                    format!("frame {}", index),
                ));
            }
        }

        let decoded = self.handlers.decode(encoded)?;
        if decoded.len() as u64 != u64::from(frame.decoded_size) {
            return Err(Error::format(format!(
                "frame {} decoded to {} bytes, descriptor says {}",
                index,
                decoded.len(),
                frame.decoded_size
            )));
        }

        self.cache = Some((index, decoded));
        Ok(())
    }
}

impl Read for BlteStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.length || buf.is_empty() {
            return Ok(0);
        }

        let index = self.frame_index(self.pos);
        let frame_start = self.frames[index].decoded_offset;
        self.ensure_frame(index)?;

        let Some((_, decoded)) = &self.cache else {
            return Ok(0);
        };
        let frame_pos = (self.pos - frame_start) as usize;
        let count = buf.len().min(decoded.len() - frame_pos);
        buf[..count].copy_from_slice(&decoded[frame_pos..frame_pos + count]);

        self.pos += count as u64;
        Ok(count)
    }
}

impl Seek for BlteStream {
    fn seek(&mut self, target: SeekFrom) -> std::io::Result<u64> {
        let position = match target {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => self.length as i128 + delta as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
        };
        if position < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before the start of the stream",
            ));
        }
        self.pos = position as u64;
        Ok(self.pos)
    }
}

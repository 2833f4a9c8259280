//! Framed blob format ("BLTE").
//!
//! Every blob stored in a data file is framed: the payload is cut into
//! frames, each independently compressed and checksummed, so a reader can
//! decode any part of a large asset without inflating the rest.
//!
//! # Archive record
//!
//! A blob sits at a known offset inside a `data.NNN` file behind a 30-byte
//! record header:
//!
//! | Type     | Name        | Description |
//! | -------: | ----------- | ----------- |
//! | [u8; 16] | key         | storage key, byte-reversed |
//! | u32 LE   | record_size | total record length, this header included |
//! | [u8; 10] | reserved    | |
//!
//! The key bytes are stored in reverse order; they are flipped back before
//! any comparison. The payload that follows is the framed blob, and its
//! MD5 must equal the storage key.
//!
//! # Framed payload
//!
//! | Type    | Name        | Description |
//! | ------: | ----------- | ----------- |
//! | [u8; 4] | magic       | `"BLTE"` |
//! | u32 BE  | header_size | 0 for a single implicit frame |
//! | u8      | flags       | present when `header_size > 0` |
//! | u24 BE  | frame_count | present when `header_size > 0` |
//! | 24 × n  | frames      | descriptors, see below |
//! | …       | data        | frame bodies, packed in order |
//!
//! Frame descriptor: `encoded_size: u32 BE`, `decoded_size: u32 BE`,
//! `checksum: [u8; 16]` (MD5 of the encoded frame, mode byte included).
//!
//! When `header_size == 0` the whole remaining payload is one frame with
//! no descriptor; its decoded length is only known after decoding.
//!
//! # Frame encoding
//!
//! The first byte of every encoded frame selects a compression handler:
//! `'N'` is a raw passthrough, `'Z'` a zlib stream, and anything else is
//! dispatched through the registry supplied at container construction.
//! Unknown modes fail the read.

pub mod handler;
pub mod raw;
pub mod stream;

pub use handler::{FrameHandler, Handlers, RawHandler, ZlibHandler};
pub use raw::{parse_payload_header, Frame, RecordHeader, RECORD_HEADER_SIZE};
pub use stream::BlteStream;

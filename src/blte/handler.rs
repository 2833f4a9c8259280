//! Compression handlers keyed by the frame mode byte.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::errors::{Error, Result};

/// Decodes one encoded frame (mode byte included) into its plain bytes.
///
/// Handlers are registered by mode byte; adding a compression scheme means
/// registering another implementation, never touching the reader.
pub trait FrameHandler: Send + Sync {
    /// The mode byte this handler claims.
    fn mode(&self) -> u8;

    /// Decode `frame`, which starts with the mode byte.
    fn decode(&self, frame: &[u8]) -> Result<Vec<u8>>;
}

/// `'N'`: raw passthrough.
pub struct RawHandler;

impl FrameHandler for RawHandler {
    fn mode(&self) -> u8 {
        b'N'
    }

    fn decode(&self, frame: &[u8]) -> Result<Vec<u8>> {
        Ok(frame[1..].to_vec())
    }
}

/// `'Z'`: zlib-compressed body after the mode byte.
pub struct ZlibHandler;

impl FrameHandler for ZlibHandler {
    fn mode(&self) -> u8 {
        b'Z'
    }

    fn decode(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mut decoded = Vec::new();
        ZlibDecoder::new(&frame[1..])
            .read_to_end(&mut decoded)
            .map_err(|e| Error::format(format!("zlib frame: {}", e)))?;
        Ok(decoded)
    }
}

/// Registry of frame handlers, consulted per frame by mode byte.
pub struct Handlers {
    map: HashMap<u8, Box<dyn FrameHandler>>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("modes", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Handlers {
    /// A registry with the two standard modes (`'N'`, `'Z'`) installed.
    pub fn new() -> Self {
        let mut handlers = Self::empty();
        handlers.register(Box::new(RawHandler));
        handlers.register(Box::new(ZlibHandler));
        handlers
    }

    /// A registry with nothing installed.
    pub fn empty() -> Self {
        Handlers {
            map: HashMap::new(),
        }
    }

    /// Install a handler, replacing any previous one for the same mode.
    pub fn register(&mut self, handler: Box<dyn FrameHandler>) {
        self.map.insert(handler.mode(), handler);
    }

    /// Decode an encoded frame by dispatching on its first byte.
    pub fn decode(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let mode = *frame
            .first()
            .ok_or_else(|| Error::format("empty frame has no mode byte"))?;
        self.map
            .get(&mode)
            .ok_or(Error::UnsupportedCompression(mode))?
            .decode(frame)
    }
}

impl Default for Handlers {
    fn default() -> Self {
        Handlers::new()
    }
}

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised along the lookup and retrieval pipeline.
///
/// Only `NotFound` is meant to be recovered from (callers may fall back to
/// another table or key). Signature and digest mismatches indicate a corrupt
/// or mis-addressed archive and abort the read before any byte is exposed.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid signature {actual:#x}, expected {expected:#x}")]
    InvalidSignature { actual: u32, expected: u32 },

    #[error("digest mismatch in {context}: expected {expected}, got {actual}")]
    InvalidHash {
        expected: String,
        actual: String,
        context: String,
    },

    #[error("unsupported compression mode {0:#04x}")]
    UnsupportedCompression(u8),

    #[error("malformed data: {0}")]
    Format(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn format(what: impl Into<String>) -> Self {
        Error::Format(what.into())
    }

    pub fn invalid_hash(
        expected: impl ToString,
        actual: impl ToString,
        context: impl Into<String>,
    ) -> Self {
        Error::InvalidHash {
            expected: expected.to_string(),
            actual: actual.to_string(),
            context: context.into(),
        }
    }

    /// True for the one recoverable kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

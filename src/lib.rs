//! Read-only access to content-addressed game-asset archives.
//!
//! An installed archive spreads tens of gigabytes of deduplicated,
//! compressed blobs over numbered data files. Two indirection layers stand
//! between a content hash and its bytes: the encoding table maps the hash
//! to one or more storage keys, and the bucketed local index places each
//! key at a `(data file, offset, size)` triple. The blob found there is a
//! framed payload that decodes into the original bytes.
//!
//! [`Container`] composes the whole pipeline:
//!
//! ```no_run
//! use casket::{blte::Handlers, Container};
//!
//! # fn main() -> casket::Result<()> {
//! let container = Container::open("/games/example", "Data", Handlers::new())?;
//! let root_hash = container.build_config().get_key("root", 0)?;
//! let stream = container.open_file_by_hash(&root_hash)?;
//! # Ok(())
//! # }
//! ```

pub mod blte;
pub mod config;
pub mod container;
pub mod data;
pub mod encoding;
pub mod errors;
pub mod hash;
pub mod index;
pub mod shmem;

pub use container::Container;
pub use errors::{Error, Result};
pub use hash::{bucket, FullKey, IndexKey};

//! Container façade: the full lookup and retrieval pipeline.
//!
//! ```text
//! content hash ──encoding──▶ storage key ──index──▶ (file, offset, size)
//!                                              ──▶ raw framed payload ──▶ decoded stream
//! ```
//!
//! Opening a container reads `.build.info`, resolves the active build,
//! parses its configuration, loads the shmem descriptor and all sixteen
//! index shards. The encoding table is itself a blob inside the archive
//! and is only opened and parsed on the first query that needs it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::blte::{BlteStream, Handlers, RecordHeader, RECORD_HEADER_SIZE};
use crate::config::{BuildInfo, Configuration};
use crate::data::DataFilePool;
use crate::encoding::Encoding;
use crate::errors::{Error, Result};
use crate::hash::{md5_bytes, FullKey};
use crate::index::Index;
use crate::shmem::Shmem;

pub struct Container {
    build_info: BuildInfo,
    build_config: Configuration,
    shmem: Shmem,
    index: Index,
    pool: DataFilePool,
    handlers: Arc<Handlers>,
    encoding: RwLock<Option<Arc<Encoding<BlteStream>>>>,
}

impl Container {
    /// Open an installed archive.
    ///
    /// `install_root` is the directory holding `.build.info`; `data_dir`
    /// is the name of the data directory under it. `handlers` decides
    /// which frame compression modes this container can decode.
    pub fn open<P: AsRef<Path>>(
        install_root: P,
        data_dir: &str,
        handlers: Handlers,
    ) -> Result<Self> {
        let install_root = install_root.as_ref();
        let data_dir = install_root.join(data_dir);

        let build_info = BuildInfo::open(install_root.join(".build.info"))?;
        let build_key = build_info.build_key()?;
        debug!("active build {}", build_key);

        let build_config = Configuration::open(config_path(&data_dir, &build_key))?;
        let shmem = Shmem::open(data_dir.join("shmem"))?;
        let index = Index::load(&data_dir, &shmem)?;
        debug!("index holds {} entries", index.len());

        Ok(Container {
            build_info,
            build_config,
            shmem,
            index,
            pool: DataFilePool::new(data_dir),
            handlers: Arc::new(handlers),
            encoding: RwLock::new(None),
        })
    }

    pub fn build_info(&self) -> &BuildInfo {
        &self.build_info
    }

    /// The parsed configuration of the active build.
    pub fn build_config(&self) -> &Configuration {
        &self.build_config
    }

    pub fn shmem(&self) -> &Shmem {
        &self.shmem
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// The encoding table, parsed on first use.
    ///
    /// The table is reached through the build configuration's `encoding`
    /// entry, whose last value is the storage key of the encoding blob.
    pub fn encoding(&self) -> Result<Arc<Encoding<BlteStream>>> {
        if let Some(encoding) = self.encoding.read().as_ref() {
            return Ok(encoding.clone());
        }

        let mut slot = self.encoding.write();
        if let Some(encoding) = slot.as_ref() {
            return Ok(encoding.clone());
        }

        let values = self.build_config.get("encoding")?;
        let key: FullKey = values
            .last()
            .ok_or_else(|| Error::format("config entry 'encoding' has no values"))?
            .parse()?;
        debug!("parsing encoding table from {}", key);

        let stream = self.open_file_by_key(&key)?;
        let encoding = Arc::new(Encoding::parse(stream)?);
        *slot = Some(encoding.clone());
        Ok(encoding)
    }

    /// Open a decoded stream for a content hash.
    ///
    /// The encoding table may name several storage keys for one hash; the
    /// first one the index can place is used.
    pub fn open_file_by_hash(&self, hash: &FullKey) -> Result<BlteStream> {
        let keys = self.encoding()?.find(hash)?;

        let mut missing = None;
        for key in &keys {
            match self.open_file_by_key(key) {
                Err(err) if err.is_not_found() => missing = Some(err),
                other => return other,
            }
        }
        Err(missing.unwrap_or_else(|| Error::not_found(format!("content hash {}", hash))))
    }

    /// Open a decoded stream for a storage key, bypassing encoding.
    pub fn open_file_by_key(&self, key: &FullKey) -> Result<BlteStream> {
        let entry = *self.index.find(key)?;
        let file = self.pool.get(entry.file)?;

        let mut header_bytes = [0u8; RECORD_HEADER_SIZE];
        file.read_exact_at(u64::from(entry.offset), &mut header_bytes)?;
        let record = RecordHeader::parse(&header_bytes)?;

        if record.key != *key {
            return Err(Error::invalid_hash(*key, record.key, "archive record key"));
        }
        if record.size != entry.size {
            return Err(Error::format(format!(
                "record at {}:{} is {} bytes, index says {}",
                entry.file, entry.offset, record.size, entry.size
            )));
        }

        let mut payload = vec![0u8; record.payload_size()];
        file.read_exact_at(
            u64::from(entry.offset) + RECORD_HEADER_SIZE as u64,
            &mut payload,
        )?;

        // The storage key is the digest of the raw framed payload; check it
        // before any decoded byte is exposed.
        let actual = md5_bytes(&payload);
        if actual != *key {
            return Err(Error::invalid_hash(*key, actual, "framed payload digest"));
        }

        BlteStream::new(payload, self.handlers.clone())
    }
}

fn config_path(data_dir: &Path, hash: &FullKey) -> PathBuf {
    let hex = hash.to_string();
    data_dir
        .join("config")
        .join(&hex[..2])
        .join(&hex[2..4])
        .join(hex)
}

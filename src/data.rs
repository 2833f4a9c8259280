//! Pooled read access to the numbered data files.
//!
//! Data files are append-only from the writer's side; readers only ever
//! issue positioned reads. Handles open lazily on first use and are shared
//! through a pool keyed by ordinal, with each handle's seek+read pair held
//! atomic under its own lock.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::Result;

/// File name of a numbered data file.
pub fn data_file_name(ordinal: u16) -> String {
    format!("data.{:03}", ordinal)
}

/// One open data file.
pub struct DataFile {
    file: Mutex<File>,
}

impl DataFile {
    fn open(path: &Path) -> std::io::Result<Self> {
        Ok(DataFile {
            file: Mutex::new(File::open(path)?),
        })
    }

    /// Fill `buf` from `offset`. Atomic with respect to other readers of
    /// this handle.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

/// Lazily-populated pool of data-file handles.
pub struct DataFilePool {
    dir: PathBuf,
    files: Mutex<HashMap<u16, Arc<DataFile>>>,
}

impl DataFilePool {
    pub fn new(dir: PathBuf) -> Self {
        DataFilePool {
            dir,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// The handle for `data.NNN`, opening it on first use.
    pub fn get(&self, ordinal: u16) -> Result<Arc<DataFile>> {
        let mut files = self.files.lock();
        if let Some(file) = files.get(&ordinal) {
            return Ok(file.clone());
        }
        let file = Arc::new(DataFile::open(&self.dir.join(data_file_name(ordinal)))?);
        files.insert(ordinal, file.clone());
        Ok(file)
    }
}

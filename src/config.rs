//! Build configuration and build-info descriptors.
//!
//! Two small text formats sit at the front of the pipeline. The build
//! configuration is a `key = v1 v2 … vn` listing where the interesting
//! values (`root`, `encoding`, `install`, …) are hex hashes. The build-info
//! file is a pipe-delimited table of installed builds; its active row names
//! the build configuration to load.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::errors::{Error, Result};
use crate::hash::FullKey;

/// A parsed configuration file: ordered value lists keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    values: BTreeMap<String, Vec<String>>,
}

impl Configuration {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::parse(BufReader::new(file))
    }

    /// Parse the `key = v1 v2 … vn` format. `#` lines are comments and
    /// whitespace is insignificant.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut values = BTreeMap::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, rest) = line
                .split_once('=')
                .ok_or_else(|| Error::format(format!("config line without '=': {:?}", line)))?;

            let entries: Vec<String> = rest.split_whitespace().map(str::to_owned).collect();
            values.insert(key.trim().to_owned(), entries);
        }

        Ok(Configuration { values })
    }

    /// The ordered value list for `key`.
    pub fn get(&self, key: &str) -> Result<&[String]> {
        self.values
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::not_found(format!("config key {:?}", key)))
    }

    /// Parse the value at `position` under `key` as a hex hash.
    pub fn get_key(&self, key: &str, position: usize) -> Result<FullKey> {
        let entries = self.get(key)?;
        entries
            .get(position)
            .ok_or_else(|| Error::not_found(format!("config key {:?} value {}", key, position)))?
            .parse()
    }

    /// Serialize back into the text format. Reparsing the output yields an
    /// equal mapping.
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for (key, entries) in &self.values {
            writeln!(writer, "{} = {}", key, entries.join(" "))?;
        }
        Ok(())
    }
}

/// The `.build.info` table with its active row resolved.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    active: usize,
}

impl BuildInfo {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::parse(BufReader::new(file))
    }

    /// Parse the pipe-delimited table. Column names may carry a `!TYPE:size`
    /// suffix which is stripped. The active build is the first row whose
    /// `Active` column is a non-zero integer, falling back to the last row.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines();

        let header = lines
            .next()
            .ok_or_else(|| Error::format("empty build-info file"))??;
        let columns: Vec<String> = header
            .split('|')
            .map(|name| name.split('!').next().unwrap_or("").trim().to_owned())
            .collect();

        let mut rows = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row: Vec<String> = line.split('|').map(|cell| cell.trim().to_owned()).collect();
            if row.len() != columns.len() {
                return Err(Error::format(format!(
                    "build-info row has {} cells, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(Error::format("build-info file has no build rows"));
        }

        let active = match columns.iter().position(|c| c == "Active") {
            Some(col) => rows
                .iter()
                .position(|row| row[col].parse::<i64>().map_or(false, |v| v != 0))
                .unwrap_or(rows.len() - 1),
            None => rows.len() - 1,
        };

        Ok(BuildInfo {
            columns,
            rows,
            active,
        })
    }

    /// A field of the active row.
    pub fn field(&self, name: &str) -> Result<&str> {
        let col = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::not_found(format!("build-info column {:?}", name)))?;
        Ok(&self.rows[self.active][col])
    }

    /// Hash of the active build configuration.
    pub fn build_key(&self) -> Result<FullKey> {
        self.field("Build Key")?.parse()
    }

    /// Hash of the active CDN configuration.
    pub fn cdn_key(&self) -> Result<FullKey> {
        self.field("CDN Key")?.parse()
    }
}


#[cfg(test)]
mod test_build_info {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "\
Branch!STRING:0|Active!DEC:1|Build Key!HEX:16|CDN Key!HEX:16|Version!STRING:0
eu|0|aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa|cccccccccccccccccccccccccccccccc|1.0.0
us|1|bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb|dddddddddddddddddddddddddddddddd|1.0.1
";

    #[test]
    fn active_row_is_selected() {
        let info = BuildInfo::parse(Cursor::new(SAMPLE)).unwrap();
        assert_eq!(info.field("Branch").unwrap(), "us");
        assert_eq!(
            info.build_key().unwrap().to_string(),
            "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
        );
        assert_eq!(
            info.cdn_key().unwrap().to_string(),
            "dddddddddddddddddddddddddddddddd"
        );
    }

    #[test]
    fn type_suffixes_are_stripped() {
        let info = BuildInfo::parse(Cursor::new(SAMPLE)).unwrap();
        assert_eq!(info.field("Version").unwrap(), "1.0.1");
    }

    #[test]
    fn no_active_row_falls_back_to_last() {
        let sample = "\
Branch|Active|Build Key
eu|0|aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
us|0|bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb
";
        let info = BuildInfo::parse(Cursor::new(sample)).unwrap();
        assert_eq!(info.field("Branch").unwrap(), "us");
    }

    #[test]
    fn ragged_row_is_a_format_error() {
        let sample = "A|B\nonly-one-cell\n";
        assert!(matches!(
            BuildInfo::parse(Cursor::new(sample)),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn missing_column_is_not_found() {
        let info = BuildInfo::parse(Cursor::new(SAMPLE)).unwrap();
        assert!(info.field("IM Key").unwrap_err().is_not_found());
    }
}

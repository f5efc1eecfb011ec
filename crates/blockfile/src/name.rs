//! Block names and their place in the data directory.
//!
//! Managed names look like `e00a3f1c`: `e`, two hex digits of top bucket, two
//! hex digits of mid bucket, three hex digits of file number. The file lives at
//! `<data>/e00/da3/e00a3f1c.au`, so every name says where it belongs.

use crate::error::{ErrorKind, Result};
use aup_storage::validate_file_name;
use derive_more::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Extension of files holding sample data.
pub const DATA_EXT: &str = "au";
/// Extension of alias descriptor files.
pub const SUMMARY_EXT: &str = "auf";
/// Number of distinct file numbers inside one mid bucket.
pub const FILE_NUMBERS: u16 = 0x1000;

#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockName {
    #[display("e{top:02x}{mid:02x}{file:03x}")]
    Managed { top: u8, mid: u8, file: u16 },
    /// Names from older projects. They live directly in the data directory and
    /// never take part in directory balancing.
    #[display("{_0}")]
    Other(String),
}

impl BlockName {
    pub fn managed(top: u8, mid: u8, file: u16) -> Self {
        Self::Managed { top, mid, file: file % FILE_NUMBERS }
    }

    /// Split a file name like `e00a3f1c.au` into its block name and extension.
    pub fn from_file_name(file_name: &str) -> Result<(Self, Option<&str>)> {
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if ext == DATA_EXT || ext == SUMMARY_EXT => Ok((stem.parse()?, Some(ext))),
            _ => Ok((file_name.parse()?, None)),
        }
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, Self::Managed { .. })
    }

    /// `(top, mid)` bucket ids of a managed name.
    pub fn buckets(&self) -> Option<(u8, u8)> {
        match self {
            Self::Managed { top, mid, .. } => Some((*top, *mid)),
            Self::Other(_) => None,
        }
    }

    /// Directory the block's files live in.
    pub fn dir(&self, data_dir: &Path) -> PathBuf {
        match self {
            Self::Managed { top, mid, .. } => data_dir.join(top_dir_name(*top)).join(mid_dir_name(*mid)),
            Self::Other(_) => data_dir.to_path_buf(),
        }
    }

    pub fn file_path(&self, data_dir: &Path, ext: &str) -> PathBuf {
        self.dir(data_dir).join(format!("{self}.{ext}"))
    }

    /// Whether `path` sits in the directories this name says it should.
    pub fn placement_matches(&self, path: &Path) -> bool {
        let Self::Managed { top, mid, .. } = self else {
            return true;
        };
        let mid_dir = path.parent();
        let top_dir = mid_dir.and_then(Path::parent);
        let name_of = |p: Option<&Path>| p.and_then(Path::file_name).and_then(|n| n.to_str()).map(str::to_owned);
        name_of(mid_dir).as_deref() == Some(mid_dir_name(*mid).as_str())
            && name_of(top_dir).as_deref() == Some(top_dir_name(*top).as_str())
    }
}

impl FromStr for BlockName {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        if validate_file_name(s).is_err() {
            exn::bail!(ErrorKind::InvalidName(s.to_string()));
        }
        let hex = |range: std::ops::Range<usize>| {
            let part = &s[range];
            if part.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
                u16::from_str_radix(part, 16).ok()
            } else {
                None
            }
        };
        if s.len() == 8 && s.starts_with('e') && s.is_ascii() {
            if let (Some(top), Some(mid), Some(file)) = (hex(1..3), hex(3..5), hex(5..8)) {
                return Ok(Self::Managed { top: top as u8, mid: mid as u8, file });
            }
        }
        Ok(Self::Other(s.to_string()))
    }
}

pub fn top_dir_name(top: u8) -> String {
    format!("e{top:02x}")
}

pub fn mid_dir_name(mid: u8) -> String {
    format!("d{mid:02x}")
}

/// Parse a top-level bucket directory name (`e0a`).
pub fn parse_top_dir(name: &str) -> Option<u8> {
    parse_bucket_dir(name, 'e')
}

/// Parse a mid-level bucket directory name (`d3f`).
pub fn parse_mid_dir(name: &str) -> Option<u8> {
    parse_bucket_dir(name, 'd')
}

fn parse_bucket_dir(name: &str, prefix: char) -> Option<u8> {
    let digits = name.strip_prefix(prefix)?;
    if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

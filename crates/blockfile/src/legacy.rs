//! Reader for block entries of pre-XML project files.
//!
//! Each entry is a run of lines. Alias blocks start with a literal `Alias`
//! line followed by the external path, start frame, length and channel. Every
//! entry ends with the block's file name and its sample count:
//!
//! ```text
//! Alias
//! /music/take1.wav
//! 44100
//! 65536
//! 0
//! b00017
//! 65536
//! ```
//!
//! Nothing is ever written in this format.

use crate::au::Summary;
use crate::block::{AliasSource, BlockFile, BlockKind};
use crate::error::{ErrorKind, Result};
use crate::format::SampleFormat;
use crate::name::{BlockName, DATA_EXT, SUMMARY_EXT};
use crate::registry::LoadOptions;
use aup_storage::Filesystem;
use exn::OptionExt;
use std::path::PathBuf;
use std::str::FromStr;

const ALIAS_HEADER: &str = "Alias";

/// Consume one block entry from `lines`.
pub fn read_block<'a>(fs: &dyn Filesystem, lines: &mut impl Iterator<Item = &'a str>, options: &LoadOptions) -> Result<BlockFile> {
    let mut next = |what: &str| lines.next().map(str::trim).ok_or_raise(|| ErrorKind::Legacy(format!("missing {what}")));
    let first = next("block name")?;
    let alias = if first == ALIAS_HEADER {
        let target = next("alias path")?;
        if target.is_empty() || target.contains('\0') {
            exn::bail!(ErrorKind::Legacy(format!("bad alias path {target:?}")));
        }
        let target = PathBuf::from(target);
        let start: u64 = number(next("alias start")?, "alias start")?;
        let len: u64 = number(next("alias length")?, "alias length")?;
        if start.checked_add(len).is_none() {
            exn::bail!(ErrorKind::Legacy(format!("alias start {start} out of range")));
        }
        let channel = number(next("alias channel")?, "alias channel")?;
        Some((target, start, channel))
    } else {
        None
    };
    let raw_name = match alias {
        Some(_) => next("block name")?,
        None => first,
    };
    let (name, _) = BlockName::from_file_name(raw_name)?;
    let len = options.check_len(number(next("block length")?, "block length")?)?;

    let (kind, format) = match alias {
        Some((target, start, channel)) => {
            let summary = name.file_path(&options.data_dir, SUMMARY_EXT);
            let source = AliasSource { summary, target, start, channel };
            (BlockKind::LegacyAlias { source, summary_len: 0, no_rms: true }, SampleFormat::Float)
        },
        None => {
            let file = name.file_path(&options.data_dir, DATA_EXT);
            let format = options.format_of(fs, &file);
            (BlockKind::Simple { file }, format)
        },
    };
    Ok(BlockFile::from_parts(Some(name), kind, len, format, Summary::default()))
}

fn number<T: FromStr>(line: &str, what: &str) -> Result<T> {
    match line.parse() {
        Ok(v) => Ok(v),
        Err(_) => exn::bail!(ErrorKind::Legacy(format!("bad {what} {line:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aup_storage::LocalFs;
    use std::path::Path;

    #[test]
    fn test_simple_entry() {
        let mut lines = "b00003\n4096\nb00004\n10\n".lines();
        let options = LoadOptions::new("/p_data");
        let block = read_block(&LocalFs, &mut lines, &options).unwrap();
        assert_eq!(block.len(), 4096);
        assert_eq!(block.data_file(), Some(Path::new("/p_data/b00003.au")));
        // The next entry is left in place.
        assert_eq!(lines.next(), Some("b00004"));
    }

    #[test]
    fn test_alias_entry() {
        let mut lines = "Alias\n/music/take1.wav\n44100\n65536\n1\nb00017\n65536".lines();
        let block = read_block(&LocalFs, &mut lines, &LoadOptions::new("/p_data")).unwrap();
        assert!(block.is_alias());
        assert_eq!(block.alias_target(), Some(Path::new("/music/take1.wav")));
        assert_eq!(block.summary_file(), Some(Path::new("/p_data/b00017.auf")));
        assert!(matches!(block.kind(), BlockKind::LegacyAlias { source, .. } if source.start == 44100 && source.channel == 1));
    }

    #[test]
    fn test_truncated_entry() {
        let err = read_block(&LocalFs, &mut "Alias\n/music/take1.wav\n0".lines(), &LoadOptions::new("/p_data")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Legacy(_)));
    }

    #[test]
    fn test_too_long() {
        let options = LoadOptions::new("/p_data").with_max_samples(Some(1024));
        let err = read_block(&LocalFs, &mut "b00001\n4096".lines(), &options).unwrap_err();
        assert!(matches!(&*err, ErrorKind::TooLong { len: 4096, max: 1024 }));
    }

    #[test]
    fn test_alias_start_out_of_range() {
        let mut lines = "Alias\n/music/take1.wav\n18446744073709551615\n100\n0\nb00017\n100".lines();
        let err = read_block(&LocalFs, &mut lines, &LoadOptions::new("/p_data")).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Legacy(_)));
    }

    #[test]
    fn test_missing_data_file_uses_loading_format() {
        let options = LoadOptions::new("/p_data").with_format(Some(SampleFormat::Int24));
        let block = read_block(&LocalFs, &mut "b00003\n4096".lines(), &options).unwrap();
        assert_eq!(block.format(), SampleFormat::Int24);
    }
}

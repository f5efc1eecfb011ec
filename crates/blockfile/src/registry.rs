//! Tag name to deserializer dispatch.
//!
//! The built-in table is assembled once, on first use. Callers needing extra
//! kinds clone it with [`Registry::default`] and [`register`](Registry::register)
//! their own.

use crate::au::{self, Summary};
use crate::block::{AliasSource, BlockFile, BlockKind};
use crate::error::{ErrorKind, Result};
use crate::format::SampleFormat;
use crate::name::{BlockName, DATA_EXT, SUMMARY_EXT};
use crate::xml::Attributes;
use aup_storage::Filesystem;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const SIMPLE_TAG: &str = "simpleblockfile";
pub const SILENT_TAG: &str = "silentblockfile";
pub const PCM_ALIAS_TAG: &str = "pcmaliasblockfile";
pub const LEGACY_ALIAS_TAG: &str = "legacyaliasblockfile";

/// Context a deserializer resolves file names against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// The project's `<name>_data` directory.
    pub data_dir: PathBuf,
    /// Reject blocks claiming more samples than this.
    pub max_samples: Option<u64>,
    /// The project's sample format, used when a data file's own header can't
    /// be read.
    pub format: Option<SampleFormat>,
    /// Block length the caller expects, used ahead of the element's own
    /// attributes when a broken element is replaced with silence.
    pub expected_len: Option<u64>,
}

impl LoadOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), max_samples: None, format: None, expected_len: None }
    }

    pub fn with_max_samples(mut self, max: Option<u64>) -> Self {
        self.max_samples = max;
        self
    }

    pub fn with_format(mut self, format: Option<SampleFormat>) -> Self {
        self.format = format;
        self
    }

    pub fn with_expected_len(mut self, len: Option<u64>) -> Self {
        self.expected_len = len;
        self
    }

    /// Format of the data file at `file`: its header's, else the loading
    /// format, else the default.
    pub(crate) fn format_of(&self, fs: &dyn Filesystem, file: &Path) -> SampleFormat {
        match au::read_header(fs, file) {
            Some(header) => header.format,
            None => {
                tracing::debug!(path = %file.display(), fallback = ?self.format, "Data file header unreadable");
                self.format.unwrap_or_default()
            },
        }
    }

    pub(crate) fn check_len(&self, len: u64) -> Result<u64> {
        match self.max_samples {
            Some(max) if len > max => exn::bail!(ErrorKind::TooLong { len, max }),
            _ => Ok(len),
        }
    }
}

pub type Deserializer = fn(&dyn Filesystem, &Attributes, &LoadOptions) -> Result<BlockFile>;

static BUILTIN: LazyLock<Registry> = LazyLock::new(|| {
    let mut registry = Registry::empty();
    registry.register(SIMPLE_TAG, load_simple);
    registry.register(SILENT_TAG, load_silent);
    registry.register(PCM_ALIAS_TAG, load_pcm_alias);
    registry.register(LEGACY_ALIAS_TAG, load_legacy_alias);
    registry
});

#[derive(Debug, Clone)]
pub struct Registry {
    deserializers: HashMap<String, Deserializer>,
}

impl Registry {
    /// The table of every block kind this crate knows.
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    pub fn empty() -> Self {
        Self { deserializers: HashMap::new() }
    }

    /// Add or replace the deserializer for `tag`, returning the previous one.
    pub fn register(&mut self, tag: impl Into<String>, deserializer: Deserializer) -> Option<Deserializer> {
        self.deserializers.insert(tag.into(), deserializer)
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.deserializers.contains_key(tag)
    }

    pub fn load(&self, fs: &dyn Filesystem, tag: &str, attrs: &Attributes, options: &LoadOptions) -> Result<BlockFile> {
        match self.deserializers.get(tag) {
            Some(deserializer) => deserializer(fs, attrs, options),
            None => exn::bail!(ErrorKind::UnknownTag(tag.to_string())),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin().clone()
    }
}

/// Best-effort length from an element we could not load.
pub fn declared_len(attrs: &Attributes) -> Option<u64> {
    ["len", "aliaslen"].iter().find_map(|attr| attrs.get(attr)?.trim().parse().ok())
}

fn file_attr(attrs: &Attributes, tag: &'static str, attr: &'static str) -> Result<BlockName> {
    let raw: String = attrs.parse(tag, attr)?;
    let (name, _) = BlockName::from_file_name(&raw)?;
    Ok(name)
}

fn positive_len(attrs: &Attributes, tag: &'static str, attr: &'static str, options: &LoadOptions) -> Result<u64> {
    let len: u64 = attrs.parse(tag, attr)?;
    if len == 0 {
        exn::bail!(ErrorKind::InvalidAttribute { tag, attr, value: len.to_string() });
    }
    options.check_len(len)
}

fn summary_attrs(attrs: &Attributes, tag: &'static str) -> Result<Summary> {
    Ok(Summary {
        min: attrs.parse_opt(tag, "min")?.unwrap_or_default(),
        max: attrs.parse_opt(tag, "max")?.unwrap_or_default(),
        rms: attrs.parse_opt(tag, "rms")?.unwrap_or_default(),
    })
}

fn alias_path(attrs: &Attributes, tag: &'static str, attr: &'static str) -> Result<PathBuf> {
    let raw = attrs.get(attr).unwrap_or_default();
    if raw.is_empty() || raw.contains('\0') {
        exn::bail!(ErrorKind::InvalidAttribute { tag, attr, value: raw.to_string() });
    }
    Ok(PathBuf::from(raw))
}

fn load_simple(fs: &dyn Filesystem, attrs: &Attributes, options: &LoadOptions) -> Result<BlockFile> {
    let name = file_attr(attrs, SIMPLE_TAG, "filename")?;
    let len = positive_len(attrs, SIMPLE_TAG, "len", options)?;
    let file = name.file_path(&options.data_dir, DATA_EXT);
    // The format lives in the data file's header; a missing file is reported by
    // the reconciliation scans, not here.
    let format = options.format_of(fs, &file);
    let summary = summary_attrs(attrs, SIMPLE_TAG)?;
    Ok(BlockFile::from_parts(Some(name), BlockKind::Simple { file }, len, format, summary))
}

fn load_silent(_: &dyn Filesystem, attrs: &Attributes, options: &LoadOptions) -> Result<BlockFile> {
    let len = options.check_len(attrs.parse(SILENT_TAG, "len")?)?;
    Ok(BlockFile::silent(len))
}

fn load_alias_source(attrs: &Attributes, tag: &'static str, name_attr: &'static str, path_attr: &'static str, options: &LoadOptions) -> Result<(BlockName, AliasSource)> {
    let name = file_attr(attrs, tag, name_attr)?;
    let source = AliasSource {
        summary: name.file_path(&options.data_dir, SUMMARY_EXT),
        target: alias_path(attrs, tag, path_attr)?,
        start: attrs.parse(tag, "aliasstart")?,
        channel: attrs.parse(tag, "aliaschannel")?,
    };
    Ok((name, source))
}

/// The last aliased frame must be addressable.
fn check_alias_end(source: &AliasSource, len: u64, tag: &'static str) -> Result<()> {
    if source.start.checked_add(len).is_none() {
        exn::bail!(ErrorKind::InvalidAttribute { tag, attr: "aliasstart", value: source.start.to_string() });
    }
    Ok(())
}

fn load_pcm_alias(_: &dyn Filesystem, attrs: &Attributes, options: &LoadOptions) -> Result<BlockFile> {
    let (name, source) = load_alias_source(attrs, PCM_ALIAS_TAG, "summaryfile", "aliasfile", options)?;
    let len = positive_len(attrs, PCM_ALIAS_TAG, "aliaslen", options)?;
    check_alias_end(&source, len, PCM_ALIAS_TAG)?;
    let summary = summary_attrs(attrs, PCM_ALIAS_TAG)?;
    Ok(BlockFile::from_parts(Some(name), BlockKind::Alias(source), len, SampleFormat::Float, summary))
}

fn load_legacy_alias(_: &dyn Filesystem, attrs: &Attributes, options: &LoadOptions) -> Result<BlockFile> {
    let (name, source) = load_alias_source(attrs, LEGACY_ALIAS_TAG, "name", "aliaspath", options)?;
    let len = positive_len(attrs, LEGACY_ALIAS_TAG, "aliaslen", options)?;
    check_alias_end(&source, len, LEGACY_ALIAS_TAG)?;
    let summary_len = attrs.parse_opt(LEGACY_ALIAS_TAG, "summarylen")?.unwrap_or(0);
    let no_rms = attrs.parse_opt::<u8>(LEGACY_ALIAS_TAG, "norms")?.unwrap_or(0) != 0;
    let kind = BlockKind::LegacyAlias { source, summary_len, no_rms };
    Ok(BlockFile::from_parts(Some(name), kind, len, SampleFormat::Float, Summary::default()))
}

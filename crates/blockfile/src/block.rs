//! The unit of sample storage.

use crate::au::{self, Summary};
use crate::error::{ErrorKind, Result};
use crate::format::SampleFormat;
use crate::name::{BlockName, DATA_EXT, SUMMARY_EXT};
use crate::registry::{LEGACY_ALIAS_TAG, PCM_ALIAS_TAG, SILENT_TAG, SIMPLE_TAG};
use crate::{alias, xml::XmlWriter};
use aup_storage::Filesystem;
use exn::ResultExt;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Where a new block's files go: the allocated name plus the project data
/// directory it is relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTarget {
    pub name: BlockName,
    pub data_dir: PathBuf,
}

impl BlockTarget {
    pub fn new(name: BlockName, data_dir: impl Into<PathBuf>) -> Self {
        Self { name, data_dir: data_dir.into() }
    }

    pub fn path(&self, ext: &str) -> PathBuf {
        self.name.file_path(&self.data_dir, ext)
    }
}

/// A range of samples inside an external audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasSource {
    /// The `.auf` descriptor this block owns.
    pub summary: PathBuf,
    /// The external file; never owned, never deleted.
    pub target: PathBuf,
    pub start: u64,
    pub channel: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Simple { file: PathBuf },
    Alias(AliasSource),
    Silent,
    LegacyAlias { source: AliasSource, summary_len: u64, no_rms: bool },
}

/// An immutable block of samples.
///
/// `locked` and `silenced` are runtime flags only; neither affects content.
#[derive(Debug)]
pub struct BlockFile {
    name: Option<BlockName>,
    kind: BlockKind,
    len: u64,
    format: SampleFormat,
    summary: Summary,
    locked: AtomicBool,
    silenced: AtomicBool,
}

impl BlockFile {
    pub(crate) fn from_parts(
        name: Option<BlockName>,
        kind: BlockKind,
        len: u64,
        format: SampleFormat,
        summary: Summary,
    ) -> Self {
        Self {
            name,
            kind,
            len,
            format,
            summary,
            locked: AtomicBool::new(false),
            silenced: AtomicBool::new(false),
        }
    }

    /// Encode `samples` into a new `.au` file at `target`.
    pub fn write_simple(
        fs: &dyn Filesystem,
        target: &BlockTarget,
        samples: &[f32],
        format: SampleFormat,
    ) -> Result<Self> {
        let file = target.path(DATA_EXT);
        fs.write(&file, &au::encode(samples, format)).or_raise(|| ErrorKind::Storage)?;
        tracing::trace!(block = %target.name, len = samples.len(), %format, "Wrote block data");
        let kind = BlockKind::Simple { file };
        Ok(Self::from_parts(Some(target.name.clone()), kind, samples.len() as u64, format, Summary::of(samples)))
    }

    /// Reference `len` frames of `channel` inside `wav`, starting at `start`.
    ///
    /// The external file must be readable now; its summary is computed once and
    /// stored in the block's `.auf` descriptor.
    pub fn alias(
        fs: &dyn Filesystem,
        target: &BlockTarget,
        wav: &Path,
        start: u64,
        len: u64,
        channel: u16,
    ) -> Result<Self> {
        let samples = alias::read_region(wav, start, len as usize, channel)?;
        let summary = Summary::of(&samples);
        let summary_path = target.path(SUMMARY_EXT);
        fs.write(&summary_path, &au::encode_descriptor(&summary)).or_raise(|| ErrorKind::Storage)?;
        let source = AliasSource { summary: summary_path, target: wav.to_path_buf(), start, channel };
        Ok(Self::from_parts(Some(target.name.clone()), BlockKind::Alias(source), len, SampleFormat::Float, summary))
    }

    pub fn silent(len: u64) -> Self {
        Self::from_parts(None, BlockKind::Silent, len, SampleFormat::Float, Summary::default())
    }

    pub fn name(&self) -> Option<&BlockName> {
        self.name.as_ref()
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn is_alias(&self) -> bool {
        matches!(self.kind, BlockKind::Alias(_) | BlockKind::LegacyAlias { .. })
    }

    pub fn is_silent(&self) -> bool {
        matches!(self.kind, BlockKind::Silent)
    }

    fn alias_source(&self) -> Option<&AliasSource> {
        match &self.kind {
            BlockKind::Alias(source) | BlockKind::LegacyAlias { source, .. } => Some(source),
            _ => None,
        }
    }

    /// External file an alias block reads from.
    pub fn alias_target(&self) -> Option<&Path> {
        self.alias_source().map(|s| s.target.as_path())
    }

    /// The `.au` file of a simple block.
    pub fn data_file(&self) -> Option<&Path> {
        match &self.kind {
            BlockKind::Simple { file } => Some(file),
            _ => None,
        }
    }

    /// The `.auf` descriptor of an alias block.
    pub fn summary_file(&self) -> Option<&Path> {
        self.alias_source().map(|s| s.summary.as_path())
    }

    /// Every file on disk this block owns (and must delete with it).
    pub fn files(&self) -> Vec<&Path> {
        self.data_file().into_iter().chain(self.summary_file()).collect()
    }

    /// Bytes this block occupies in the project's data directory.
    pub fn space_usage(&self) -> u64 {
        match &self.kind {
            BlockKind::Simple { .. } => au::HEADER_LEN as u64 + self.len * self.format.bytes_per_sample() as u64,
            BlockKind::Alias(_) | BlockKind::LegacyAlias { .. } => au::descriptor_len(),
            BlockKind::Silent => 0,
        }
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// A read degraded to silence because the backing file was unavailable.
    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::SeqCst)
    }

    fn mark_silenced(&self, path: &Path) {
        if !self.silenced.swap(true, Ordering::SeqCst) {
            let block = self.name.as_ref().map(ToString::to_string).unwrap_or_default();
            tracing::warn!(%block, path = %path.display(), "Backing file unavailable, reading silence");
        }
    }

    /// Read exactly `count` samples starting at `start`.
    ///
    /// Positions past the end of the block read as zero. A missing data file or
    /// an unreadable alias target also reads as zero and sets the silenced flag;
    /// only a damaged data file or another I/O failure is an error.
    pub fn read_data(&self, fs: &dyn Filesystem, start: u64, count: usize) -> Result<Vec<f32>> {
        let available = usize::try_from(self.len.saturating_sub(start)).unwrap_or(usize::MAX);
        let wanted = count.min(available);
        let mut samples = match &self.kind {
            BlockKind::Silent => Vec::new(),
            _ if wanted == 0 => Vec::new(),
            BlockKind::Simple { file } => match fs.read(file) {
                Ok(bytes) => match au::decode(&bytes, start, wanted) {
                    Some((_, samples)) => samples,
                    None => exn::bail!(ErrorKind::Format(file.clone())),
                },
                Err(err) if err.is_not_found() => {
                    self.mark_silenced(file);
                    Vec::new()
                },
                Err(err) => return Err(err.raise(ErrorKind::Storage)),
            },
            BlockKind::Alias(source) | BlockKind::LegacyAlias { source, .. } => {
                let Some(from) = source.start.checked_add(start) else {
                    self.mark_silenced(&source.target);
                    return Ok(vec![0.0; count]);
                };
                match alias::read_region(&source.target, from, wanted, source.channel) {
                    Ok(samples) => samples,
                    Err(err) => {
                        tracing::debug!(error = %err, "Alias read failed");
                        self.mark_silenced(&source.target);
                        Vec::new()
                    },
                }
            },
        };
        samples.resize(count, 0.0);
        Ok(samples)
    }

    /// Copy this block's owned file verbatim to `target`, yielding an unlocked
    /// block with the same content under the new name.
    pub fn duplicate(&self, fs: &dyn Filesystem, target: &BlockTarget) -> Result<Self> {
        let kind = match &self.kind {
            BlockKind::Silent => return Ok(Self::silent(self.len)),
            BlockKind::Simple { file } => {
                let to = target.path(DATA_EXT);
                fs.copy(file, &to).or_raise(|| ErrorKind::Storage)?;
                BlockKind::Simple { file: to }
            },
            BlockKind::Alias(source) => BlockKind::Alias(self.duplicate_descriptor(fs, source, target)?),
            BlockKind::LegacyAlias { source, summary_len, no_rms } => BlockKind::LegacyAlias {
                source: self.duplicate_descriptor(fs, source, target)?,
                summary_len: *summary_len,
                no_rms: *no_rms,
            },
        };
        Ok(Self::from_parts(Some(target.name.clone()), kind, self.len, self.format, self.summary))
    }

    fn duplicate_descriptor(&self, fs: &dyn Filesystem, source: &AliasSource, target: &BlockTarget) -> Result<AliasSource> {
        let summary = target.path(SUMMARY_EXT);
        fs.copy(&source.summary, &summary).or_raise(|| ErrorKind::Storage)?;
        Ok(AliasSource { summary, ..source.clone() })
    }

    /// The same block with owned file paths moved from `old_dir` to `new_dir`.
    /// Alias targets are external and keep their paths.
    pub fn rebased(&self, old_dir: &Path, new_dir: &Path) -> Self {
        let rebase = |path: &Path| match path.strip_prefix(old_dir) {
            Ok(relative) => new_dir.join(relative),
            Err(_) => path.to_path_buf(),
        };
        let kind = match &self.kind {
            BlockKind::Simple { file } => BlockKind::Simple { file: rebase(file) },
            BlockKind::Alias(source) => BlockKind::Alias(AliasSource { summary: rebase(&source.summary), ..source.clone() }),
            BlockKind::LegacyAlias { source, summary_len, no_rms } => BlockKind::LegacyAlias {
                source: AliasSource { summary: rebase(&source.summary), ..source.clone() },
                summary_len: *summary_len,
                no_rms: *no_rms,
            },
            BlockKind::Silent => BlockKind::Silent,
        };
        let block = Self::from_parts(self.name.clone(), kind, self.len, self.format, self.summary);
        block.locked.store(self.is_locked(), Ordering::SeqCst);
        block.silenced.store(self.is_silenced(), Ordering::SeqCst);
        block
    }

    /// Tag this block is serialized under.
    pub fn tag(&self) -> &'static str {
        match self.kind {
            BlockKind::Simple { .. } => SIMPLE_TAG,
            BlockKind::Alias(_) => PCM_ALIAS_TAG,
            BlockKind::Silent => SILENT_TAG,
            BlockKind::LegacyAlias { .. } => LEGACY_ALIAS_TAG,
        }
    }

    /// Write the element that reconstructs this block when loaded back.
    pub fn save<W: Write>(&self, depth: usize, writer: &mut XmlWriter<W>) -> Result<()> {
        let file_name = |path: &Path| path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let Summary { min, max, rms } = self.summary;
        let attrs: Vec<(&str, String)> = match &self.kind {
            BlockKind::Simple { file } => vec![
                ("filename", file_name(file)),
                ("len", self.len.to_string()),
                ("min", min.to_string()),
                ("max", max.to_string()),
                ("rms", rms.to_string()),
            ],
            BlockKind::Silent => vec![("len", self.len.to_string())],
            BlockKind::Alias(source) => vec![
                ("summaryfile", file_name(&source.summary)),
                ("aliasfile", source.target.display().to_string()),
                ("aliasstart", source.start.to_string()),
                ("aliaslen", self.len.to_string()),
                ("aliaschannel", source.channel.to_string()),
                ("min", min.to_string()),
                ("max", max.to_string()),
                ("rms", rms.to_string()),
            ],
            BlockKind::LegacyAlias { source, summary_len, no_rms } => vec![
                ("name", file_name(&source.summary)),
                ("aliaspath", source.target.display().to_string()),
                ("aliasstart", source.start.to_string()),
                ("aliaslen", self.len.to_string()),
                ("aliaschannel", source.channel.to_string()),
                ("summarylen", summary_len.to_string()),
                ("norms", u8::from(*no_rms).to_string()),
            ],
        };
        writer.empty_element(depth, self.tag(), attrs)
    }
}

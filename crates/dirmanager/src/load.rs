//! Rebuilding the catalog from a saved project.
//!
//! Every block that comes back from a project file is locked: the file on disk
//! still names it, so it must be copied rather than shared once edited.
//! Elements that fail to load are replaced by silence, and the failure is
//! reported as a [`LoadWarning`]. The silence is as long as the caller's
//! expected block length, or failing that the length the element declared.

use crate::catalog::BlockId;
use crate::error::{ErrorKind, Result};
use crate::repository::{BlockRef, Repository};
use aup_blockfile::legacy;
use aup_blockfile::{Attributes, BlockFile, LoadOptions, Registry, SampleFormat, XmlTagHandler, XmlWriter, declared_len};
use exn::ResultExt;
use std::fmt::Write;

/// An element that could not be loaded and was replaced by silence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    pub tag: String,
    pub reason: String,
    pub substituted_len: u64,
}

impl Repository {
    /// Options resolving file names against the current data directory.
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions::new(self.data_dir()).with_max_samples(self.context().settings().max_samples)
    }

    /// Load one project-file element.
    ///
    /// A block whose name is already in the catalog is not loaded twice; the
    /// existing record gains a reference instead.
    pub fn load_block_file(
        &self,
        registry: &Registry,
        tag: &str,
        attrs: &Attributes,
        options: &LoadOptions,
    ) -> (BlockRef, Option<LoadWarning>) {
        match registry.load(self.fs(), tag, attrs, options) {
            Ok(block) => (self.adopt_loaded(block), None),
            Err(err) => {
                let declared = options.expected_len.or_else(|| declared_len(attrs)).unwrap_or(0);
                let len = options.max_samples.map_or(declared, |max| declared.min(max));
                tracing::warn!(tag, error = %err, len, "Replacing unloadable block with silence");
                let warning = LoadWarning { tag: tag.to_string(), reason: (*err).to_string(), substituted_len: len };
                (self.adopt_loaded(BlockFile::silent(len)), Some(warning))
            },
        }
    }

    /// Load one block entry from a pre-XML project file.
    pub fn load_legacy_block<'a>(
        &self,
        lines: &mut impl Iterator<Item = &'a str>,
        options: &LoadOptions,
    ) -> Result<BlockRef> {
        let block = legacy::read_block(self.fs(), lines, options).or_raise(|| ErrorKind::Block)?;
        Ok(self.adopt_loaded(block))
    }

    /// Write the element that reloads `id`.
    pub fn save_block_file<W: Write>(&self, id: BlockId, depth: usize, writer: &mut XmlWriter<W>) -> Result<()> {
        self.get(id)?.save(depth, writer).or_raise(|| ErrorKind::Block)
    }

    fn adopt_loaded(&self, block: BlockFile) -> BlockRef {
        block.lock();
        let mut state = self.write();
        if let Some(name) = block.name() {
            if let Some(id) = state.catalog.id_of(name) {
                state.catalog.add_ref(id);
                tracing::debug!(block = %name, %id, "Block already loaded, sharing it");
                return BlockRef::new(id);
            }
            state.allocator.register(name);
        }
        BlockRef::new(state.adopt(block))
    }
}

/// Feeds project-file elements into a repository.
pub struct BlockLoader<'r> {
    repo: &'r Repository,
    registry: &'r Registry,
    options: LoadOptions,
    blocks: Vec<BlockRef>,
    warnings: Vec<LoadWarning>,
}

impl<'r> BlockLoader<'r> {
    pub fn new(repo: &'r Repository, registry: &'r Registry) -> Self {
        Self { repo, registry, options: repo.load_options(), blocks: Vec::new(), warnings: Vec::new() }
    }

    /// Data files whose header can't be read are taken to be in `format`.
    pub fn with_format(mut self, format: SampleFormat) -> Self {
        self.options = self.options.with_format(Some(format));
        self
    }

    /// Length given to silence replacing an element that fails to load from
    /// now on. `None` falls back to the element's own attributes.
    pub fn set_expected_len(&mut self, len: Option<u64>) {
        self.options.expected_len = len;
    }

    /// Loaded blocks in element order, and every element replaced by silence.
    pub fn finish(self) -> (Vec<BlockRef>, Vec<LoadWarning>) {
        (self.blocks, self.warnings)
    }
}

impl XmlTagHandler for BlockLoader<'_> {
    fn handle_xml_tag(&mut self, tag: &str, attrs: &Attributes) -> bool {
        if !self.registry.is_registered(tag) {
            return false;
        }
        let (block, warning) = self.repo.load_block_file(self.registry, tag, attrs, &self.options);
        self.blocks.push(block);
        self.warnings.extend(warning);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block_files, repository, samples};
    use aup_blockfile::SIMPLE_TAG;
    use aup_config::Balance;
    use rstest::rstest;

    /// Parse `<tag a="b" .../>` lines as written by [`XmlWriter`].
    fn parse_element(line: &str) -> (String, Attributes) {
        let body = line.trim().trim_start_matches('<').trim_end_matches("/>").trim();
        let (tag, rest) = body.split_once(' ').unwrap_or((body, ""));
        let attrs = rest
            .split("\" ")
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (name, value) = pair.split_once("=\"").unwrap();
                (name.to_string(), value.trim_end_matches('"').to_string())
            })
            .collect();
        (tag.to_string(), attrs)
    }

    #[rstest]
    #[case(SampleFormat::Int16)]
    #[case(SampleFormat::Int24)]
    #[case(SampleFormat::Float)]
    fn test_save_then_load(#[case] format: SampleFormat) {
        let (_temp_dir, repo) = repository(Balance::default());
        let block = repo.new_simple_block(&samples(32), format).unwrap();
        let original = repo.get(block.id()).unwrap();
        let mut writer = XmlWriter::new(String::new());
        repo.save_block_file(block.id(), 2, &mut writer).unwrap();
        let xml = writer.into_inner();
        assert!(xml.starts_with("\t\t<simpleblockfile "));

        // Drop the record so the load creates a fresh one. Locking keeps the
        // file on disk.
        repo.lock(block.id()).unwrap();
        repo.release(block).unwrap();
        assert_eq!(repo.collect_garbage(), 1);

        let (tag, attrs) = parse_element(&xml);
        let (loaded, warning) = repo.load_block_file(Registry::builtin(), &tag, &attrs, &repo.load_options());
        assert!(warning.is_none());
        let reloaded = repo.get(loaded.id()).unwrap();
        assert_eq!(reloaded.len(), original.len());
        assert_eq!(reloaded.format(), format);
        assert_eq!(reloaded.name(), original.name());
        assert!(reloaded.is_locked());
        assert_eq!(repo.read_data(loaded.id(), 0, 32).unwrap(), original.read_data(repo.fs(), 0, 32).unwrap());
    }

    #[test]
    fn test_duplicate_names_share_a_record() {
        let (_temp_dir, repo) = repository(Balance::default());
        let block = repo.new_simple_block(&samples(8), SampleFormat::Float).unwrap();
        let name = repo.get(block.id()).unwrap().name().unwrap().to_string();
        let attrs = Attributes::new().with("filename", format!("{name}.au")).with("len", 8);

        let options = repo.load_options();
        let (first, _) = repo.load_block_file(Registry::builtin(), SIMPLE_TAG, &attrs, &options);
        let (second, _) = repo.load_block_file(Registry::builtin(), SIMPLE_TAG, &attrs, &options);
        assert_eq!(first.id(), block.id());
        assert_eq!(second.id(), block.id());
        assert_eq!(repo.num_block_files(), 1);
        assert_eq!(block_files(repo.temp_dir()), 1);
    }

    #[rstest]
    #[case("simpleblockfile", &[("filename", "../escape.au"), ("len", "512")], 512)]
    #[case("pcmaliasblockfile", &[("summaryfile", "e0000001.auf"), ("aliasfile", ""), ("aliaslen", "300")], 300)]
    #[case("mysteryblockfile", &[("len", "77")], 77)]
    fn test_failures_become_silence(#[case] tag: &str, #[case] pairs: &[(&str, &str)], #[case] expected: u64) {
        let (_temp_dir, repo) = repository(Balance::default());
        let attrs: Attributes = pairs.iter().copied().collect();
        let (block, warning) = repo.load_block_file(Registry::builtin(), tag, &attrs, &repo.load_options());
        let warning = warning.unwrap();
        assert_eq!(warning.tag, tag);
        assert_eq!(warning.substituted_len, expected);
        let block = repo.get(block.id()).unwrap();
        assert!(block.is_silent());
        assert_eq!(block.len(), expected);
    }

    #[rstest]
    #[case(&[("len", "lots")], 4096)]
    #[case(&[("len", "512"), ("filename", "../escape.au")], 4096)]
    fn test_silence_uses_expected_len(#[case] pairs: &[(&str, &str)], #[case] expected: u64) {
        let (_temp_dir, repo) = repository(Balance::default());
        let attrs: Attributes = pairs.iter().copied().collect();
        let options = repo.load_options().with_expected_len(Some(4096));
        let (block, warning) = repo.load_block_file(Registry::builtin(), SIMPLE_TAG, &attrs, &options);
        assert_eq!(warning.unwrap().substituted_len, expected);
        assert_eq!(repo.get(block.id()).unwrap().len(), expected);
    }

    #[test]
    fn test_too_long_is_clamped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = aup_config::Settings { max_samples: Some(1000), ..crate::testing::settings(temp_dir.path()) };
        let repo = Repository::new(crate::Context::new(settings)).unwrap();
        let attrs = Attributes::new().with("len", 5000);
        let (block, warning) = repo.load_block_file(Registry::builtin(), "silentblockfile", &attrs, &repo.load_options());
        assert_eq!(warning.unwrap().substituted_len, 1000);
        assert_eq!(repo.get(block.id()).unwrap().len(), 1000);
    }

    #[test]
    fn test_block_loader() {
        let (_temp_dir, repo) = repository(Balance::default());
        let registry = Registry::builtin();
        let mut loader = BlockLoader::new(&repo, registry);
        assert!(loader.handle_xml_tag("silentblockfile", &Attributes::new().with("len", 10)));
        assert!(loader.handle_xml_tag("simpleblockfile", &Attributes::new().with("len", 4)));
        assert!(!loader.handle_xml_tag("wavetrack", &Attributes::new()));
        let (blocks, warnings) = loader.finish();
        assert_eq!(blocks.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].substituted_len, 4);
        assert!(blocks.iter().all(|b| repo.get(b.id()).unwrap().is_locked()));
    }

    #[test]
    fn test_block_loader_format_and_expected_len() {
        let (_temp_dir, repo) = repository(Balance::default());
        let mut loader = BlockLoader::new(&repo, Registry::builtin()).with_format(SampleFormat::Int16);
        loader.set_expected_len(Some(256));
        // Data file not on disk: the loading format applies.
        assert!(loader.handle_xml_tag("simpleblockfile", &Attributes::new().with("filename", "e0000001.au").with("len", 100)));
        assert!(loader.handle_xml_tag("silentblockfile", &Attributes::new().with("len", "lots")));
        let (blocks, warnings) = loader.finish();
        assert_eq!(repo.get(blocks[0].id()).unwrap().format(), SampleFormat::Int16);
        assert_eq!(repo.get(blocks[0].id()).unwrap().len(), 100);
        assert_eq!(warnings.len(), 1);
        assert_eq!(repo.get(blocks[1].id()).unwrap().len(), 256);
    }

    #[test]
    fn test_legacy_blocks() {
        let (_temp_dir, repo) = repository(Balance::default());
        let text = "Alias\n/music/take1.wav\n44100\n128\n1\nb00017\n128\nb00018\n64\n";
        let mut lines = text.lines();
        let options = repo.load_options();
        let alias = repo.load_legacy_block(&mut lines, &options).unwrap();
        let simple = repo.load_legacy_block(&mut lines, &options).unwrap();
        assert!(repo.get(alias.id()).unwrap().is_alias());
        assert_eq!(repo.get(simple.id()).unwrap().len(), 64);
        assert_eq!(repo.aliased_files(), vec![std::path::PathBuf::from("/music/take1.wav")]);
        let missing = repo.find_missing_alias_files(&aup_storage::Cancellation::default()).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, alias.id());
        assert!(repo.load_legacy_block(&mut lines, &options).is_err());
        // Unmanaged names never touch the balance.
        assert!(repo.read().allocator.is_empty());
    }
}

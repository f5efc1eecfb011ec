//! Local filesystem implementation.

use crate::error::{ErrorKind, Result};
use crate::fs::{DirEntry, Filesystem};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Local filesystem backed by [`std::fs`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl LocalFs {
    fn map(path: &Path) -> impl FnOnce(io::Error) -> ErrorKind + '_ {
        move |e| ErrorKind::from_io(e, path)
    }
}

impl Filesystem for LocalFs {
    fn name(&self) -> &str {
        "local"
    }

    fn exists(&self, path: &Path) -> bool {
        match path.try_exists() {
            Ok(exists) => exists,
            // A file where a parent directory should be.
            Err(e) if e.kind() == io::ErrorKind::NotADirectory => false,
            // Existence can't be determined; assume something is there.
            Err(_) => true,
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_read_only(&self, path: &Path) -> Result<bool> {
        let metadata = fs::metadata(path).map_err(Self::map(path))?;
        Ok(metadata.permissions().readonly())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        Ok(fs::create_dir_all(path).map_err(Self::map(path))?)
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_dir(path).map_err(Self::map(path))?)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_dir_all(path).map_err(Self::map(path))?)
    }

    fn read_dir(&self, dir: &Path) -> Result<Vec<DirEntry>> {
        let walker = WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false).sort_by_file_name();
        let mut entries = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                let io = e.into_io_error().unwrap_or_else(|| io::Error::other("filesystem loop"));
                ErrorKind::from_io(io, &path)
            })?;
            let is_dir = entry.file_type().is_dir();
            entries.push(DirEntry { path: entry.into_path(), is_dir });
        }
        Ok(entries)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        Ok(fs::remove_file(path).map_err(Self::map(path))?)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path).map_err(Self::map(path))?)
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        Ok(fs::write(path, data).map_err(Self::map(path))?)
    }

    fn hard_link(&self, from: &Path, to: &Path) -> Result<()> {
        Ok(fs::hard_link(from, to).map_err(Self::map(to))?)
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        let mut source = fs::File::open(from).map_err(Self::map(from))?;
        // `create_new` so a copy never overwrites a file some other block owns.
        let mut target = OpenOptions::new().write(true).create_new(true).open(to).map_err(Self::map(to))?;
        let copied = io::copy(&mut source, &mut target).map_err(Self::map(to))?;
        target.sync_all().map_err(Self::map(to))?;
        Ok(copied)
    }

    fn available_space(&self, path: &Path) -> Result<u64> {
        // Walk up to the nearest existing ancestor: a project's data dir may
        // not have been created yet.
        let mut existing = path;
        while !existing.exists() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            }
        }
        Ok(fs2::available_space(existing).map_err(Self::map(existing))?)
    }
}

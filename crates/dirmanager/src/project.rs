//! Moving a repository to a (new) project location.
//!
//! [`ProjectSetter::new`] only validates; nothing on disk changes until
//! [`commit`](ProjectSetter::commit). Dropping an uncommitted setter is a
//! no-op.

use crate::error::{ErrorKind, Result};
use crate::relocate::{Relocation, RelocationItem, Relocator};
use crate::repository::{Project, Repository};
use aup_storage::scan::{DATA_DIR_SUFFIX, EnumerateSpec, enumerate, remove_empty_dirs};
use aup_storage::{Cancellation, NoProgress, Progress, is_within, validate_file_name};
use exn::ResultExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ProjectSetter<'r> {
    repo: &'r Repository,
    project: Project,
    create: bool,
}

impl<'r> ProjectSetter<'r> {
    /// Check that `path/<name>_data` can become the repository's data
    /// directory. With `create`, it may be created on commit.
    pub fn new(repo: &'r Repository, path: impl AsRef<Path>, name: &str, create: bool) -> Result<Self> {
        let fs = repo.fs();
        let path = match path.as_ref() {
            p if p.as_os_str().is_empty() => std::env::current_dir().or_raise(|| ErrorKind::Storage)?,
            p => p.to_path_buf(),
        };
        let invalid = |reason| ErrorKind::InvalidProject { path: path.clone(), reason };
        if !path.is_absolute() {
            exn::bail!(invalid("path is not absolute"));
        }
        if validate_file_name(name).is_err() {
            exn::bail!(invalid("project name is not a valid file name"));
        }
        let data_dir = path.join(format!("{name}{DATA_DIR_SUFFIX}"));
        if fs.exists(&data_dir) && !fs.is_dir(&data_dir) {
            exn::bail!(invalid("data directory is a file"));
        }
        if create {
            if !fs.is_dir(&path) {
                exn::bail!(invalid("directory does not exist"));
            }
            if fs.is_read_only(&path).unwrap_or(true) {
                exn::bail!(invalid("directory is not writable"));
            }
        } else if !fs.is_dir(&data_dir) {
            exn::bail!(invalid("data directory does not exist"));
        }
        let project = Project { path, name: name.to_string(), data_dir };
        Ok(Self { repo, project, create })
    }

    pub fn data_dir(&self) -> &Path {
        &self.project.data_dir
    }

    /// Relocate every block file into the new data directory and switch to
    /// it.
    ///
    /// On failure or cancellation everything created is removed again and
    /// the repository is unchanged. On success, leaving the temp dir deletes
    /// the moved originals of unlocked blocks; a previous project directory is
    /// left as it was.
    pub fn commit(self, progress: &mut dyn Progress, cancel: &Cancellation) -> Result<Relocation> {
        let repo = self.repo;
        let fs = repo.fs();
        let settings = repo.context().settings();
        let mut state = repo.write();
        let old_dir = state.data_dir(repo.temp_dir()).to_path_buf();
        let new_dir = self.project.data_dir.clone();
        if old_dir == new_dir {
            tracing::debug!(path = %new_dir.display(), "Project directory unchanged");
            state.project = Some(self.project);
            return Ok(Relocation::default());
        }

        let created = !fs.is_dir(&new_dir);
        if created {
            if !self.create {
                exn::bail!(ErrorKind::InvalidProject { path: self.project.path.clone(), reason: "data directory does not exist" });
            }
            fs.create_dir_all(&new_dir).or_raise(|| ErrorKind::Storage)?;
        }

        let mut items = Vec::new();
        let mut unlocked = HashSet::new();
        for (_, block) in state.catalog.iter() {
            for file in block.files() {
                let Ok(relative) = file.strip_prefix(&old_dir) else {
                    continue;
                };
                if !fs.exists(file) {
                    tracing::warn!(path = %file.display(), "Block file missing, not relocating it");
                    continue;
                }
                if !block.is_locked() {
                    unlocked.insert(file.to_path_buf());
                }
                items.push(RelocationItem::new(file, new_dir.join(relative)));
            }
        }

        let relocator = Relocator::new(fs, settings.prefer_hard_links, settings.verify_copies);
        let outcome = match relocator.relocate(&items, progress, cancel) {
            Ok(outcome) => outcome,
            Err(err) => {
                if created {
                    if let Err(e) = fs.remove_dir(&new_dir) {
                        tracing::warn!(path = %new_dir.display(), error = %e, "Could not remove created data directory");
                    }
                }
                return Err(err);
            },
        };

        state.catalog.replace_all(|block| block.rebased(&old_dir, &new_dir));
        let leaving_temp = state.project.is_none();
        tracing::info!(
            from = %old_dir.display(),
            to = %new_dir.display(),
            linked = outcome.linked,
            copied = outcome.copied,
            "Switched project directory"
        );
        state.project = Some(self.project);

        if leaving_temp && is_within(repo.temp_dir(), &old_dir) {
            for item in items.iter().filter(|item| unlocked.contains(&item.from)) {
                if let Err(err) = fs.remove_file(&item.from) {
                    tracing::warn!(path = %item.from.display(), error = %err, "Could not remove moved temp file");
                }
            }
            remove_empty_dirs(fs, &old_dir, 0, &mut NoProgress);
        }

        let scanned = match enumerate(fs, &new_dir, &EnumerateSpec::files(""), &mut NoProgress, &Cancellation::default()) {
            Ok(found) => found.paths,
            Err(err) => {
                tracing::warn!(path = %new_dir.display(), error = %err, "Could not rescan data directory");
                Vec::new()
            },
        };
        let state = &mut *state;
        state.allocator.rebuild(scanned.iter().map(PathBuf::as_path));
        for (_, block) in state.catalog.iter() {
            if let Some(name) = block.name() {
                state.allocator.register(name);
            }
        }
        Ok(outcome)
    }
}

impl Repository {
    /// Validate and commit in one go.
    pub fn set_project(&self, path: impl AsRef<Path>, name: &str, create: bool) -> Result<Relocation> {
        ProjectSetter::new(self, path, name, create)?.commit(&mut NoProgress, &Cancellation::default())
    }
}

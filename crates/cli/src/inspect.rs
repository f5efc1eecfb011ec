//! Read-only summary of a project data directory.

use crate::error::{ErrorKind, Result};
use aup_blockfile::BlockName;
use aup_blockfile::name::{DATA_EXT, SUMMARY_EXT};
use aup_storage::scan::{EnumerateSpec, count_subdirs, enumerate};
use aup_storage::{Cancellation, Filesystem, LocalFs, NoProgress};
use exn::ResultExt;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Inspection {
    pub data_files: usize,
    pub summary_files: usize,
    pub subdirs: usize,
    /// Block files outside the directories their names call for.
    pub misplaced: Vec<PathBuf>,
    pub unreadable: usize,
    pub free_space: Option<u64>,
}

pub fn inspect(dir: &Path) -> Result<Inspection> {
    if !dir.is_dir() {
        exn::bail!(ErrorKind::NotADirectory(dir.to_path_buf()));
    }
    let found = enumerate(&LocalFs, dir, &EnumerateSpec::files(""), &mut NoProgress, &Cancellation::default())
        .or_raise(|| ErrorKind::Scan(dir.to_path_buf()))?;

    let mut report = Inspection { subdirs: count_subdirs(&LocalFs, dir), unreadable: found.skipped, ..Inspection::default() };
    for path in found.paths {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok((name, Some(ext))) = BlockName::from_file_name(file_name) else {
            continue;
        };
        match ext {
            DATA_EXT => report.data_files += 1,
            SUMMARY_EXT => report.summary_files += 1,
            _ => continue,
        }
        if !name.placement_matches(&path) {
            report.misplaced.push(path);
        }
    }
    report.free_space = match LocalFs.available_space(dir) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            tracing::warn!(path = %dir.display(), error = %err, "Could not query free space");
            None
        },
    };
    Ok(report)
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "data files:    {}", self.data_files)?;
        writeln!(f, "summary files: {}", self.summary_files)?;
        writeln!(f, "directories:   {}", self.subdirs)?;
        if self.unreadable > 0 {
            writeln!(f, "unreadable:    {}", self.unreadable)?;
        }
        if let Some(bytes) = self.free_space {
            writeln!(f, "free space:    {bytes} bytes")?;
        }
        writeln!(f, "misplaced:     {}", self.misplaced.len())?;
        for path in &self.misplaced {
            writeln!(f, "  {}", path.display())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_inspect_counts_and_misplaced() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        touch(&dir.join("e00/d00/e0000001.au"));
        touch(&dir.join("e00/d00/e0000002.auf"));
        touch(&dir.join("e00/d01/e0002003.au"));
        touch(&dir.join("e00/d01/notes.txt"));

        let report = inspect(dir).unwrap();
        assert_eq!(report.data_files, 2);
        assert_eq!(report.summary_files, 1);
        assert_eq!(report.subdirs, 3);
        assert_eq!(report.misplaced, vec![dir.join("e00/d01/e0002003.au")]);
        assert!(report.free_space.is_some());
        assert!(report.to_string().contains("misplaced:     1"));
    }

    #[test]
    fn test_inspect_requires_a_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("plain.au");
        touch(&file);
        assert!(matches!(&*inspect(&file).unwrap_err(), ErrorKind::NotADirectory(_)));
    }
}

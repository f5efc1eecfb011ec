//! Block repository for audio projects.
//!
//! A [`Repository`] owns every block file of one project: it names new blocks
//! so no directory grows without bound, counts references so shared content is
//! written once, and moves the whole set between the temp dir and project
//! directories without ever leaving a half-copied tree behind.

pub mod balance;
mod catalog;
mod context;
pub mod error;
mod load;
mod project;
mod reconcile;
mod relocate;
mod repository;

pub use crate::balance::NameAllocator;
pub use crate::catalog::BlockId;
pub use crate::context::{Context, TEMP_PROJECT_PATTERN};
pub use crate::load::{BlockLoader, LoadWarning};
pub use crate::project::ProjectSetter;
pub use crate::reconcile::MissingFile;
pub use crate::relocate::{Relocation, RelocationItem, Relocator};
pub use crate::repository::{BlockRef, Repository};

#[cfg(test)]
pub(crate) mod testing {
    use crate::{Context, Repository};
    use aup_config::{Balance, Settings};
    use std::path::Path;
    use tempfile::TempDir;

    pub fn settings(temp_dir: &Path) -> Settings {
        Settings { temp_dir: temp_dir.to_path_buf(), name_seed: Some(42), ..Settings::default() }
    }

    pub fn repository(balance: Balance) -> (TempDir, Repository) {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = Settings { balance, ..settings(temp_dir.path()) };
        let repo = Repository::new(Context::new(settings)).unwrap();
        (temp_dir, repo)
    }

    pub fn samples(count: usize) -> Vec<f32> {
        (0..count).map(|i| (i as f32 / count as f32) - 0.5).collect()
    }

    /// `.au` and `.auf` files anywhere below `dir`.
    pub fn block_files(dir: &Path) -> usize {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "au" || ext == "auf"))
            .count()
    }

    /// Mono 16-bit WAV of `frames` ascending samples.
    pub fn write_wav(path: &Path, frames: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(i as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
}

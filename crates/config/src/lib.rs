//! Process-wide settings.
//!
//! Sources are merged in order, later ones winning:
//!
//! 1. built-in defaults,
//! 2. `aup.toml` then `aup.yaml` in the user's config directory,
//! 3. an explicitly requested file (`.toml`, `.yaml` or `.yml`),
//! 4. `AUP_*` environment variables, with `__` separating nested keys
//!    (`AUP_BALANCE__MID_CAPACITY=1024`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest number of mid buckets a top bucket may hold (two hex digits).
pub const MAX_TOP_CAPACITY: u16 = 256;
/// Largest number of files a mid bucket may hold (three hex digits).
pub const MAX_MID_CAPACITY: u16 = 4096;

const ENV_PREFIX: &str = "AUP_";

/// Directory-balancing limits.
///
/// Existing project trees were written with the defaults. Lowering them only
/// changes where *new* blocks go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Balance {
    /// Mid-level directories per top-level directory.
    pub top_capacity: u16,
    /// Block files per mid-level directory.
    pub mid_capacity: u16,
}

impl Default for Balance {
    fn default() -> Self {
        Self { top_capacity: 256, mid_capacity: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Parent of every unsaved project's `project<N>` directory.
    pub temp_dir: PathBuf,
    /// Leave temp files behind on exit (crash recovery).
    pub keep_temp_files: bool,
    pub balance: Balance,
    /// Refuse to load blocks longer than this many samples.
    pub max_samples: Option<u64>,
    /// Try hard links before copying when relocating a project.
    pub prefer_hard_links: bool,
    /// CRC-check every copied block file after relocation.
    pub verify_copies: bool,
    /// Seed for block file numbers. Only useful for reproducible tests.
    pub name_seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            keep_temp_files: false,
            balance: Balance::default(),
            max_samples: None,
            prefer_hard_links: true,
            verify_copies: false,
            name_seed: None,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "aup", "aup")
}

/// Where unsaved projects live unless configured otherwise.
pub fn default_temp_dir() -> PathBuf {
    match project_dirs() {
        Some(dirs) => dirs.data_local_dir().join("SessionData"),
        None => std::env::temp_dir().join("aup-temp"),
    }
}

/// Directory searched for `aup.toml` / `aup.yaml`.
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

impl Settings {
    /// Load from every source, see the module docs for precedence.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_from(config_dir().as_deref(), explicit)
    }

    /// Like [`load`](Self::load) with the config directory given explicitly
    /// (`None` skips it).
    pub fn load_from(config_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(dir) = config_dir {
            figment = figment.merge(Toml::file(dir.join("aup.toml"))).merge(Yaml::file(dir.join("aup.yaml")));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let settings: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        settings.validate()?;
        tracing::debug!(temp_dir = %settings.temp_dir.display(), "Loaded settings");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field, reason: String| ErrorKind::Invalid { field, reason };
        if !self.temp_dir.is_absolute() {
            exn::bail!(invalid("temp_dir", format!("{} is not absolute", self.temp_dir.display())));
        }
        if !(1..=MAX_TOP_CAPACITY).contains(&self.balance.top_capacity) {
            exn::bail!(invalid("balance.top_capacity", format!("must be 1..={MAX_TOP_CAPACITY}")));
        }
        if !(1..=MAX_MID_CAPACITY).contains(&self.balance.mid_capacity) {
            exn::bail!(invalid("balance.mid_capacity", format!("must be 1..={MAX_MID_CAPACITY}")));
        }
        if self.max_samples == Some(0) {
            exn::bail!(invalid("max_samples", "must be positive".to_string()));
        }
        Ok(())
    }
}

mod error;
mod inspect;

use crate::error::{ErrorKind, Result};
use aup_config::Settings;
use aup_dirmanager::Context;
use aup_storage::scan::{DATA_DIR_SUFFIX, remove_empty_dirs};
use aup_storage::{Filesystem, LocalFs, NoProgress, is_within};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aup")]
#[command(about = "Maintenance for block-file project directories")]
struct Cli {
    /// Settings file (TOML or YAML), merged over the user config.
    #[arg(long, global = true, env = "AUP_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete leftover `project*` directories from the temp dir
    CleanTemp,
    /// Summarise a project's data directory
    Inspect {
        /// Directory holding the project file
        dir: PathBuf,
        /// Project name; its blocks live in `<dir>/<name>_data`
        name: String,
    },
    /// Remove empty directories below `dir`, which must be a project data
    /// directory or sit inside the temp dir
    Prune { dir: PathBuf },
    /// Bytes available on the volume holding `path` (the temp dir by default)
    FreeSpace { path: Option<PathBuf> },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    tracing::debug!(temp_dir = %settings.temp_dir.display(), "Loaded settings");

    match cli.command {
        Commands::CleanTemp => {
            let ctx = Context::new(settings);
            let report = ctx.clean_temp_dir().or_raise(|| ErrorKind::CleanTemp)?;
            println!("removed {} entries, {} failed", report.removed, report.failed);
        },
        Commands::Inspect { dir, name } => {
            let data_dir = dir.join(format!("{name}{}", aup_storage::scan::DATA_DIR_SUFFIX));
            print!("{}", inspect::inspect(&data_dir)?);
        },
        Commands::Prune { dir } => {
            require_prunable(&dir, &settings.temp_dir)?;
            let visited = remove_empty_dirs(&LocalFs, &dir, 0, &mut NoProgress);
            println!("visited {visited} directories");
        },
        Commands::FreeSpace { path } => {
            let path = path.unwrap_or(settings.temp_dir);
            let existing = path.ancestors().find(|p| p.is_dir()).unwrap_or(&path);
            let bytes = LocalFs.available_space(existing).or_raise(|| ErrorKind::Scan(existing.to_path_buf()))?;
            println!("{bytes}");
        },
    }
    Ok(())
}

fn require_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        exn::bail!(ErrorKind::NotADirectory(dir.to_path_buf()));
    }
    Ok(())
}

/// Pruning is limited to the trees this tool manages: anything inside the
/// temp dir, or inside a `*_data` directory.
fn require_prunable(dir: &Path, temp_dir: &Path) -> Result<()> {
    require_dir(dir)?;
    let dir = dir.canonicalize().or_raise(|| ErrorKind::Scan(dir.to_path_buf()))?;
    let temp_dir = temp_dir.canonicalize().unwrap_or_else(|_| temp_dir.to_path_buf());
    let in_data_dir = dir
        .ancestors()
        .filter_map(Path::file_name)
        .any(|name| name.to_str().is_some_and(|name| name.ends_with(DATA_DIR_SUFFIX)));
    if !in_data_dir && !is_within(&temp_dir, &dir) {
        exn::bail!(ErrorKind::OutsideManagedTree(dir));
    }
    Ok(())
}

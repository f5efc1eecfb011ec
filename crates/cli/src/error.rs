//! CLI Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load settings")]
    Config,
    #[display("not a directory: {}", _0.display())]
    NotADirectory(#[error(not(source))] PathBuf),
    #[display("refusing to touch {}: not inside the temp dir or a project data dir", _0.display())]
    OutsideManagedTree(#[error(not(source))] PathBuf),
    #[display("could not scan {}", _0.display())]
    Scan(#[error(not(source))] PathBuf),
    #[display("could not clean the temp directory")]
    CleanTemp,
}

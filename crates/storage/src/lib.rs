pub mod error;
pub mod fs;
mod path;
pub mod progress;
pub mod scan;

#[cfg(any(test, feature = "mock"))]
pub use crate::fs::FaultyFs;
pub use crate::fs::{DirEntry, Filesystem, LocalFs};
pub use crate::path::{is_within, normalize_relative, validate_file_name};
pub use crate::progress::{Cancellation, NoProgress, Progress, keep_going};
use std::sync::Arc;

pub type FsHandle = Arc<dyn Filesystem>;

//! Progress reporting and cooperative cancellation.
//!
//! Long-running filesystem work (relocation, recursive cleanup, scans) reports
//! `(done, total)` to a [`Progress`] sink. The sink decides whether to keep
//! going, so a UI can drive a progress bar with a cancel button without this
//! crate knowing anything about the UI.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives progress updates. Returning `false` requests cancellation.
pub trait Progress {
    fn update(&mut self, done: u64, total: u64) -> bool;
}

impl<F> Progress for F
where
    F: FnMut(u64, u64) -> bool,
{
    fn update(&mut self, done: u64, total: u64) -> bool {
        self(done, total)
    }
}

/// A [`Progress`] sink that ignores updates and never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;
impl Progress for NoProgress {
    fn update(&mut self, _done: u64, _total: u64) -> bool {
        true
    }
}

/// Shared cancellation flag.
///
/// Cloning shares the flag; any clone may cancel, every clone observes it.
///
/// ```
/// use aup_storage::Cancellation;
/// let token = Cancellation::default();
/// let observer = token.clone();
/// token.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Default, Clone)]
pub struct Cancellation(Arc<AtomicBool>);
impl Cancellation {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Combines a sink and a token: `true` while work should continue.
pub fn keep_going(progress: &mut dyn Progress, cancel: &Cancellation, done: u64, total: u64) -> bool {
    !cancel.is_cancelled() && progress.update(done, total)
}

//! Progress reporting and cooperative cancellation.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress of an area pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    /// What the pass is doing, or the last rule failure.
    pub label: String,
}

impl Progress {
    /// Completed share in `[0, 1]`; 1 when there is nothing to do.
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            (self.completed as f32 / self.total as f32).min(1.0)
        }
    }
}

/// Receives progress at every suspension point of an area pass.
pub trait ProgressReporter {
    /// Returns `true` to request cancellation.
    fn update(&mut self, progress: &Progress) -> bool;
}

impl<F> ProgressReporter for F
where
    F: FnMut(&Progress) -> bool,
{
    fn update(&mut self, progress: &Progress) -> bool {
        self(progress)
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

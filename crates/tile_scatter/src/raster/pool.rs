//! Pool of reusable raster buffers.
//!
//! Workspaces stitch several channels per cell; recycling their buffers keeps an area pass from
//! reallocating canvases cell after cell. A [`PooledRaster`] hands its buffer back when dropped,
//! so buffers return to the pool on error paths too.
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{CanvasGrid, Raster};

/// Default number of free buffers a pool retains.
pub const DEFAULT_MAX_RETAINED: usize = 64;

/// Snapshot of pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently lent out.
    pub outstanding: usize,
    /// Free buffers held for reuse.
    pub retained: usize,
    /// Acquisitions served by a fresh allocation.
    pub allocations: u64,
    /// Acquisitions served from a retained buffer.
    pub reuses: u64,
}

/// Thread-safe pool of `f32` buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<f32>>>,
    max_retained: usize,
    outstanding: AtomicUsize,
    allocations: AtomicU64,
    reuses: AtomicU64,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_max_retained(DEFAULT_MAX_RETAINED)
    }

    pub fn with_max_retained(max_retained: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_retained,
            outstanding: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
        }
    }

    /// Lends a zeroed raster laid out on `grid`.
    pub fn acquire(self: &Arc<Self>, grid: CanvasGrid) -> PooledRaster {
        self.acquire_filled(grid, 0.0)
    }

    /// Lends a raster laid out on `grid` with every sample set to `value`.
    pub fn acquire_filled(self: &Arc<Self>, grid: CanvasGrid, value: f32) -> PooledRaster {
        let len = grid.len();
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let data = match recycled {
            Some(mut buf) => {
                self.reuses.fetch_add(1, Ordering::Relaxed);
                buf.clear();
                buf.resize(len, value);
                buf
            }
            None => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                vec![value; len]
            }
        };
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        PooledRaster {
            raster: Raster { grid, data },
            pool: Arc::clone(self),
        }
    }

    /// Lends a copy of `raster`.
    pub fn acquire_copy(self: &Arc<Self>, raster: &Raster) -> PooledRaster {
        let mut pooled = self.acquire(raster.grid.clone());
        pooled.data.copy_from_slice(&raster.data);
        pooled
    }

    /// Buffers currently lent out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            outstanding: self.outstanding(),
            retained: self
                .free
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
        }
    }

    fn release(&self, buf: Vec<f32>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if buf.capacity() == 0 {
            return;
        }
        let mut free = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if free.len() < self.max_retained {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A raster borrowed from a [`BufferPool`], returned on drop.
#[derive(Debug)]
pub struct PooledRaster {
    raster: Raster,
    pool: Arc<BufferPool>,
}

impl PooledRaster {
    /// Detaches the raster from the pool. The buffer is not recycled.
    pub fn into_raster(mut self) -> Raster {
        let data = std::mem::take(&mut self.raster.data);
        Raster {
            grid: self.raster.grid.clone(),
            data,
        }
    }
}

impl Deref for PooledRaster {
    type Target = Raster;

    fn deref(&self) -> &Raster {
        &self.raster
    }
}

impl DerefMut for PooledRaster {
    fn deref_mut(&mut self) -> &mut Raster {
        &mut self.raster
    }
}

impl Drop for PooledRaster {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.raster.data);
        self.pool.release(data);
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;

    fn grid(n: usize) -> CanvasGrid {
        CanvasGrid::new(Vec2::ZERO, 1.0, n, n)
    }

    #[test]
    fn buffers_return_on_drop_and_are_reused() {
        let pool = Arc::new(BufferPool::new());
        {
            let mut a = pool.acquire(grid(4));
            a.set(1, 1, 5.0);
            assert_eq!(pool.outstanding(), 1);
        }
        assert_eq!(pool.outstanding(), 0);
        let b = pool.acquire(grid(4));
        assert!(b.data.iter().all(|v| *v == 0.0));
        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reuses, 1);
    }

    #[test]
    fn retained_buffers_are_capped() {
        let pool = Arc::new(BufferPool::with_max_retained(1));
        let a = pool.acquire(grid(2));
        let b = pool.acquire(grid(2));
        drop(a);
        drop(b);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.retained, 1);
    }

    #[test]
    fn into_raster_detaches() {
        let pool = Arc::new(BufferPool::new());
        let pooled = pool.acquire_filled(grid(3), 0.5);
        let raster = pooled.into_raster();
        assert_eq!(raster.data.len(), 9);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.stats().retained, 0);
    }

    #[test]
    fn release_happens_on_unwind() {
        let pool = Arc::new(BufferPool::new());
        let p = Arc::clone(&pool);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _held = p.acquire(grid(2));
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(pool.outstanding(), 0);
    }
}

//! Off-screen surface pooling and memory-pressure hygiene.
//!
//! The pool bounds memory by reusing scratch surfaces keyed by
//! `(width, height, kind)`. No correctness invariant depends on pooling;
//! eviction is always safe. Pooled handles are handed to at most one active
//! job at a time, tracked through the active set.
//!
//! The host drives the cadence: call [`ResourceManager::sweep`] on a fixed
//! interval, [`ResourceManager::observe_memory`] from a memory monitor, and
//! [`ResourceManager::on_hidden`] when the application is backgrounded.

use crate::result::{GrabarError, GrabarResult};
use crate::surface::{PixelSurface, SurfaceKind};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::debug;

/// Entries larger than this (in pixels) are never pooled
pub const MAX_POOLED_AREA: u64 = 4096 * 4096;

/// Pooled entries older than this are evicted by a sweep
pub const STALENESS_WINDOW: Duration = Duration::from_secs(30);

/// At most this many idle entries are kept per pool key
pub const MAX_ENTRIES_PER_KEY: usize = 4;

/// Process memory above this triggers immediate full-pool eviction
pub const HIGH_PRESSURE_BYTES: u64 = 512 * 1024 * 1024;

/// Process memory above this triggers a partial sweep
pub const MODERATE_PRESSURE_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    width: u32,
    height: u32,
    kind: SurfaceKind,
}

#[derive(Debug)]
struct PooledEntry {
    surface: PixelSurface,
    pooled_at: Instant,
}

/// A surface checked out from the pool
///
/// Return it with [`ResourceManager::release`]; dropping it without a
/// release simply forfeits reuse.
#[derive(Debug)]
pub struct PooledSurface {
    id: u64,
    key: PoolKey,
    /// The checked-out surface
    pub surface: PixelSurface,
}

impl PooledSurface {
    /// Unique checkout id, used by the active set
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Pools and reuses off-screen surfaces and reacts to memory pressure
#[derive(Debug)]
pub struct ResourceManager {
    pool: HashMap<PoolKey, Vec<PooledEntry>>,
    active: HashSet<u64>,
    next_id: u64,
    staleness_window: Duration,
    shut_down: bool,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceManager {
    /// Create a resource manager with the default staleness window
    #[must_use]
    pub fn new() -> Self {
        Self {
            pool: HashMap::new(),
            active: HashSet::new(),
            next_id: 0,
            staleness_window: STALENESS_WINDOW,
            shut_down: false,
        }
    }

    /// Override the staleness window
    #[must_use]
    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    /// Acquire a surface, reusing a pooled one when available
    pub fn acquire(
        &mut self,
        width: u32,
        height: u32,
        kind: SurfaceKind,
    ) -> GrabarResult<PooledSurface> {
        if self.shut_down {
            return Err(GrabarError::InvalidState {
                message: "resource manager has been shut down".to_string(),
            });
        }

        let key = PoolKey {
            width,
            height,
            kind,
        };
        self.next_id += 1;
        let id = self.next_id;
        self.active.insert(id);

        let reused = self.pool.get_mut(&key).and_then(|entries| {
            while let Some(entry) = entries.pop() {
                if entry.pooled_at.elapsed() <= self.staleness_window {
                    return Some(entry.surface);
                }
                // Stale entry found on the way; drop it.
            }
            None
        });

        let surface = match reused {
            Some(surface) => {
                debug!(width, height, ?kind, "reusing pooled surface");
                surface
            }
            None => PixelSurface::new(width, height),
        };

        Ok(PooledSurface { id, key, surface })
    }

    /// Return a surface to the pool, or dispose it when it cannot be pooled
    pub fn release(&mut self, mut handle: PooledSurface) {
        self.active.remove(&handle.id);

        let area = u64::from(handle.key.width) * u64::from(handle.key.height);
        if self.shut_down || area > MAX_POOLED_AREA {
            handle.surface.dispose();
            return;
        }

        let entries = self.pool.entry(handle.key).or_default();
        if entries.len() >= MAX_ENTRIES_PER_KEY {
            handle.surface.dispose();
            return;
        }

        handle.surface.clear();
        entries.push(PooledEntry {
            surface: handle.surface,
            pooled_at: Instant::now(),
        });
    }

    /// Evict stale pool entries; returns how many were dropped
    pub fn sweep(&mut self) -> usize {
        let window = self.staleness_window;
        let before = self.pooled_count();
        for entries in self.pool.values_mut() {
            entries.retain(|entry| entry.pooled_at.elapsed() <= window);
        }
        self.pool.retain(|_, entries| !entries.is_empty());
        let evicted = before - self.pooled_count();
        if evicted > 0 {
            debug!(evicted, "pool sweep evicted stale surfaces");
        }
        evicted
    }

    /// React to a process memory sample
    ///
    /// Crossing the high-pressure threshold evicts the whole pool; the
    /// moderate threshold triggers a partial sweep (stale entries plus the
    /// oldest half of every bucket).
    pub fn observe_memory(&mut self, used_bytes: u64) {
        if used_bytes >= HIGH_PRESSURE_BYTES {
            debug!(used_bytes, "high memory pressure, evicting entire pool");
            self.evict_all();
        } else if used_bytes >= MODERATE_PRESSURE_BYTES {
            debug!(used_bytes, "moderate memory pressure, partial sweep");
            self.sweep();
            for entries in self.pool.values_mut() {
                entries.sort_by_key(|entry| entry.pooled_at);
                let keep = entries.len().div_ceil(2);
                entries.drain(..entries.len() - keep);
            }
            self.pool.retain(|_, entries| !entries.is_empty());
        }
    }

    /// The host application was hidden or backgrounded
    pub fn on_hidden(&mut self) {
        debug!("host hidden, evicting entire pool");
        self.evict_all();
    }

    /// Drop every idle pooled surface
    pub fn evict_all(&mut self) {
        self.pool.clear();
    }

    /// Drain the pool and refuse further acquisitions
    pub fn shutdown(&mut self) {
        self.evict_all();
        self.shut_down = true;
    }

    /// Number of idle surfaces currently pooled
    #[must_use]
    pub fn pooled_count(&self) -> usize {
        self.pool.values().map(Vec::len).sum()
    }

    /// Number of surfaces checked out to active jobs
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Total bytes held by idle pooled surfaces
    #[must_use]
    pub fn pooled_bytes(&self) -> usize {
        self.pool
            .values()
            .flat_map(|entries| entries.iter())
            .map(|entry| entry.surface.size_bytes())
            .sum()
    }
}

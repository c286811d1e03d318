//! Heap allocation tracking.
//!
//! [`TrackingAllocator`] wraps the system allocator. It always maintains cheap
//! per-size-class counters. While a [`TrackingSession`] is held it also
//! records every new allocation together with a short stack trace, so the
//! memory probe can attribute live bytes to call sites.
//!
//! The session is process-wide singleton state: at most one holder at a time,
//! and dropping the holder stops tracing and frees the trace table.
//!
//! Install it in the binary:
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: rtdiag::system::tracker::TrackingAllocator =
//!     rtdiag::system::tracker::TrackingAllocator;
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::system::snapshot::SizeClassStats;

/// Frames kept per traced allocation.
pub const MAX_FRAMES: usize = 32;

struct SizeClass {
    name: &'static str,
    max_bytes: Option<usize>,
    allocations: AtomicU64,
    frees: AtomicU64,
}

impl SizeClass {
    const fn new(name: &'static str, max_bytes: Option<usize>) -> Self {
        SizeClass {
            name,
            max_bytes,
            allocations: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }
}

static SIZE_CLASSES: [SizeClass; 4] = [
    SizeClass::new("small", Some(64)),
    SizeClass::new("medium", Some(4 * 1024)),
    SizeClass::new("large", Some(1024 * 1024)),
    SizeClass::new("huge", None),
];

static INSTALLED: AtomicBool = AtomicBool::new(false);
static SESSION_HELD: AtomicBool = AtomicBool::new(false);
static TRACING: AtomicBool = AtomicBool::new(false);
static TRACES: Mutex<Option<HashMap<usize, TracedAllocation>>> = Mutex::new(None);

thread_local! {
    static IN_TRACKER: Cell<bool> = const { Cell::new(false) };
}

/// A live allocation recorded during a session.
#[derive(Clone, Debug)]
pub struct TracedAllocation {
    pub size: usize,
    frames: [usize; MAX_FRAMES],
    depth: usize,
}

impl TracedAllocation {
    pub fn new(size: usize, frames: &[usize]) -> Self {
        let mut stored = [0usize; MAX_FRAMES];
        let depth = frames.len().min(MAX_FRAMES);
        stored[..depth].copy_from_slice(&frames[..depth]);
        TracedAllocation {
            size,
            frames: stored,
            depth,
        }
    }

    /// Return addresses, innermost first.
    pub fn frames(&self) -> &[usize] {
        &self.frames[..self.depth]
    }
}

/// Marks the current thread as inside the tracker so nested allocations
/// (hash table growth, unwinder state) bypass tracing.
struct ReentrancyGuard;

impl ReentrancyGuard {
    fn enter() -> Option<Self> {
        let entered = IN_TRACKER
            .try_with(|flag| !flag.replace(true))
            .unwrap_or(false);
        entered.then_some(ReentrancyGuard)
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        let _ = IN_TRACKER.try_with(|flag| flag.set(false));
    }
}

fn traces() -> MutexGuard<'static, Option<HashMap<usize, TracedAllocation>>> {
    TRACES.lock().unwrap_or_else(PoisonError::into_inner)
}

fn class_index(size: usize) -> usize {
    SIZE_CLASSES
        .iter()
        .position(|class| class.max_bytes.is_none_or(|max| size <= max))
        .unwrap_or(SIZE_CLASSES.len() - 1)
}

fn on_alloc(ptr: *mut u8, size: usize) {
    if !INSTALLED.load(Ordering::Relaxed) {
        INSTALLED.store(true, Ordering::Relaxed);
    }
    SIZE_CLASSES[class_index(size)]
        .allocations
        .fetch_add(1, Ordering::Relaxed);

    if !TRACING.load(Ordering::Acquire) {
        return;
    }
    let Some(_guard) = ReentrancyGuard::enter() else {
        return;
    };

    let mut frames = [0usize; MAX_FRAMES];
    let mut depth = 0;
    backtrace::trace(|frame| {
        frames[depth] = frame.ip() as usize;
        depth += 1;
        depth < MAX_FRAMES
    });

    if let Some(table) = traces().as_mut() {
        table.insert(ptr as usize, TracedAllocation::new(size, &frames[..depth]));
    }
}

fn on_dealloc(ptr: *mut u8, size: usize) {
    SIZE_CLASSES[class_index(size)]
        .frees
        .fetch_add(1, Ordering::Relaxed);

    if !TRACING.load(Ordering::Acquire) {
        return;
    }
    let Some(_guard) = ReentrancyGuard::enter() else {
        return;
    };
    if let Some(table) = traces().as_mut() {
        table.remove(&(ptr as usize));
    }
}

/// Global allocator that forwards to [`System`] and feeds the tracker.
pub struct TrackingAllocator;

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            on_alloc(ptr, layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            on_alloc(ptr, layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        on_dealloc(ptr, layout.size());
        unsafe { System.dealloc(ptr, layout) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            on_dealloc(ptr, layout.size());
            on_alloc(new_ptr, new_size);
        }
        new_ptr
    }
}

/// True once any allocation has gone through [`TrackingAllocator`], i.e. it
/// is the process's global allocator.
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::Relaxed)
}

pub fn is_tracing() -> bool {
    TRACING.load(Ordering::Acquire)
}

/// Allocations not yet freed, across all size classes.
pub fn live_allocations() -> u64 {
    size_class_stats().iter().map(|c| c.live).sum()
}

pub fn size_class_stats() -> Vec<SizeClassStats> {
    SIZE_CLASSES
        .iter()
        .map(|class| {
            let allocations = class.allocations.load(Ordering::Relaxed);
            let frees = class.frees.load(Ordering::Relaxed);
            SizeClassStats {
                class: class.name,
                max_bytes: class.max_bytes,
                allocations,
                frees,
                live: allocations.saturating_sub(frees),
            }
        })
        .collect()
}

/// Exclusive handle on the tracing session. Tracing stops when it drops.
#[derive(Debug)]
pub struct TrackingSession {
    _private: (),
}

/// Start tracing new allocations.
///
/// Fails with [`Error::TrackingSessionConflict`] if a session is already
/// held; the existing session is left untouched.
pub fn start_session() -> Result<TrackingSession> {
    SESSION_HELD
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .map_err(|_| Error::TrackingSessionConflict)?;

    {
        let _guard = ReentrancyGuard::enter();
        *traces() = Some(HashMap::new());
    }
    TRACING.store(true, Ordering::Release);
    tracing::debug!("allocation tracking started");
    Ok(TrackingSession { _private: () })
}

impl TrackingSession {
    /// Copy of every allocation traced since the session started and still
    /// live.
    pub fn snapshot(&self) -> Vec<TracedAllocation> {
        let _guard = ReentrancyGuard::enter();
        traces()
            .as_ref()
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        TRACING.store(false, Ordering::Release);
        let table = {
            let _guard = ReentrancyGuard::enter();
            traces().take()
        };
        drop(table);
        SESSION_HELD.store(false, Ordering::Release);
        tracing::debug!("allocation tracking stopped");
    }
}

/// Serialises tests that start sessions within one test binary.
#[cfg(test)]
pub(crate) fn test_session_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_installed_in_tests() {
        let _v = vec![1u8; 16];
        assert!(is_installed());
    }

    #[test]
    fn size_class_boundaries() {
        assert_eq!(class_index(0), 0);
        assert_eq!(class_index(64), 0);
        assert_eq!(class_index(65), 1);
        assert_eq!(class_index(4096), 1);
        assert_eq!(class_index(1024 * 1024), 2);
        assert_eq!(class_index(1024 * 1024 + 1), 3);
    }

    #[test]
    fn second_session_conflicts_until_first_drops() {
        let _lock = test_session_lock();
        let session = start_session().unwrap();
        assert!(is_tracing());
        assert!(matches!(
            start_session(),
            Err(Error::TrackingSessionConflict)
        ));
        // The conflicting attempt must not have stopped the holder.
        assert!(is_tracing());

        drop(session);
        assert!(!is_tracing());
        let again = start_session().unwrap();
        drop(again);
        assert!(!is_tracing());
    }

    #[test]
    fn session_records_live_allocations_only() {
        let _lock = test_session_lock();
        let session = start_session().unwrap();
        let kept = vec![7u8; 100_000];
        let freed = vec![9u8; 200_000];
        drop(freed);

        let traced = session.snapshot();
        assert!(traced.iter().any(|t| t.size == 100_000 && !t.frames().is_empty()));
        assert!(!traced.iter().any(|t| t.size == 200_000));

        drop(session);
        drop(kept);
    }

    #[test]
    fn counters_track_allocations_and_frees() {
        let before = size_class_stats();
        let boxed = std::hint::black_box(Box::new([0u8; 2048]));
        drop(boxed);
        let after = size_class_stats();

        let medium = |stats: &[SizeClassStats]| {
            stats.iter().find(|c| c.class == "medium").cloned().unwrap()
        };
        assert!(medium(&after).allocations > medium(&before).allocations);
        assert!(medium(&after).frees > medium(&before).frees);
    }

    #[test]
    fn traced_allocation_truncates_frames() {
        let frames: Vec<usize> = (1..=64).collect();
        let traced = TracedAllocation::new(8, &frames);
        assert_eq!(traced.frames().len(), MAX_FRAMES);
        assert_eq!(traced.frames()[0], 1);
    }
}

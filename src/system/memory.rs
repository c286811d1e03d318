use std::collections::HashMap;
use std::ffi::c_void;

use crate::error::{Error, Result};
use crate::system::snapshot::{AllocationSite, MemoryFacts};
use crate::system::tracker::{self, TracedAllocation};

pub const UNKNOWN_FILE: &str = "<unknown>";

/// Path fragments of frames that belong to the allocator machinery rather
/// than to the code that asked for memory.
const RUNTIME_FRAME_MARKERS: [&str; 6] = [
    "/rustc/",
    "/library/alloc/",
    "/library/core/",
    "/library/std/",
    "/backtrace-",
    "system/tracker.rs",
];

/// Source location an allocation is attributed to.
pub type SiteKey = (String, u32);

pub trait MemoryIntrospector {
    fn collect(&mut self, top_n: usize) -> Result<MemoryFacts>;
}

/// Reads the process heap through [`tracker::TrackingAllocator`].
///
/// Only allocations made while the tracking session is open, and still live
/// when it is captured, are attributed to sites. The session opens at the
/// start of [`MemoryIntrospector::collect`] and is captured right away, so
/// memory allocated earlier (including everything the program did before the
/// probe ran) never shows up in `top_sites`. An empty list with zero tracked
/// sites is the normal result for a quiet process, not a failure; the
/// always-on counters in `live_allocations` and `size_classes` still cover
/// the whole heap.
#[derive(Debug, Default)]
pub struct TrackedHeap {
    symbols: HashMap<usize, Option<SiteKey>>,
}

impl TrackedHeap {
    pub fn new() -> Self {
        Self::default()
    }

    fn site_of(&mut self, frames: &[usize]) -> SiteKey {
        for &ip in frames {
            let resolved = self
                .symbols
                .entry(ip)
                .or_insert_with(|| resolve_frame(ip));
            if let Some(site) = resolved {
                return site.clone();
            }
        }
        (UNKNOWN_FILE.to_string(), 0)
    }
}

impl MemoryIntrospector for TrackedHeap {
    fn collect(&mut self, top_n: usize) -> Result<MemoryFacts> {
        let _span = tracing::debug_span!("probe.memory", top_n).entered();

        if !tracker::is_installed() {
            return Err(Error::probe_unavailable(
                "memory",
                "TrackingAllocator is not the global allocator",
            ));
        }

        // The session only spans the capture; symbol resolution below is
        // expensive and must not be traced.
        let traces = {
            let session = tracker::start_session()?;
            session.snapshot()
        };

        let totals = aggregate_sites(&traces, |frames| self.site_of(frames));
        let tracked_sites = totals.len();
        let top_sites = rank_sites(totals, top_n);
        tracing::debug!(traced = traces.len(), tracked_sites, "heap snapshot ranked");

        Ok(MemoryFacts {
            live_allocations: tracker::live_allocations(),
            size_classes: tracker::size_class_stats(),
            tracked_sites,
            top_sites,
        })
    }
}

/// Sum traced bytes per call site.
pub fn aggregate_sites<F>(traces: &[TracedAllocation], mut site_of: F) -> HashMap<SiteKey, u64>
where
    F: FnMut(&[usize]) -> SiteKey,
{
    let mut totals: HashMap<SiteKey, u64> = HashMap::new();
    for trace in traces {
        *totals.entry(site_of(trace.frames())).or_default() += trace.size as u64;
    }
    totals
}

/// Largest `top_n` sites, descending by size. Ties are ordered by location
/// so the result is deterministic.
pub fn rank_sites(totals: HashMap<SiteKey, u64>, top_n: usize) -> Vec<AllocationSite> {
    let mut sites: Vec<(SiteKey, u64)> = totals.into_iter().collect();
    sites.sort_by(|(a_key, a_bytes), (b_key, b_bytes)| {
        b_bytes.cmp(a_bytes).then_with(|| a_key.cmp(b_key))
    });
    sites
        .into_iter()
        .take(top_n)
        .map(|((file, line), bytes)| AllocationSite {
            file,
            line,
            size_kb: bytes as f64 / 1024.0,
        })
        .collect()
}

fn is_runtime_frame(file: &str) -> bool {
    RUNTIME_FRAME_MARKERS.iter().any(|m| file.contains(m))
}

/// Innermost non-runtime source location for a return address.
fn resolve_frame(ip: usize) -> Option<SiteKey> {
    let mut found = None;
    // Return addresses point after the call; step back into it.
    let addr = ip.saturating_sub(1) as *mut c_void;
    backtrace::resolve(addr, |symbol| {
        if found.is_some() {
            return;
        }
        let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) else {
            return;
        };
        let file = file.to_string_lossy().replace('\\', "/");
        if !is_runtime_frame(&file) {
            found = Some((file, line));
        }
    });
    found
}

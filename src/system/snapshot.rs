use std::path::PathBuf;

use serde::Serialize;

/// One complete diagnostics collection. Built once by the collector and
/// handed out by value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub captured_at_unix_ms: u64,
    pub runtime: RuntimeFacts,
    pub process: ProcessFacts,
    pub threads: ThreadFacts,
    pub memory: MemoryFacts,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuntimeFacts {
    pub version: String,
    pub crate_version: String,
    pub platform: String,
    pub executable: PathBuf,
    /// Whether the runtime serialises execution behind one global lock.
    pub global_execution_lock: bool,
    pub stack_limit: StackLimit,
    pub implementation: String,
    pub build_profile: String,
}

/// Soft stack-size limit, the bound on call depth for native code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StackLimit {
    Bytes(u64),
    Unlimited,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessFacts {
    pub name: String,
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub cpu_count: usize,
    pub memory: MemoryUsage,
    pub cpu_percent: f32,
    pub cpu_sample_window_ms: u64,
    pub threads: usize,
}

/// Resident and virtual set sizes in MB.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub rss_mb: f64,
    pub vms_mb: f64,
}

const BYTES_PER_MB: f64 = 1_048_576.0;

impl MemoryUsage {
    pub fn from_bytes(rss: u64, vms: u64) -> Self {
        MemoryUsage {
            rss_mb: rss as f64 / BYTES_PER_MB,
            vms_mb: vms as f64 / BYTES_PER_MB,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ThreadRecord {
    pub name: String,
    pub ident: u64,
    /// Set for every thread the process does not wait for at exit.
    pub daemon: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ThreadFacts {
    pub current: ThreadRecord,
    pub active_threads: usize,
    pub thread_list: Vec<ThreadRecord>,
}

impl ThreadFacts {
    /// Normalise an enumeration into facts: one record per id, ordered by id,
    /// with `current` present exactly once even when the registry lagged.
    pub fn new(current: ThreadRecord, mut thread_list: Vec<ThreadRecord>) -> Self {
        thread_list.retain(|t| t.ident != current.ident);
        thread_list.push(current.clone());
        thread_list.sort_by_key(|t| t.ident);
        thread_list.dedup_by_key(|t| t.ident);

        ThreadFacts {
            current,
            active_threads: thread_list.len(),
            thread_list,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemoryFacts {
    pub live_allocations: u64,
    pub size_classes: Vec<SizeClassStats>,
    pub tracked_sites: usize,
    pub top_sites: Vec<AllocationSite>,
}

/// Allocator counters for one allocation size class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SizeClassStats {
    pub class: &'static str,
    /// Inclusive upper bound of the class; `None` for the last class.
    pub max_bytes: Option<usize>,
    pub allocations: u64,
    pub frees: u64,
    pub live: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AllocationSite {
    pub file: String,
    pub line: u32,
    pub size_kb: f64,
}

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{Config, WorkloadConfig};
use crate::error::{Error, Result};

use super::memory::{MemoryIntrospector, TrackedHeap};
use super::process::{ProcessIntrospector, SysinfoProcess};
use super::runtime::{NativeRuntime, RuntimeIntrospector};
use super::snapshot::{MemoryFacts, ProcessFacts, RuntimeFacts, Snapshot, ThreadFacts};
use super::threads::{OsThreads, ThreadIntrospector};
use super::workload::{self, BinaryLauncher, ProcessLauncher};

/// Orchestrates one diagnostics collection.
///
/// The workload is spawned first, the four probes then run on the calling
/// thread while it is live, and the workload is always awaited before
/// returning, whether the probes succeeded or not. A probe failure fails
/// the whole collection; no partial snapshot is produced.
pub struct Collector {
    workload: WorkloadConfig,
    top_n: usize,
    launcher: Box<dyn ProcessLauncher>,
    runtime: Box<dyn RuntimeIntrospector>,
    process: Box<dyn ProcessIntrospector>,
    threads: Box<dyn ThreadIntrospector>,
    memory: Box<dyn MemoryIntrospector>,
}

struct Facts {
    runtime: RuntimeFacts,
    process: ProcessFacts,
    threads: ThreadFacts,
    memory: MemoryFacts,
}

impl Collector {
    /// Collector over the live process, re-executing this binary for
    /// workload children.
    pub fn new(config: &Config) -> Result<Self> {
        let launcher = BinaryLauncher::current_exe()
            .map_err(|e| Error::spawn_failure("process launcher", e))?;
        let process = SysinfoProcess::new(Duration::from_millis(
            config.process.cpu_sample_window_ms,
        ))?;

        Ok(Collector {
            workload: config.workload.clone(),
            top_n: config.memory.top_n,
            launcher: Box::new(launcher),
            runtime: Box::new(NativeRuntime),
            process: Box::new(process),
            threads: Box::new(OsThreads),
            memory: Box::new(TrackedHeap::new()),
        })
    }

    pub fn with_launcher(mut self, launcher: impl ProcessLauncher + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    pub fn with_runtime(mut self, runtime: impl RuntimeIntrospector + 'static) -> Self {
        self.runtime = Box::new(runtime);
        self
    }

    pub fn with_process(mut self, process: impl ProcessIntrospector + 'static) -> Self {
        self.process = Box::new(process);
        self
    }

    pub fn with_threads(mut self, threads: impl ThreadIntrospector + 'static) -> Self {
        self.threads = Box::new(threads);
        self
    }

    pub fn with_memory(mut self, memory: impl MemoryIntrospector + 'static) -> Self {
        self.memory = Box::new(memory);
        self
    }

    pub fn collect_snapshot(&mut self) -> Result<Snapshot> {
        let _span = tracing::debug_span!("collector.collect").entered();

        let captured_at_unix_ms = unix_millis(SystemTime::now())?;

        let load = workload::generate(&self.workload, self.launcher.as_ref())?;
        let probed = self.run_probes();
        let completion = load.await_completion();

        let facts = match (probed, completion) {
            (Ok(facts), Ok(report)) => {
                tracing::debug!(
                    threads = report.threads,
                    processes = report.processes,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "workload completed"
                );
                facts
            }
            (Err(err), Ok(_)) => return Err(err),
            (Err(err), Err(workload_err)) => {
                tracing::warn!(%workload_err, "workload also failed after probe failure");
                return Err(err);
            }
            (Ok(_), Err(workload_err)) => return Err(workload_err),
        };

        Ok(Snapshot {
            captured_at_unix_ms,
            runtime: facts.runtime,
            process: facts.process,
            threads: facts.threads,
            memory: facts.memory,
        })
    }

    fn run_probes(&mut self) -> Result<Facts> {
        let runtime = self.runtime.collect()?;
        let process = self.process.collect()?;
        let threads = self.threads.collect()?;
        let memory = self.memory.collect(self.top_n)?;
        Ok(Facts {
            runtime,
            process,
            threads,
            memory,
        })
    }
}

fn unix_millis(now: SystemTime) -> Result<u64> {
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| Error::probe_unavailable("clock", format!("system clock is before UNIX_EPOCH: {e}")))
}

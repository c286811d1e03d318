use std::time::Duration;

use sysinfo::{CpuRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::{Error, Result};
use crate::system::platform;
use crate::system::snapshot::{MemoryUsage, ProcessFacts};

pub trait ProcessIntrospector {
    fn collect(&mut self) -> Result<ProcessFacts>;
}

/// Current-process statistics read through `sysinfo`.
///
/// CPU utilisation is the share of one core used between two refreshes
/// `cpu_window` apart (clamped up to sysinfo's minimum interval). With a zero
/// window only one refresh happens and the first reading is 0.0.
pub struct SysinfoProcess {
    sys: System,
    pid: Pid,
    cpu_window: Duration,
}

impl SysinfoProcess {
    pub fn new(cpu_window: Duration) -> Result<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| Error::probe_unavailable("process", e.to_string()))?;
        Ok(SysinfoProcess {
            sys: System::new(),
            pid,
            cpu_window,
        })
    }

    fn effective_window(&self) -> Duration {
        if self.cpu_window.is_zero() {
            Duration::ZERO
        } else {
            self.cpu_window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)
        }
    }

    fn refresh(&mut self) -> usize {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            false,
            ProcessRefreshKind::everything(),
        )
    }
}

impl ProcessIntrospector for SysinfoProcess {
    fn collect(&mut self) -> Result<ProcessFacts> {
        let _span = tracing::debug_span!("probe.process", pid = self.pid.as_u32()).entered();

        self.sys.refresh_cpu_list(CpuRefreshKind::nothing());
        let cpu_count = self.sys.cpus().len();
        if cpu_count == 0 {
            return Err(Error::probe_unavailable("process", "no logical CPUs reported"));
        }

        let window = self.effective_window();
        self.refresh();
        if !window.is_zero() {
            std::thread::sleep(window);
            self.refresh();
        }

        let pid = self.pid.as_u32();
        let process = self.sys.process(self.pid).ok_or_else(|| {
            Error::probe_unavailable("process", format!("PID {pid} not readable"))
        })?;

        let threads = platform::thread_count(pid)
            .or_else(|| process.tasks().map(|tasks| tasks.len()))
            .ok_or_else(|| Error::probe_unavailable("process", "thread count not exposed"))?;

        Ok(ProcessFacts {
            name: process.name().to_string_lossy().to_string(),
            pid,
            parent_pid: process.parent().map(|p| p.as_u32()),
            cpu_count,
            memory: MemoryUsage::from_bytes(process.memory(), process.virtual_memory()),
            cpu_percent: process.cpu_usage(),
            cpu_sample_window_ms: window.as_millis() as u64,
            threads,
        })
    }
}

//! Synthetic concurrent load.
//!
//! The collector spawns a handful of compute-bound threads and child
//! processes before probing so that thread and process counts are observed
//! under non-trivial concurrency. With `hold_until_released` every unit stays
//! alive after its loop until [`WorkloadHandle::await_completion`] releases
//! it: threads park on a latch, children block on stdin until it is closed.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::WorkloadConfig;
use crate::error::{Error, Result};

/// Hidden CLI subcommand a [`BinaryLauncher`] child runs.
pub const CHILD_SUBCOMMAND: &str = "__workload-child";

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const CANCEL_CHECK_EVERY: u64 = 1 << 16;

/// Deterministic compute loop: sums `0..iterations`, stopping early once
/// `cancel` is set.
pub fn compute(iterations: u64, cancel: &AtomicBool) -> u64 {
    let mut total = 0u64;
    for i in 0..iterations {
        if i % CANCEL_CHECK_EVERY == 0 && cancel.load(Ordering::Relaxed) {
            break;
        }
        total = total.wrapping_add(std::hint::black_box(i));
    }
    total
}

/// Body of a workload child process: compute, then linger until the parent
/// closes our stdin.
pub fn run_child(iterations: u64) -> io::Result<u64> {
    let total = compute(iterations, &AtomicBool::new(false));
    io::copy(&mut io::stdin().lock(), &mut io::sink())?;
    Ok(total)
}

pub trait ProcessLauncher {
    /// Start one compute child with a piped stdin.
    fn launch(&self, iterations: u64) -> io::Result<Child>;
}

/// Runs `<program> __workload-child <iterations>`.
#[derive(Debug, Clone)]
pub struct BinaryLauncher {
    program: PathBuf,
}

impl BinaryLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        BinaryLauncher {
            program: program.into(),
        }
    }

    /// Re-execute the running binary.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

impl ProcessLauncher for BinaryLauncher {
    fn launch(&self, iterations: u64) -> io::Result<Child> {
        Command::new(&self.program)
            .arg(CHILD_SUBCOMMAND)
            .arg(iterations.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

/// Runs an arbitrary command as a workload child; `iterations` is ignored.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<OsString>) -> Self {
        CommandLauncher {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, _iterations: u64) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
    }
}

#[derive(Debug, Default)]
struct Latch {
    released: Mutex<bool>,
    cvar: Condvar,
}

impl Latch {
    fn wait(&self) {
        let mut released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        while !*released {
            released = self
                .cvar
                .wait(released)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn release(&self) {
        *self.released.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cvar.notify_all();
    }
}

/// Counts workers that have started running.
#[derive(Debug, Default)]
struct Arrivals {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl Arrivals {
    fn arrive(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.cvar.notify_all();
    }

    /// Block until `expected` workers arrived. Returns how many did before
    /// `deadline`.
    fn wait_for(&self, expected: usize, deadline: Instant) -> usize {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count < expected {
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            count = self
                .cvar
                .wait_timeout(count, left)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        *count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadReport {
    pub threads: usize,
    pub processes: usize,
    pub elapsed: Duration,
}

/// Running workload. Dropping it without awaiting cancels and reaps every
/// unit.
#[derive(Debug)]
pub struct WorkloadHandle {
    threads: Vec<(String, JoinHandle<u64>)>,
    children: Vec<(String, Child)>,
    latch: Arc<Latch>,
    cancel: Arc<AtomicBool>,
    timeout: Duration,
    started: Instant,
}

/// Spawn `config.threads` compute threads and `config.processes` compute
/// children. If any unit fails to spawn, the ones already running are
/// awaited before [`Error::SpawnFailure`] is returned.
pub fn generate(config: &WorkloadConfig, launcher: &dyn ProcessLauncher) -> Result<WorkloadHandle> {
    let _span = tracing::debug_span!(
        "workload.generate",
        threads = config.threads,
        processes = config.processes
    )
    .entered();

    let mut handle = WorkloadHandle {
        threads: Vec::with_capacity(config.threads),
        children: Vec::with_capacity(config.processes),
        latch: Arc::new(Latch::default()),
        cancel: Arc::new(AtomicBool::new(false)),
        timeout: config.timeout(),
        started: Instant::now(),
    };

    let arrivals = Arc::new(Arrivals::default());
    for index in 0..config.threads {
        let name = format!("rtdiag-worker-{index}");
        let arrivals = Arc::clone(&arrivals);
        let latch = Arc::clone(&handle.latch);
        let cancel = Arc::clone(&handle.cancel);
        let iterations = config.iterations;
        let hold = config.hold_until_released;

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            arrivals.arrive();
            let total = compute(iterations, &cancel);
            if hold {
                latch.wait();
            }
            total
        });
        match spawned {
            Ok(join) => handle.threads.push((format!("thread {name}"), join)),
            Err(source) => {
                return Err(handle.abandon(Error::spawn_failure(format!("thread {name}"), source)));
            }
        }
    }

    // Workers name themselves once running; return only after every one is
    // visible to the probes.
    let started = arrivals.wait_for(handle.threads.len(), Instant::now() + handle.timeout);
    if started < handle.threads.len() {
        tracing::warn!(started, expected = handle.threads.len(), "workload threads slow to start");
    }

    for index in 0..config.processes {
        match launcher.launch(config.iterations) {
            Ok(mut child) => {
                if !config.hold_until_released {
                    drop(child.stdin.take());
                }
                handle.children.push((format!("process {index}"), child));
            }
            Err(source) => {
                return Err(handle.abandon(Error::spawn_failure(format!("process {index}"), source)));
            }
        }
    }

    tracing::debug!(pids = ?handle.child_pids(), "workload running");
    Ok(handle)
}

impl WorkloadHandle {
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn child_pids(&self) -> Vec<u32> {
        self.children.iter().map(|(_, child)| child.id()).collect()
    }

    /// Release every unit and block until all have terminated, or until the
    /// configured timeout, after which stragglers are cancelled and
    /// [`Error::WorkloadTimeout`] is returned.
    pub fn await_completion(mut self) -> Result<WorkloadReport> {
        let _span = tracing::debug_span!("workload.await_completion").entered();
        self.finish()
    }

    fn abandon(mut self, err: Error) -> Error {
        tracing::warn!(%err, "workload spawn failed, awaiting spawned units");
        if let Err(cleanup) = self.finish() {
            tracing::warn!(%cleanup, "workload cleanup failed");
        }
        err
    }

    fn pending(&mut self) -> usize {
        let threads = self.threads.iter().filter(|(_, t)| !t.is_finished()).count();
        let children = self
            .children
            .iter_mut()
            .map(|(_, c)| c.try_wait())
            .filter(|status| matches!(status, Ok(None)))
            .count();
        threads + children
    }

    fn finish(&mut self) -> Result<WorkloadReport> {
        self.latch.release();
        for (_, child) in &mut self.children {
            drop(child.stdin.take());
        }

        let deadline = Instant::now() + self.timeout;
        let stragglers = loop {
            let pending = self.pending();
            if pending == 0 || Instant::now() >= deadline {
                break pending;
            }
            thread::sleep(POLL_INTERVAL);
        };
        if stragglers > 0 {
            self.cancel.store(true, Ordering::Relaxed);
            for (unit, child) in &mut self.children {
                if matches!(child.try_wait(), Ok(None)) {
                    tracing::warn!(%unit, pid = child.id(), "killing workload straggler");
                    let _ = child.kill();
                }
            }
        }

        let report = WorkloadReport {
            threads: self.threads.len(),
            processes: self.children.len(),
            elapsed: self.started.elapsed(),
        };

        let mut first_error = None;
        for (unit, join) in self.threads.drain(..) {
            if join.join().is_err() {
                first_error.get_or_insert(Error::unit_failed(unit, "thread panicked"));
            }
        }
        for (unit, mut child) in self.children.drain(..) {
            match child.wait() {
                Ok(status) if status.success() || stragglers > 0 => {}
                Ok(status) => {
                    first_error.get_or_insert(Error::unit_failed(unit, format!("exited with {status}")));
                }
                Err(e) => {
                    first_error.get_or_insert(Error::unit_failed(unit, e.to_string()));
                }
            }
        }

        if stragglers > 0 {
            return Err(Error::WorkloadTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
                stragglers,
            });
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

impl Drop for WorkloadHandle {
    fn drop(&mut self) {
        if self.threads.is_empty() && self.children.is_empty() {
            return;
        }
        self.cancel.store(true, Ordering::Relaxed);
        if let Err(err) = self.finish() {
            tracing::warn!(%err, "workload dropped without await");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn config(threads: usize, processes: usize) -> WorkloadConfig {
        WorkloadConfig {
            threads,
            processes,
            iterations: 1_000_000,
            hold_until_released: true,
            timeout_ms: 10_000,
        }
    }

    fn stdin_sink() -> CommandLauncher {
        CommandLauncher::new("sh").arg("-c").arg("cat > /dev/null")
    }

    /// Launches successfully `ok` times, then fails.
    struct FailingLauncher {
        inner: CommandLauncher,
        remaining: Cell<usize>,
        pids: std::cell::RefCell<Vec<u32>>,
    }

    impl ProcessLauncher for FailingLauncher {
        fn launch(&self, iterations: u64) -> io::Result<Child> {
            if self.remaining.get() == 0 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "injected EAGAIN"));
            }
            self.remaining.set(self.remaining.get() - 1);
            let child = self.inner.launch(iterations)?;
            self.pids.borrow_mut().push(child.id());
            Ok(child)
        }
    }

    #[test]
    fn compute_is_deterministic() {
        let cancel = AtomicBool::new(false);
        assert_eq!(compute(1_000_000, &cancel), 499_999_500_000);
        assert_eq!(compute(0, &cancel), 0);
    }

    #[test]
    fn compute_stops_when_cancelled() {
        let cancel = AtomicBool::new(true);
        assert_eq!(compute(u64::MAX, &cancel), 0);
    }

    #[test]
    fn held_threads_stay_alive_until_awaited() {
        let handle = generate(&config(2, 0), &stdin_sink()).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(handle.thread_count(), 2);
        assert!(handle.threads.iter().all(|(_, t)| !t.is_finished()));

        let report = handle.await_completion().unwrap();
        assert_eq!(report.threads, 2);
        assert_eq!(report.processes, 0);
    }

    #[test]
    fn workers_are_running_when_generate_returns() {
        let handle = generate(&config(3, 0), &stdin_sink()).unwrap();
        if let Ok(Some(all)) = crate::system::platform::threads() {
            for index in 0..3 {
                let name = format!("rtdiag-worker-{index}");
                assert!(all.iter().any(|t| t.name == name), "{name} not running");
            }
        }
        handle.await_completion().unwrap();
    }

    #[test]
    fn arrivals_wait_gives_up_at_deadline() {
        let arrivals = Arrivals::default();
        arrivals.arrive();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(arrivals.wait_for(2, deadline), 1);
        assert_eq!(arrivals.wait_for(1, Instant::now()), 1);
    }

    #[cfg(unix)]
    #[test]
    fn held_children_exit_once_stdin_closes() {
        let mut handle = generate(&config(0, 2), &stdin_sink()).unwrap();
        assert_eq!(handle.child_pids().len(), 2);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.pending(), 2);

        let report = handle.await_completion().unwrap();
        assert_eq!(report.processes, 2);
    }

    #[cfg(unix)]
    #[test]
    fn spawn_failure_reaps_already_spawned_children() {
        let launcher = FailingLauncher {
            inner: stdin_sink(),
            remaining: Cell::new(1),
            pids: Default::default(),
        };
        let err = generate(&config(1, 3), &launcher).unwrap_err();
        assert!(matches!(err, Error::SpawnFailure { .. }));

        let pids = launcher.pids.borrow();
        assert_eq!(pids.len(), 1);
        let mut sys = sysinfo::System::new();
        let sys_pid = sysinfo::Pid::from_u32(pids[0]);
        sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[sys_pid]), true);
        assert!(sys.process(sys_pid).is_none(), "child was left running");
    }

    #[test]
    fn timeout_cancels_runaway_threads() {
        let cfg = WorkloadConfig {
            threads: 1,
            processes: 0,
            iterations: u64::MAX,
            hold_until_released: false,
            timeout_ms: 50,
        };
        let handle = generate(&cfg, &stdin_sink()).unwrap();
        let err = handle.await_completion().unwrap_err();
        assert!(matches!(
            err,
            Error::WorkloadTimeout {
                timeout_ms: 50,
                stragglers: 1
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_runaway_children() {
        let cfg = WorkloadConfig {
            threads: 0,
            processes: 1,
            iterations: 0,
            hold_until_released: true,
            timeout_ms: 100,
        };
        let launcher = CommandLauncher::new("sh").arg("-c").arg("exec sleep 30");
        let started = Instant::now();
        let err = generate(&cfg, &launcher)
            .unwrap()
            .await_completion()
            .unwrap_err();
        assert!(matches!(err, Error::WorkloadTimeout { stragglers: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn failing_child_is_reported() {
        let launcher = CommandLauncher::new("sh").arg("-c").arg("exit 3");
        let err = generate(&config(0, 1), &launcher)
            .unwrap()
            .await_completion()
            .unwrap_err();
        assert!(matches!(err, Error::UnitFailed { .. }));
    }
}

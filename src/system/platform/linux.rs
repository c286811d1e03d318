use std::fs;
use std::io;
use std::path::Path;

use super::{OsThread, PlatformExtensions};
use crate::system::snapshot::StackLimit;

pub struct Platform;

impl PlatformExtensions for Platform {
    fn stack_limit() -> StackLimit {
        match fs::read_to_string("/proc/self/limits") {
            Ok(contents) => parse_stack_limit(&contents),
            Err(_) => StackLimit::Unknown,
        }
    }

    fn thread_count(pid: u32) -> Option<usize> {
        let contents = fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
        parse_status_threads(&contents)
    }

    fn current_thread() -> Option<OsThread> {
        // /proc/thread-self -> "<pid>/task/<tid>"
        let link = fs::read_link("/proc/thread-self").ok()?;
        let tid = link.file_name()?.to_str()?.parse::<u64>().ok()?;
        Some(os_thread(tid, Path::new("/proc/thread-self/comm")))
    }

    fn threads() -> io::Result<Option<Vec<OsThread>>> {
        let entries = fs::read_dir("/proc/self/task")?;
        let mut threads = Vec::new();
        for entry in entries.flatten() {
            let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) else {
                continue;
            };
            let comm = entry.path().join("comm");
            // The thread may have exited between readdir and here.
            if comm.exists() {
                threads.push(os_thread(tid, &comm));
            }
        }
        Ok(Some(threads))
    }
}

fn os_thread(tid: u64, comm: &Path) -> OsThread {
    let name = fs::read_to_string(comm)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_default();
    OsThread {
        id: tid,
        name,
        is_main: tid == u64::from(std::process::id()),
    }
}

fn parse_stack_limit(limits: &str) -> StackLimit {
    // "Max stack size            8388608              unlimited            bytes"
    let Some(rest) = limits
        .lines()
        .find_map(|line| line.strip_prefix("Max stack size"))
    else {
        return StackLimit::Unknown;
    };
    match rest.split_whitespace().next() {
        Some("unlimited") => StackLimit::Unlimited,
        Some(soft) => soft
            .parse()
            .map(StackLimit::Bytes)
            .unwrap_or(StackLimit::Unknown),
        None => StackLimit::Unknown,
    }
}

fn parse_status_threads(status: &str) -> Option<usize> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Threads:"))
        .and_then(|v| v.trim().parse().ok())
}

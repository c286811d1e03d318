use std::fmt::Write;

use crate::format::{format_bytes, format_fixed};
use crate::system::snapshot::{Snapshot, StackLimit};

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Human-readable report with one section per fact record.
pub fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Runtime Diagnostics ===");
    let _ = writeln!(out);

    let runtime = &snapshot.runtime;
    let _ = writeln!(out, "1. Runtime Information:");
    let _ = writeln!(out, "   - Version: {}", runtime.version);
    let _ = writeln!(out, "   - Crate Version: {}", runtime.crate_version);
    let _ = writeln!(out, "   - Platform: {}", runtime.platform);
    let _ = writeln!(out, "   - Executable: {}", runtime.executable.display());
    let _ = writeln!(
        out,
        "   - Global Execution Lock: {}",
        runtime.global_execution_lock
    );
    let _ = writeln!(out, "   - Stack Limit: {}", stack_limit(runtime.stack_limit));
    let _ = writeln!(out, "   - Implementation: {}", runtime.implementation);
    let _ = writeln!(out, "   - Build Profile: {}", runtime.build_profile);
    let _ = writeln!(out);

    let process = &snapshot.process;
    let _ = writeln!(out, "2. Process Information:");
    let _ = writeln!(out, "   - Name: {}", process.name);
    let _ = writeln!(out, "   - PID: {}", process.pid);
    match process.parent_pid {
        Some(ppid) => {
            let _ = writeln!(out, "   - Parent PID: {ppid}");
        }
        None => {
            let _ = writeln!(out, "   - Parent PID: none");
        }
    }
    let _ = writeln!(out, "   - CPU Count: {}", process.cpu_count);
    let _ = writeln!(
        out,
        "   - Memory Usage (RSS): {}",
        format_fixed(process.memory.rss_mb, "MB")
    );
    let _ = writeln!(
        out,
        "   - Memory Usage (VMS): {}",
        format_fixed(process.memory.vms_mb, "MB")
    );
    let _ = writeln!(
        out,
        "   - CPU Usage: {:.1}% (over {} ms)",
        process.cpu_percent, process.cpu_sample_window_ms
    );
    let _ = writeln!(out, "   - Threads: {}", process.threads);
    let _ = writeln!(out);

    let threads = &snapshot.threads;
    let _ = writeln!(out, "3. Thread Information:");
    let _ = writeln!(
        out,
        "   - Current Thread: {} (ID: {})",
        threads.current.name, threads.current.ident
    );
    let _ = writeln!(out, "   - Active Threads: {}", threads.active_threads);
    let _ = writeln!(out, "   - Thread List:");
    for thread in &threads.thread_list {
        let daemon = if thread.daemon { ", daemon" } else { "" };
        let _ = writeln!(
            out,
            "     * {} (ID: {}{})",
            thread.name, thread.ident, daemon
        );
    }
    let _ = writeln!(out);

    let memory = &snapshot.memory;
    let _ = writeln!(out, "4. Memory Information:");
    let _ = writeln!(out, "   - Live Allocations: {}", memory.live_allocations);
    let _ = writeln!(out, "   - Size Classes:");
    for class in &memory.size_classes {
        let bound = class
            .max_bytes
            .map(|max| format!(" (<= {})", format_bytes(max as u64)))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "     * {}{}: {} allocated, {} freed, {} live",
            class.class, bound, class.allocations, class.frees, class.live
        );
    }
    let _ = writeln!(out, "   - Tracked Sites: {}", memory.tracked_sites);
    let _ = writeln!(out, "   - Top Memory Usage:");
    if memory.top_sites.is_empty() {
        let _ = writeln!(out, "     * none");
    }
    for site in &memory.top_sites {
        let _ = writeln!(
            out,
            "     * {}:{}: {}",
            site.file,
            site.line,
            format_fixed(site.size_kb, "KB")
        );
    }

    out
}

pub fn render_json(snapshot: &Snapshot) -> serde_json::Result<String> {
    serde_json::to_string_pretty(snapshot)
}

fn stack_limit(limit: StackLimit) -> String {
    match limit {
        StackLimit::Bytes(bytes) => format_fixed(bytes as f64 / BYTES_PER_MB, "MB"),
        StackLimit::Unlimited => "unlimited".to_string(),
        StackLimit::Unknown => "unknown".to_string(),
    }
}

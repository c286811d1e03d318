//! Error kinds surfaced by the collector and its probes.
//!
//! Nothing is defaulted to a placeholder value: every failure below aborts
//! the collection call that hit it.

use std::io;

use thiserror::Error;

/// Errors produced while collecting a diagnostics snapshot.
#[derive(Debug, Error)]
pub enum Error {
    /// A workload thread or child process could not be created.
    #[error("failed to spawn workload {unit}: {source}")]
    SpawnFailure {
        unit: String,
        #[source]
        source: io::Error,
    },

    /// The OS refused (or does not expose) a query a probe depends on.
    #[error("{probe} probe unavailable: {reason}")]
    ProbeUnavailable { probe: &'static str, reason: String },

    /// A memory tracking session was requested while another one is active.
    #[error("memory tracking session is already active")]
    TrackingSessionConflict,

    /// Workload units did not finish before the configured deadline.
    #[error("workload did not finish within {timeout_ms} ms ({stragglers} unit(s) cancelled)")]
    WorkloadTimeout { timeout_ms: u64, stragglers: usize },

    /// A workload thread panicked or a child process exited unsuccessfully.
    #[error("workload {unit} failed: {reason}")]
    UnitFailed { unit: String, reason: String },
}

impl Error {
    pub fn probe_unavailable(probe: &'static str, reason: impl Into<String>) -> Self {
        Self::ProbeUnavailable {
            probe,
            reason: reason.into(),
        }
    }

    pub fn spawn_failure(unit: impl Into<String>, source: io::Error) -> Self {
        Self::SpawnFailure {
            unit: unit.into(),
            source,
        }
    }

    pub fn unit_failed(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnitFailed {
            unit: unit.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

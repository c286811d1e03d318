use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub workload: WorkloadConfig,
    pub process: ProcessConfig,
    pub memory: MemoryConfig,
}

/// Synthetic load spawned before the probes run.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub threads: usize,
    pub processes: usize,
    /// Increments performed by every thread and child process.
    pub iterations: u64,
    /// Keep units alive after their loop until the collector releases them,
    /// so the probes always observe the load.
    pub hold_until_released: bool,
    pub timeout_ms: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        WorkloadConfig {
            threads: 2,
            processes: 2,
            iterations: 1_000_000,
            hold_until_released: true,
            timeout_ms: 30_000,
        }
    }
}

impl WorkloadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// CPU utilisation is measured over this window. Zero disables the
    /// second sample, in which case the first reading is 0.0.
    pub cpu_sample_window_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        ProcessConfig {
            cpu_sample_window_ms: 200,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub top_n: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig { top_n: 3 }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rtdiag").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

pub fn load_config_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), %err, "invalid config, using defaults");
            Config::default()
        }),
        Err(_) => Config::default(),
    }
}

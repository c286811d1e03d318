pub mod collector;
pub mod memory;
pub mod platform;
pub mod process;
pub mod runtime;
pub mod snapshot;
pub mod threads;
pub mod tracker;
pub mod workload;

pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod report;
pub mod system;

pub use error::{Error, Result};
pub use system::collector::Collector;
pub use system::snapshot::Snapshot;

#[cfg(test)]
#[global_allocator]
static TEST_ALLOCATOR: system::tracker::TrackingAllocator = system::tracker::TrackingAllocator;

use std::io;

use super::{OsThread, PlatformExtensions};
use crate::system::snapshot::StackLimit;

pub struct Platform;

impl PlatformExtensions for Platform {
    fn stack_limit() -> StackLimit {
        StackLimit::Unknown
    }

    fn thread_count(_pid: u32) -> Option<usize> {
        None
    }

    fn current_thread() -> Option<OsThread> {
        None
    }

    fn threads() -> io::Result<Option<Vec<OsThread>>> {
        Ok(None)
    }
}

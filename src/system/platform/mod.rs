use std::io;

use crate::system::snapshot::StackLimit;

/// A thread as the operating system reports it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OsThread {
    pub id: u64,
    pub name: String,
    pub is_main: bool,
}

pub trait PlatformExtensions {
    fn stack_limit() -> StackLimit;
    fn thread_count(pid: u32) -> Option<usize>;
    fn current_thread() -> Option<OsThread>;
    /// Every thread of the current process. `Ok(None)` where the OS offers
    /// no enumeration, `Err` when it does but the query failed.
    fn threads() -> io::Result<Option<Vec<OsThread>>>;
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod fallback;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(target_os = "macos")]
use macos as platform_impl;
#[cfg(target_os = "windows")]
use windows as platform_impl;
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
use fallback as platform_impl;

pub fn stack_limit() -> StackLimit {
    platform_impl::Platform::stack_limit()
}

pub fn thread_count(pid: u32) -> Option<usize> {
    platform_impl::Platform::thread_count(pid)
}

pub fn current_thread() -> Option<OsThread> {
    platform_impl::Platform::current_thread()
}

pub fn threads() -> io::Result<Option<Vec<OsThread>>> {
    platform_impl::Platform::threads()
}

use std::io;
use std::mem;

use windows_sys::Win32::Foundation::{
    CloseHandle, FILETIME, HANDLE, INVALID_HANDLE_VALUE, LocalFree,
};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, TH32CS_SNAPTHREAD, THREADENTRY32, Thread32First, Thread32Next,
};
use windows_sys::Win32::System::Threading::{
    GetCurrentThreadId, GetThreadDescription, GetThreadTimes, OpenThread,
    THREAD_QUERY_LIMITED_INFORMATION,
};

use super::{OsThread, PlatformExtensions};
use crate::system::snapshot::StackLimit;

pub struct Platform;

impl PlatformExtensions for Platform {
    fn stack_limit() -> StackLimit {
        // Stack reserve is fixed per thread at link time; no process limit.
        StackLimit::Unknown
    }

    fn thread_count(pid: u32) -> Option<usize> {
        thread_ids(pid).ok().map(|ids| ids.len())
    }

    fn current_thread() -> Option<OsThread> {
        let tid = unsafe { GetCurrentThreadId() };
        let current = std::thread::current();
        Some(OsThread {
            id: u64::from(tid),
            name: current.name().unwrap_or_default().to_string(),
            is_main: current.name() == Some("main"),
        })
    }

    fn threads() -> io::Result<Option<Vec<OsThread>>> {
        let ids = thread_ids(std::process::id())?;

        let mut threads = Vec::with_capacity(ids.len());
        let mut earliest: Option<(u64, usize)> = None;
        for tid in ids {
            // The thread may have exited since the snapshot.
            let Some(handle) = OwnedHandle::open_thread(tid) else {
                continue;
            };
            if let Some(created) = handle.creation_time() {
                if earliest.is_none_or(|(at, _)| created < at) {
                    earliest = Some((created, threads.len()));
                }
            }
            threads.push(OsThread {
                id: u64::from(tid),
                name: handle.description().unwrap_or_default(),
                is_main: false,
            });
        }
        // The main thread is the oldest one.
        if let Some((_, index)) = earliest {
            threads[index].is_main = true;
        }
        Ok(Some(threads))
    }
}

struct OwnedHandle(HANDLE);

impl OwnedHandle {
    fn open_thread(tid: u32) -> Option<Self> {
        let handle = unsafe { OpenThread(THREAD_QUERY_LIMITED_INFORMATION, 0, tid) };
        (!handle.is_null()).then_some(OwnedHandle(handle))
    }

    fn creation_time(&self) -> Option<u64> {
        let mut creation: FILETIME = unsafe { mem::zeroed() };
        let mut exit: FILETIME = unsafe { mem::zeroed() };
        let mut kernel: FILETIME = unsafe { mem::zeroed() };
        let mut user: FILETIME = unsafe { mem::zeroed() };
        let ok = unsafe { GetThreadTimes(self.0, &mut creation, &mut exit, &mut kernel, &mut user) };
        (ok != 0)
            .then(|| (u64::from(creation.dwHighDateTime) << 32) | u64::from(creation.dwLowDateTime))
    }

    fn description(&self) -> Option<String> {
        let mut raw: *mut u16 = std::ptr::null_mut();
        let hr = unsafe { GetThreadDescription(self.0, &mut raw) };
        if hr < 0 || raw.is_null() {
            return None;
        }
        let name = unsafe {
            let len = (0..).take_while(|&i| *raw.add(i) != 0).count();
            String::from_utf16_lossy(std::slice::from_raw_parts(raw, len))
        };
        unsafe { LocalFree(raw.cast()) };
        Some(name)
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

/// Ids of every thread owned by `pid`, from a ToolHelp snapshot.
fn thread_ids(pid: u32) -> io::Result<Vec<u32>> {
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) };
    if snapshot == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    let snapshot = OwnedHandle(snapshot);

    let mut entry: THREADENTRY32 = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<THREADENTRY32>() as u32;

    let mut ids = Vec::new();
    let mut more = unsafe { Thread32First(snapshot.0, &mut entry) } != 0;
    if !more {
        return Err(io::Error::last_os_error());
    }
    while more {
        if entry.th32OwnerProcessID == pid {
            ids.push(entry.th32ThreadID);
        }
        more = unsafe { Thread32Next(snapshot.0, &mut entry) } != 0;
    }
    Ok(ids)
}

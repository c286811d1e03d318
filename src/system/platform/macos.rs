use std::io;

use libproc::libproc::proc_pid::{ListThreads, listpidinfo, pidinfo};
use libproc::libproc::task_info::TaskInfo;
use libproc::libproc::thread_info::ThreadInfo;

use super::{OsThread, PlatformExtensions};
use crate::system::snapshot::StackLimit;

/// Room for threads started between the count and the listing.
const LIST_SLACK: usize = 16;

pub struct Platform;

impl PlatformExtensions for Platform {
    fn stack_limit() -> StackLimit {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_STACK, &mut limit) };
        if rc != 0 {
            StackLimit::Unknown
        } else if limit.rlim_cur == libc::RLIM_INFINITY {
            StackLimit::Unlimited
        } else {
            StackLimit::Bytes(limit.rlim_cur)
        }
    }

    fn thread_count(pid: u32) -> Option<usize> {
        let info = pidinfo::<TaskInfo>(pid as i32, 0).ok()?;
        usize::try_from(info.pti_threadnum).ok()
    }

    fn current_thread() -> Option<OsThread> {
        // Thread handles from PROC_PIDLISTTHREADS are pthread_t values, so
        // the calling thread is identified the same way.
        let handle = unsafe { libc::pthread_self() } as u64;
        let name = std::thread::current()
            .name()
            .unwrap_or_default()
            .to_string();
        Some(OsThread {
            id: handle,
            name,
            is_main: unsafe { libc::pthread_main_np() } == 1,
        })
    }

    fn threads() -> io::Result<Option<Vec<OsThread>>> {
        let pid = std::process::id() as i32;
        let expected = Self::thread_count(std::process::id()).unwrap_or(0);
        let handles =
            listpidinfo::<ListThreads>(pid, expected + LIST_SLACK).map_err(io::Error::other)?;

        let mut threads = Vec::with_capacity(handles.len());
        // The task keeps its threads in creation order; the first is main.
        for (index, handle) in handles.into_iter().filter(|h| *h != 0).enumerate() {
            // The thread may have exited since the listing.
            let Ok(info) = pidinfo::<ThreadInfo>(pid, handle) else {
                continue;
            };
            threads.push(OsThread {
                id: handle,
                name: thread_name(&info.pth_name),
                is_main: index == 0,
            });
        }
        Ok(Some(threads))
    }
}

fn thread_name(raw: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

use std::cell::Cell;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::system::platform::{self, OsThread};
use crate::system::snapshot::{ThreadFacts, ThreadRecord};

pub trait ThreadIntrospector {
    fn collect(&mut self) -> Result<ThreadFacts>;
}

/// Thread inventory as the operating system sees it.
///
/// The listing is eventually consistent: threads spawned or exiting while
/// it runs may be missed or reported once more. The calling thread is always
/// present exactly once. Where the OS offers no enumeration only the calling
/// thread is reported; a listing the OS refuses fails the probe.
#[derive(Debug, Default)]
pub struct OsThreads;

impl ThreadIntrospector for OsThreads {
    fn collect(&mut self) -> Result<ThreadFacts> {
        let _span = tracing::debug_span!("probe.threads").entered();

        thread_facts(platform::current_thread(), platform::threads())
    }
}

fn thread_facts(
    current: Option<OsThread>,
    listed: io::Result<Option<Vec<OsThread>>>,
) -> Result<ThreadFacts> {
    let current = current
        .map(ThreadRecord::from)
        .unwrap_or_else(local_thread_record);
    let listed = listed
        .map_err(|e| Error::probe_unavailable("threads", format!("thread listing: {e}")))?
        .unwrap_or_default()
        .into_iter()
        .map(ThreadRecord::from)
        .collect();

    Ok(ThreadFacts::new(current, listed))
}

impl From<OsThread> for ThreadRecord {
    fn from(thread: OsThread) -> Self {
        ThreadRecord {
            name: thread.name,
            ident: thread.id,
            // Rust does not wait for non-main threads at process exit.
            daemon: !thread.is_main,
        }
    }
}

/// Identity for the calling thread when the OS exposes none.
fn local_thread_record() -> ThreadRecord {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static LOCAL_ID: Cell<u64> = const { Cell::new(0) };
    }

    let ident = LOCAL_ID.with(|id| {
        if id.get() == 0 {
            id.set(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        }
        id.get()
    });
    let current = std::thread::current();
    let name = current.name().unwrap_or("<unnamed>").to_string();
    ThreadRecord {
        daemon: name != "main",
        name,
        ident,
    }
}

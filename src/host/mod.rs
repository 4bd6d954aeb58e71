// SPDX-License-Identifier: Unlicense

//! The untrusted host: thread creation, joining, sleeping and interrupt
//! delivery.
//!
//! [`Host`] is the interface the domain consumes. [`SimHost`] implements it
//! with OS threads: each created thread is dispatched into the domain on
//! its own `std::thread`, running the entry function bound for its kind.

pub mod interrupt;

pub use interrupt::{InterruptLine, InterruptStats};

use crate::domain::{Domain, DomainThread};
use crate::td::ThreadDescriptor;
use crate::util::locked::Locked;
use crate::{Error, Result};

use enum_map::{Enum, EnumMap};

use core::cell::Cell;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Host thread identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(u32);

impl From<u32> for Tid {
    fn from(raw: u32) -> Self {
        Tid(raw)
    }
}

impl From<Tid> for u32 {
    fn from(tid: Tid) -> u32 {
        tid.0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_TID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static CURRENT_TID: Cell<Option<Tid>> = Cell::new(None);
}

fn allocate_tid() -> Tid {
    Tid(NEXT_TID.fetch_add(1, Ordering::Relaxed))
}

fn adopt_tid(tid: Tid) {
    CURRENT_TID.with(|current| current.set(Some(tid)));
}

/// Identifier of the calling OS thread, assigned on first use.
pub fn current_tid() -> Tid {
    CURRENT_TID.with(|current| match current.get() {
        Some(tid) => tid,
        None => {
            let tid = allocate_tid();
            current.set(Some(tid));
            tid
        }
    })
}

/// Services the host provides to the domain and to orchestrators.
pub trait Host: Send + Sync {
    /// Spawn a domain thread running the blocking or non-blocking entry.
    fn create_thread(&self, blocking: bool) -> Result<ThreadHandle>;

    /// Wait for the most recently created thread to leave the domain.
    fn join_thread(&self) -> Result<()>;

    /// Best-effort interrupt of `tid`; ignored unless the target is
    /// interruptible when it next polls.
    fn send_interrupt(&self, tid: Tid) -> Result<()>;

    /// Sleep the calling thread.
    fn sleep_msec(&self, ms: u64);

    /// Identifier of the calling thread.
    fn current_thread_id(&self) -> Tid;
}

/// Host-side reference to a created domain thread.
#[derive(Clone, Debug)]
pub struct ThreadHandle {
    tid: Tid,
    td: Arc<ThreadDescriptor>,
    line: Arc<InterruptLine>,
}

impl ThreadHandle {
    /// Host identifier of the thread.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// The thread's descriptor, for read-only assertions.
    pub fn td(&self) -> &Arc<ThreadDescriptor> {
        &self.td
    }

    /// What became of interrupts sent to the thread.
    pub fn interrupts(&self) -> InterruptStats {
        self.line.stats()
    }
}

/// Which entry function a created thread runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
pub enum EntryKind {
    /// Entry for `create_thread(true)`.
    Blocking,
    /// Entry for `create_thread(false)`.
    Nonblocking,
}

impl From<bool> for EntryKind {
    fn from(blocking: bool) -> Self {
        if blocking {
            EntryKind::Blocking
        } else {
            EntryKind::Nonblocking
        }
    }
}

/// A domain entry function.
pub type Entry = Arc<dyn Fn(&mut DomainThread) + Send + Sync>;

struct HostInner {
    domain: Arc<Domain>,
    entries: Locked<EnumMap<EntryKind, Option<Entry>>>,
    lines: Locked<HashMap<Tid, Arc<InterruptLine>>>,
    joins: Locked<Vec<(Tid, JoinHandle<()>)>>,
}

/// Host simulated with OS threads.
#[derive(Clone)]
pub struct SimHost {
    inner: Arc<HostInner>,
}

impl SimHost {
    /// Host driving `domain`, with no entry points bound.
    pub fn new(domain: Arc<Domain>) -> Self {
        Self {
            inner: Arc::new(HostInner {
                domain,
                entries: Locked::new(EnumMap::default()),
                lines: Locked::new(HashMap::new()),
                joins: Locked::new(Vec::new()),
            }),
        }
    }

    /// The domain this host drives.
    pub fn domain(&self) -> &Arc<Domain> {
        &self.inner.domain
    }

    /// Bind the entry function run by threads of `kind`.
    pub fn bind(&self, kind: EntryKind, entry: impl Fn(&mut DomainThread) + Send + Sync + 'static) {
        self.inner.entries.lock()[kind] = Some(Arc::new(entry));
    }

    /// Run `entry` inside the domain on the calling thread.
    ///
    /// The calling thread occupies a thread slot and can be interrupted
    /// through `send_interrupt` while the entry runs.
    pub fn ecall<R>(&self, entry: impl FnOnce(&mut DomainThread) -> R) -> Result<R> {
        let slot = self.inner.domain.reserve_slot()?;
        let tid = current_tid();
        let handle = self.prepare(tid);
        let _unlisted = Unlist { host: self, tid };

        Ok(self.inner.domain.run(
            slot,
            tid,
            handle.td,
            handle.line,
            Arc::new(self.clone()),
            entry,
        ))
    }

    /// Number of created threads not yet joined.
    pub fn outstanding(&self) -> usize {
        self.inner.joins.lock().len()
    }

    fn prepare(&self, tid: Tid) -> ThreadHandle {
        let line = Arc::new(InterruptLine::new());
        self.inner.lines.lock().insert(tid, line.clone());
        ThreadHandle {
            tid,
            td: Arc::new(ThreadDescriptor::new()),
            line,
        }
    }
}

/// Stops interrupts reaching a thread once its ecall returns or unwinds.
struct Unlist<'a> {
    host: &'a SimHost,
    tid: Tid,
}

impl Drop for Unlist<'_> {
    fn drop(&mut self) {
        self.host.inner.lines.lock().remove(&self.tid);
    }
}

impl Host for SimHost {
    fn create_thread(&self, blocking: bool) -> Result<ThreadHandle> {
        let kind = EntryKind::from(blocking);
        let entry = self.inner.entries.lock()[kind]
            .clone()
            .ok_or(Error::NoEntryPoint)?;
        let slot = self.inner.domain.reserve_slot()?;
        let tid = allocate_tid();
        let handle = self.prepare(tid);

        let domain = self.inner.domain.clone();
        let host: Arc<dyn Host> = Arc::new(self.clone());
        let td = handle.td.clone();
        let line = handle.line.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("domain-{}", tid))
            .spawn(move || {
                adopt_tid(tid);
                domain.run(slot, tid, td, line, host, |thread| entry(thread));
            });

        match spawned {
            Ok(join) => {
                info!("created {:?} thread {}", kind, tid);
                self.inner.joins.lock().push((tid, join));
                Ok(handle)
            }
            Err(e) => {
                error!("spawning thread {}: {}", tid, e);
                self.inner.lines.lock().remove(&tid);
                Err(Error::ThreadCreation)
            }
        }
    }

    fn join_thread(&self) -> Result<()> {
        let (tid, join) = self.inner.joins.lock().pop().ok_or(Error::NoThreadToJoin)?;
        let joined = join.join();
        self.inner.lines.lock().remove(&tid);
        match joined {
            Ok(()) => {
                debug!("joined thread {}", tid);
                Ok(())
            }
            Err(_) => Err(Error::ThreadPanicked(tid)),
        }
    }

    fn send_interrupt(&self, tid: Tid) -> Result<()> {
        let line = self
            .inner
            .lines
            .lock()
            .get(&tid)
            .cloned()
            .ok_or(Error::NoSuchThread(tid))?;
        debug!("({}) sending interrupt to thread {}", current_tid(), tid);
        line.raise();
        Ok(())
    }

    fn sleep_msec(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    fn current_thread_id(&self) -> Tid {
        current_tid()
    }
}

impl fmt::Debug for SimHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimHost")
            .field("domain", &self.inner.domain)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Send interrupts to `tid` until `accepted` reports that one was taken.
///
/// Each attempt sends one interrupt and then waits `interval`. Returns the
/// number of attempts used, or `InterruptUndelivered` after `retries`.
pub fn interrupt_until(
    host: &dyn Host,
    tid: Tid,
    retries: u32,
    interval: Duration,
    accepted: impl Fn() -> bool,
) -> Result<u32> {
    for attempt in 1..=retries {
        info!("sending interrupt to thread {}...{}", tid, attempt);
        host.send_interrupt(tid)?;
        host.sleep_msec(interval.as_millis() as u64);
        if accepted() {
            return Ok(attempt);
        }
    }
    Err(Error::InterruptUndelivered {
        tid,
        attempts: retries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn tids_are_per_thread() {
        let mine = current_tid();
        assert_eq!(current_tid(), mine);
        let theirs = std::thread::spawn(current_tid).join().expect("join");
        assert_ne!(mine, theirs);
    }

    #[test]
    fn entry_kind_from_flag() {
        assert_eq!(EntryKind::from(true), EntryKind::Blocking);
        assert_eq!(EntryKind::from(false), EntryKind::Nonblocking);
    }

    #[test]
    fn create_without_entry_point() {
        let host = SimHost::new(Domain::new(Config::default()));
        assert_eq!(host.create_thread(false).map(|_| ()), Err(Error::NoEntryPoint));
        assert_eq!(host.join_thread(), Err(Error::NoThreadToJoin));
    }

    #[test]
    fn interrupt_unknown_thread() {
        let host = SimHost::new(Domain::new(Config::default()));
        let stranger = Tid::from(u32::MAX);
        assert_eq!(host.send_interrupt(stranger), Err(Error::NoSuchThread(stranger)));
    }
}

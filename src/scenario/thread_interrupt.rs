// SPDX-License-Identifier: Unlicense

//! Interrupt delivery to non-blocking and blocking threads.
//!
//! A non-blocking thread takes the first interrupt sent to it. A blocking
//! thread never does: every request is dropped, and the orchestrator gives
//! up after the configured number of retries and aborts.

use super::{await_ready, sleep, spin_until};

use crate::handler::{Disposition, ExceptionCode, ExceptionRecord};
use crate::handshake::{Code, HandshakeWord};
use crate::host::{interrupt_until, EntryKind, SimHost, Tid};
use crate::td::TdState;
use crate::{DomainThread, Error, Result};

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared between orchestrator, worker and handler.
#[derive(Debug, Default)]
pub struct InterruptShared {
    /// The handshake word.
    pub word: HandshakeWord,
    handler_entered: AtomicBool,
}

impl InterruptShared {
    fn new(host: &SimHost) -> Arc<Self> {
        Arc::new(Self {
            word: HandshakeWord::with_spin_limit(host.domain().config().spin_limit),
            handler_entered: AtomicBool::new(false),
        })
    }

    /// True once the interrupt handler has run.
    pub fn handler_entered(&self) -> bool {
        self.handler_entered.load(Ordering::Acquire)
    }
}

/// Interrupt a thread running non-blocking.
pub fn nonblocking(host: &SimHost) -> Result<()> {
    let shared = InterruptShared::new(host);
    let worker = shared.clone();
    host.bind(EntryKind::Nonblocking, move |thread| run_nonblocking(thread, &worker));
    host.ecall(|thread| orchestrate_nonblocking(thread, &shared))?
}

/// Try to interrupt a thread running blocking. Fatal once the retries are
/// used up, which is the expected outcome.
pub fn blocking(host: &SimHost) -> Result<()> {
    let shared = InterruptShared::new(host);
    let worker = shared.clone();
    host.bind(EntryKind::Blocking, move |thread| run_blocking(thread, &worker));
    host.ecall(|thread| orchestrate_blocking(thread, &shared))?
}

fn handler(
    thread: &mut DomainThread,
    record: &mut ExceptionRecord,
    shared: &InterruptShared,
) -> Disposition {
    shared.handler_entered.store(true, Ordering::Release);
    checkpoint_eq!(record.code, ExceptionCode::Unknown);

    let self_tid = thread.host_thread_id();
    checkpoint_eq!(self_tid, thread.tid());
    info!("(tid={}) thread is interrupted...", self_tid);

    let td = thread.td();
    checkpoint_eq!(td.state(), TdState::SecondLevelExceptionHandling);

    // the handler owns the state it leaves behind
    td.set_state(TdState::RunningNonblocking);
    shared.word.signal(Code::Handled);
    Disposition::ContinueExecution
}

fn install(thread: &mut DomainThread, shared: &Arc<InterruptShared>) {
    let for_handler = shared.clone();
    if let Err(e) = thread.add_exception_handler(false, move |thread, record| {
        handler(thread, record, &for_handler)
    }) {
        fatal!("registering handler: {}", e);
    }
}

fn run_nonblocking(thread: &mut DomainThread, shared: &Arc<InterruptShared>) {
    let self_tid = thread.host_thread_id();
    checkpoint_eq!(self_tid, thread.tid());
    info!("(tid={}) non-blocking thread is running...", self_tid);

    install(thread, shared);

    let td = thread.td().clone();
    checkpoint_eq!(td.state(), TdState::Entered);
    td.set_state(TdState::RunningNonblocking);
    if !announce(&shared.word, self_tid) {
        return;
    }
    let code = spin_until(thread, &shared.word, |code| {
        code == Code::Proceeding || code == Code::Complete
    });
    if code == Code::Complete {
        info!("(tid={}) released before the interrupt", self_tid);
        return;
    }

    checkpoint_eq!(td.state(), TdState::RunningNonblocking);
    checkpoint!(!td.is_interrupted());
    info!("(tid={}) non-blocking thread is exiting...", self_tid);
}

fn run_blocking(thread: &mut DomainThread, shared: &Arc<InterruptShared>) {
    let self_tid = thread.host_thread_id();
    checkpoint_eq!(self_tid, thread.tid());
    info!("(tid={}) blocking thread is running...", self_tid);

    install(thread, shared);

    let td = thread.td().clone();
    checkpoint_eq!(td.state(), TdState::Entered);
    td.set_state(TdState::RunningBlocking);
    if !announce(&shared.word, self_tid) {
        return;
    }
    spin_until(thread, &shared.word, |code| code != Code::Ready);

    info!("(tid={}) blocking thread is exiting...", self_tid);
}

/// Move the word to `Ready`, unless the orchestrator has already gone.
fn announce(word: &HandshakeWord, tid: Tid) -> bool {
    let announced = word.advance(Code::Idle, Code::Ready);
    if !announced {
        info!("(tid={}) orchestrator left before the worker was ready", tid);
    }
    announced
}

fn orchestrate_nonblocking(thread: &mut DomainThread, shared: &InterruptShared) -> Result<()> {
    let config = thread.domain().config().clone();
    let tid = thread.host_thread_id();

    info!("(tid={}) Create a non-blocking thread...", tid);
    shared.word.reset();
    let worker = thread.ocall(|host| host.host().create_thread(false))?;
    let _release = Release(&shared.word);

    await_ready(&shared.word, &config)?;
    sleep(thread, config.grace_delay);

    info!("(tid={}) Sending interrupt to (tid={})...", tid, worker.tid());
    thread.ocall(|host| host.host().send_interrupt(worker.tid()))?;

    shared.word.wait_for(Code::Handled, config.handshake_timeout)?;
    checkpoint_eq!(worker.td().state(), TdState::RunningNonblocking);
    shared.word.signal(Code::Proceeding);

    thread.ocall(|host| host.host().join_thread())?;
    checkpoint_eq!(worker.td().state(), TdState::Exited);
    checkpoint_eq!(worker.interrupts().accepted, 1);
    Ok(())
}

/// Lets the worker go however the orchestrator leaves. A worker still
/// waiting in `Ready` stops spinning; one not yet started never announces.
struct Release<'a>(&'a HandshakeWord);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.signal(Code::Complete);
    }
}

fn orchestrate_blocking(thread: &mut DomainThread, shared: &InterruptShared) -> Result<()> {
    let config = thread.domain().config().clone();
    let tid = thread.host_thread_id();

    info!("(tid={}) Create a blocking thread...", tid);
    shared.word.reset();
    let worker = thread.ocall(|host| host.host().create_thread(true))?;
    let _release = Release(&shared.word);

    await_ready(&shared.word, &config)?;
    sleep(thread, config.grace_delay);

    let delivered = thread.ocall(|host| {
        interrupt_until(
            host.host(),
            worker.tid(),
            config.interrupt_retries,
            config.retry_interval,
            || shared.handler_entered(),
        )
    });
    match delivered {
        Ok(attempts) => info!("(tid={}) handler entered after {} attempts", tid, attempts),
        Err(e @ Error::InterruptUndelivered { .. }) => fatal!("{}, aborting", e),
        Err(e) => return Err(e),
    }

    thread.ocall(|host| host.host().join_thread())
}

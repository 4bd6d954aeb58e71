// SPDX-License-Identifier: Unlicense

//! Descriptor state across interrupts, nested faults and out-calls.
//!
//! The worker makes itself interruptible and is interrupted inside the
//! domain. Its handler drops to blocking, has `cpuid` emulated and takes a
//! divide fault, which nests a second handling frame on top of the
//! interrupt. After that the worker makes a blocking out-call; the host
//! side announces it is out and is released by a second interrupt, which
//! therefore never enters the domain.

use super::{await_ready, sleep, spin_until};

use crate::archs::arch::IDIV_R32_LEN;
use crate::handler::{Disposition, ExceptionCode, ExceptionRecord};
use crate::handshake::{Code, HandshakeWord};
use crate::host::{EntryKind, SimHost};
use crate::td::TdState;
use crate::{DomainThread, Result};

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const F32_LOADED: f32 = 0.31;
const F64_LOADED: f64 = 0.32;

/// Shared between orchestrator, worker and handler.
#[derive(Debug, Default)]
pub struct TdStateShared {
    /// The handshake word.
    pub word: HandshakeWord,
    handler_done: AtomicBool,
}

/// Run the scenario on `host`.
pub fn run(host: &SimHost) -> Result<()> {
    let shared = Arc::new(TdStateShared {
        word: HandshakeWord::with_spin_limit(host.domain().config().spin_limit),
        handler_done: AtomicBool::new(false),
    });
    let worker = shared.clone();
    host.bind(EntryKind::Nonblocking, move |thread| run_thread(thread, &worker));
    host.ecall(|thread| orchestrate(thread, &shared))?
}

/// Load the two float lanes, divide by zero and report whether the lanes
/// survived the fault.
pub fn divide_by_zero(thread: &mut DomainThread) -> bool {
    thread.fpu_mut().set_f32(0, F32_LOADED);
    thread.fpu_mut().set_f64(1, F64_LOADED);

    thread.idiv32(1, 0);

    let f = thread.fpu().f32(0) as f64;
    let d = thread.fpu().f64(1);
    !(f < 0.309 || f > 0.321 || d < 0.319 || d > 0.321)
}

fn handler(
    thread: &mut DomainThread,
    record: &mut ExceptionRecord,
    shared: &TdStateShared,
) -> Disposition {
    let td = thread.td().clone();

    match record.code {
        ExceptionCode::Unknown => {
            if shared.handler_done.load(Ordering::Acquire) {
                error!("unexpected interrupt");
                return Disposition::AbortExecution;
            }

            checkpoint_eq!(td.state(), TdState::SecondLevelExceptionHandling);
            checkpoint!(td.is_interrupted());

            let self_tid = thread.host_thread_id();
            checkpoint_eq!(self_tid, thread.tid());
            info!("(tid={}) thread is interrupted...", self_tid);

            // out-calls leave handling alone
            checkpoint_eq!(td.state(), TdState::SecondLevelExceptionHandling);

            td.set_state(TdState::RunningBlocking);
            thread.cpuid(1, 0);
            checkpoint_eq!(td.state(), TdState::RunningBlocking);
            checkpoint!(td.is_interrupted());

            checkpoint!(divide_by_zero(thread));

            // back in the interrupt's frame
            checkpoint_eq!(td.state(), TdState::SecondLevelExceptionHandling);
            checkpoint!(td.is_interrupted());

            shared.word.signal(Code::Handled);
            shared.handler_done.store(true, Ordering::Release);
            Disposition::ContinueExecution
        }
        ExceptionCode::DivideByZero => {
            checkpoint_eq!(td.state(), TdState::SecondLevelExceptionHandling);
            checkpoint!(!td.is_interrupted());
            checkpoint_eq!(thread.host_thread_id(), thread.tid());

            record.context.rip += IDIV_R32_LEN;
            Disposition::ContinueExecution
        }
        _ => Disposition::AbortExecution,
    }
}

fn run_thread(thread: &mut DomainThread, shared: &Arc<TdStateShared>) {
    let td = thread.td().clone();
    checkpoint_eq!(td.state(), TdState::Entered);
    checkpoint!(!td.is_interrupted());

    td.set_state(TdState::RunningBlocking);
    let self_tid = thread.host_thread_id();
    // re-entry after the out-call
    checkpoint_eq!(td.state(), TdState::Entered);
    checkpoint_eq!(self_tid, thread.tid());
    info!("(tid={}) thread is running...", self_tid);

    let for_handler = shared.clone();
    if let Err(e) = thread.add_exception_handler(false, move |thread, record| {
        handler(thread, record, &for_handler)
    }) {
        fatal!("registering handler: {}", e);
    }

    td.set_state(TdState::RunningNonblocking);
    shared.word.signal(Code::Ready);
    spin_until(thread, &shared.word, |code| code != Code::Ready);

    checkpoint_eq!(td.state(), TdState::RunningNonblocking);
    checkpoint!(!td.is_interrupted());
    info!("(tid={}) interrupt is handled...", self_tid);

    shared.word.signal(Code::Proceeding);
    thread.ocall(|host| {
        shared.word.signal(Code::Exited);
        host.wait_interrupt();
        info!("(tid={}) released on the host", host.tid());
        shared.word.signal(Code::Complete);
    });
    spin_until(thread, &shared.word, |code| code == Code::Complete);

    checkpoint_eq!(td.state(), TdState::Entered);

    td.set_state(TdState::RunningBlocking);
    thread.cpuid(1, 0);
    checkpoint_eq!(td.state(), TdState::RunningBlocking);

    checkpoint!(divide_by_zero(thread));
    checkpoint_eq!(td.state(), TdState::RunningBlocking);

    info!("(tid={}) thread is exiting...", self_tid);
}

fn orchestrate(thread: &mut DomainThread, shared: &TdStateShared) -> Result<()> {
    let config = thread.domain().config().clone();
    let tid = thread.host_thread_id();

    info!("(tid={}) Create a thread...", tid);
    shared.word.reset();
    let worker = thread.ocall(|host| host.host().create_thread(false))?;

    await_ready(&shared.word, &config)?;
    sleep(thread, config.grace_delay);

    info!(
        "(tid={}) Sending interrupt to (tid={}) inside the domain...",
        tid,
        worker.tid()
    );
    thread.ocall(|host| host.host().send_interrupt(worker.tid()))?;

    shared.word.wait_for(Code::Exited, config.handshake_timeout)?;
    // running in the host context
    checkpoint_eq!(worker.td().state(), TdState::Exited);
    sleep(thread, config.grace_delay);

    info!(
        "(tid={}) Sending interrupt to (tid={}) on the host...",
        tid,
        worker.tid()
    );
    thread.ocall(|host| host.host().send_interrupt(worker.tid()))?;

    thread.ocall(|host| host.host().join_thread())?;

    checkpoint_eq!(worker.td().state(), TdState::Exited);
    checkpoint!(worker.td().is_retired());
    let interrupts = worker.interrupts();
    checkpoint_eq!(interrupts.accepted, 1);
    checkpoint_eq!(interrupts.consumed_by_host, 1);
    Ok(())
}

// SPDX-License-Identifier: Unlicense

//! First-level exception handling.
//!
//! Every trap enters here. Emulatable instructions are resolved in place
//! without touching the descriptor. Anything else forces second-level
//! handling: a frame is pushed on the descriptor, the interrupted register
//! context is moved into the exception record, the handlers run on a fresh
//! handler frame, and continuation reloads whatever context the record
//! holds when they are done.

use super::DomainThread;

use crate::archs::arch::CPUID_LEN;
use crate::archs::{ExceptionContext, Fault, Instruction};
use crate::handler::{Disposition, ExceptionCode, ExceptionRecord, ExceptionSource};

use core::mem;

/// Synchronous fault raised by the instruction at `rip`.
pub(super) fn fault(thread: &mut DomainThread, fault: Fault) {
    if fault.instruction == Instruction::Cpuid && emulate_cpuid(thread) {
        return;
    }
    second_level(thread, fault.code, ExceptionSource::Hardware);
}

/// Interrupt accepted at a safe point.
pub(super) fn interrupt(thread: &mut DomainThread) {
    let rip = thread.context.rip;
    second_level(thread, ExceptionCode::Unknown, ExceptionSource::Interrupt);
    if thread.context.rip != rip {
        fatal!(
            "interrupt taken at {:#x} resumed at {:#x}",
            rip,
            thread.context.rip
        );
    }
}

fn emulate_cpuid(thread: &mut DomainThread) -> bool {
    let leaf = thread.context.rax as u32;
    let subleaf = thread.context.rcx as u32;

    match thread.domain.cpuid().lookup(leaf, subleaf) {
        Some([eax, ebx, ecx, edx]) => {
            let context = &mut thread.context;
            context.rax = eax as u64;
            context.rbx = ebx as u64;
            context.rcx = ecx as u64;
            context.rdx = edx as u64;
            context.rip += CPUID_LEN;
            trace!("emulated cpuid {:#x}.{}", leaf, subleaf);
            true
        }
        None => {
            debug!("cpuid {:#x}.{} not emulated", leaf, subleaf);
            false
        }
    }
}

fn second_level(thread: &mut DomainThread, code: ExceptionCode, source: ExceptionSource) {
    let depth = thread
        .td
        .push_frame(source == ExceptionSource::Interrupt);
    let saved = mem::replace(&mut thread.context, ExceptionContext::handler_frame(depth));
    let mut record = ExceptionRecord::new(code, source, saved);

    debug!(
        "thread {}: {:?} ({:?}) at {:#x}, depth {}",
        thread.tid, record.code, record.source, record.address, depth
    );

    let domain = thread.domain.clone();
    match domain.handlers().dispatch(thread, &mut record) {
        Disposition::ContinueExecution => {
            thread.td.pop_frame();
            thread.context = record.context;
        }
        disposition => fatal!(
            "thread {}: {:?} at {:#x}: {:?}",
            thread.tid,
            record.code,
            record.address,
            disposition
        ),
    }
}

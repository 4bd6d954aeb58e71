// SPDX-License-Identifier: Unlicense

//! The isolated execution domain and the threads running inside it.
//!
//! A [`Domain`] owns what all of its threads share: the vectored handler
//! table, the CPUID cache and the thread control slots. A [`DomainThread`]
//! is the view of the domain a single thread has while it runs its entry
//! function: its descriptor, its live register context and the means to
//! call out to the host.
//!
//! Everything a domain thread does that could trap goes through
//! `execute`, which runs one simulated instruction and hands faults to the
//! first-level entry in [`trampoline`]. Interrupts raised by the host are
//! taken at safe points: before every instruction and at every
//! [`DomainThread::pause`].

mod trampoline;

use crate::archs::arch::{Arch, ENTRY_TEXT_BASE};
use crate::archs::{ArchTrait, CpuidTable, ExceptionContext, Instruction};
use crate::archs::x86_64::FpuState;
use crate::config::Config;
use crate::handler::{Disposition, ExceptionRecord, HandlerId, VectoredHandlers};
use crate::host::{Host, InterruptLine, InterruptStats, Tid};
use crate::td::{TdState, ThreadDescriptor};
use crate::util::backoff::Backoff;
use crate::util::locked::Locked;
use crate::{Error, Result};

use core::fmt;
use core::hint::spin_loop;
use std::sync::Arc;

/// Shared state of one domain instance.
#[derive(Debug)]
pub struct Domain {
    config: Config,
    handlers: VectoredHandlers,
    cpuid: CpuidTable,
    slots: Locked<Vec<bool>>,
}

impl Domain {
    /// Create a domain, capturing the host's CPUID leaves.
    pub fn new(config: Config) -> Arc<Self> {
        Self::with_cpuid(config, Arch::capture_cpuid())
    }

    /// Create a domain that emulates `cpuid` from `cpuid`.
    pub fn with_cpuid(config: Config, cpuid: CpuidTable) -> Arc<Self> {
        info!(
            "domain: {} thread slots, {} cpuid leaves",
            config.thread_slots,
            cpuid.len()
        );
        Arc::new(Self {
            handlers: VectoredHandlers::new(config.max_handlers),
            slots: Locked::new(vec![false; config.thread_slots]),
            cpuid,
            config,
        })
    }

    /// Configuration the domain was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The vectored handler table.
    pub fn handlers(&self) -> &VectoredHandlers {
        &self.handlers
    }

    /// Leaves available to `cpuid` emulation.
    pub fn cpuid(&self) -> &CpuidTable {
        &self.cpuid
    }

    /// Thread slots not occupied by a running thread.
    pub fn free_slots(&self) -> usize {
        self.slots.lock().iter().filter(|busy| !**busy).count()
    }

    pub(crate) fn reserve_slot(self: &Arc<Self>) -> Result<SlotGuard> {
        let mut slots = self.slots.lock();
        let index = slots
            .iter()
            .position(|busy| !*busy)
            .ok_or(Error::OutOfThreadSlots)?;
        slots[index] = true;
        Ok(SlotGuard {
            domain: self.clone(),
            index,
        })
    }

    /// Dispatch a thread into the domain and run `entry` to completion.
    ///
    /// The descriptor is retired when the entry returns or unwinds; the
    /// slot is released after that.
    pub(crate) fn run<R>(
        self: &Arc<Self>,
        slot: SlotGuard,
        tid: Tid,
        td: Arc<ThreadDescriptor>,
        line: Arc<InterruptLine>,
        host: Arc<dyn Host>,
        entry: impl FnOnce(&mut DomainThread) -> R,
    ) -> R {
        let _retire = Retire(td.clone());
        let mut thread = DomainThread {
            tid,
            slot: slot.index,
            td,
            context: ExceptionContext::at(ENTRY_TEXT_BASE),
            domain: self.clone(),
            line,
            host,
        };
        debug!("thread {} entered in slot {}", tid, slot.index);
        entry(&mut thread)
    }
}

/// Occupied thread slot; released on drop.
#[derive(Debug)]
pub(crate) struct SlotGuard {
    domain: Arc<Domain>,
    index: usize,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.domain.slots.lock()[self.index] = false;
    }
}

struct Retire(Arc<ThreadDescriptor>);

impl Drop for Retire {
    fn drop(&mut self) {
        self.0.retire();
    }
}

/// A thread executing inside the domain.
pub struct DomainThread {
    tid: Tid,
    slot: usize,
    td: Arc<ThreadDescriptor>,
    context: ExceptionContext,
    domain: Arc<Domain>,
    line: Arc<InterruptLine>,
    host: Arc<dyn Host>,
}

impl DomainThread {
    /// Host identifier of this thread, as known when it was dispatched.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// The calling thread's own descriptor.
    pub fn td(&self) -> &Arc<ThreadDescriptor> {
        &self.td
    }

    /// The domain the thread runs in.
    pub fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    /// What became of interrupts sent to this thread so far.
    pub fn interrupts(&self) -> InterruptStats {
        self.line.stats()
    }

    /// Live register context.
    pub fn context(&self) -> &ExceptionContext {
        &self.context
    }

    /// Live register context, for direct register loads.
    pub fn context_mut(&mut self) -> &mut ExceptionContext {
        &mut self.context
    }

    /// Live extended register state.
    pub fn fpu(&self) -> &FpuState {
        &self.context.fpu
    }

    /// Live extended register state, for loads.
    pub fn fpu_mut(&mut self) -> &mut FpuState {
        &mut self.context.fpu
    }

    /// Register `handler` ahead of every handler registered so far.
    pub fn register_exception_handler(
        &self,
        handler: impl Fn(&mut DomainThread, &mut ExceptionRecord) -> Disposition
            + Send
            + Sync
            + 'static,
    ) -> Result<HandlerId> {
        self.domain.handlers.register(Arc::new(handler))
    }

    /// Register `handler` at the front (`first`) or the back of the table.
    pub fn add_exception_handler(
        &self,
        first: bool,
        handler: impl Fn(&mut DomainThread, &mut ExceptionRecord) -> Disposition
            + Send
            + Sync
            + 'static,
    ) -> Result<HandlerId> {
        self.domain.handlers.add(first, Arc::new(handler))
    }

    /// Unregister a handler.
    pub fn remove_exception_handler(&self, id: HandlerId) -> Result<()> {
        self.domain.handlers.remove(id)
    }

    /// Synchronous call out to the host.
    ///
    /// Outside second-level handling this is a full exit and re-entry: the
    /// descriptor reads `Exited` while `call` runs and `Entered` after it
    /// returns. From second-level handling the state is left alone.
    /// Interrupts raised while the thread is out are taken by the host.
    pub fn ocall<R>(&mut self, call: impl FnOnce(&OcallFrame) -> R) -> R {
        let handling = self.td.state() == TdState::SecondLevelExceptionHandling;
        if !handling {
            self.td.exit();
        }

        let result = call(&OcallFrame {
            host: &*self.host,
            tid: self.tid,
            line: &self.line,
            spin_limit: self.domain.config.spin_limit,
        });

        if self.line.take() {
            debug!("thread {}: interrupt taken by the host during out-call", self.tid);
            self.line.note_consumed_by_host();
        }
        if !handling {
            self.td.enter();
        }
        result
    }

    /// Ask the host which thread this is.
    pub fn host_thread_id(&mut self) -> Tid {
        self.ocall(|host| host.current_thread_id())
    }

    /// Spin hint; a safe point for interrupts.
    pub fn pause(&mut self) {
        self.poll_interrupt();
        spin_loop();
    }

    /// `idiv edi` with `edx:eax` sign-extended from `dividend`. Returns
    /// `eax`, which still holds the dividend if a handler skipped the fault.
    pub fn idiv32(&mut self, dividend: i32, divisor: i32) -> i32 {
        self.context.rax = dividend as u32 as u64;
        self.context.rdx = if dividend < 0 { u32::MAX as u64 } else { 0 };
        self.context.rdi = divisor as u32 as u64;
        self.execute(Instruction::Idiv32);
        self.context.rax as u32 as i32
    }

    /// `idiv rdi` with `rdx:rax` sign-extended from `dividend`.
    pub fn idiv64(&mut self, dividend: i64, divisor: i64) -> i64 {
        self.context.rax = dividend as u64;
        self.context.rdx = if dividend < 0 { u64::MAX } else { 0 };
        self.context.rdi = divisor as u64;
        self.execute(Instruction::Idiv64);
        self.context.rax as i64
    }

    /// `cpuid`, which always traps and is emulated by the first-level entry.
    /// Returns `[eax, ebx, ecx, edx]`.
    pub fn cpuid(&mut self, leaf: u32, subleaf: u32) -> [u32; 4] {
        self.context.rax = leaf as u64;
        self.context.rcx = subleaf as u64;
        self.execute(Instruction::Cpuid);
        [
            self.context.rax as u32,
            self.context.rbx as u32,
            self.context.rcx as u32,
            self.context.rdx as u32,
        ]
    }

    /// `ud2`.
    pub fn ud2(&mut self) {
        self.execute(Instruction::Ud2);
    }

    /// `int3`.
    pub fn int3(&mut self) {
        self.execute(Instruction::Int3);
    }

    fn poll_interrupt(&mut self) {
        if !self.line.take() {
            return;
        }
        if self.td.state().is_interruptible() {
            self.line.note_accepted();
            trampoline::interrupt(self);
        } else {
            debug!(
                "thread {}: interrupt dropped in {}",
                self.tid,
                self.td.state()
            );
            self.line.note_dropped();
        }
    }

    /// Run one instruction at the current `rip`.
    ///
    /// A handler that continues must leave `rip` either past the
    /// instruction or on it, in which case it executes again.
    fn execute(&mut self, instruction: Instruction) {
        self.poll_interrupt();

        let start = self.context.rip;
        let end = start + Arch::instruction_len(instruction);
        let mut refaults = 0;

        loop {
            match Arch::step(&mut self.context, instruction) {
                Ok(()) => {
                    self.context.rip = end;
                    return;
                }
                Err(fault) => {
                    trampoline::fault(self, fault);
                    let rip = self.context.rip;
                    if rip == end {
                        return;
                    }
                    if rip != start {
                        fatal!(
                            "{:?} resumed at {:#x}, expected {:#x} or {:#x}",
                            fault.code,
                            rip,
                            start,
                            end
                        );
                    }
                    refaults += 1;
                    if refaults > self.domain.config.max_refaults {
                        fatal!(
                            "{:?} at {:#x} re-faulted {} times",
                            fault.code,
                            start,
                            refaults
                        );
                    }
                    trace!("re-executing {:?} at {:#x}", instruction, start);
                }
            }
        }
    }
}

impl fmt::Debug for DomainThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainThread")
            .field("tid", &self.tid)
            .field("slot", &self.slot)
            .field("td", &self.td)
            .field("rip", &format_args!("{:#x}", self.context.rip))
            .finish()
    }
}

/// What the host side of an out-call can see and do.
pub struct OcallFrame<'a> {
    host: &'a dyn Host,
    tid: Tid,
    line: &'a InterruptLine,
    spin_limit: u32,
}

impl<'a> OcallFrame<'a> {
    /// The host.
    pub fn host(&self) -> &'a dyn Host {
        self.host
    }

    /// The calling domain thread.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Identifier of the thread running the call.
    pub fn current_thread_id(&self) -> Tid {
        self.host.current_thread_id()
    }

    /// Take an interrupt raised for the calling thread, if any.
    pub fn take_interrupt(&self) -> bool {
        let taken = self.line.take();
        if taken {
            self.line.note_consumed_by_host();
        }
        taken
    }

    /// Spin until an interrupt is raised for the calling thread.
    pub fn wait_interrupt(&self) {
        let mut backoff = Backoff::new(self.spin_limit);
        while !self.take_interrupt() {
            backoff.snooze();
        }
    }
}

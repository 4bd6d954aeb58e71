// SPDX-License-Identifier: Unlicense

//! Unifies the CPU-architecture specific code of the simulated processor.
//!
//! The first-level entry only needs three facts from an architecture: how
//! long an instruction is, what executing it does to the register context,
//! and which CPUID leaves can be emulated. Fault-skipping arithmetic in
//! vectored handlers is tied to the encodings published here.
//!
//! The architecture for the build is usable at archs::arch

use crate::handler::ExceptionCode;

/// Simulated Intel/AMD 64-bit processor.
pub mod x86_64;

pub use self::x86_64 as arch;

pub use arch::{CpuidTable, ExceptionContext, Instruction};

/// A synchronous fault raised by executing an instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    /// Exception class of the fault.
    pub code: ExceptionCode,
    /// The instruction that faulted.
    pub instruction: Instruction,
}

/// Each architecture must supply the following entry points.
pub trait ArchTrait {
    /// Encoded length of `instruction` in bytes.
    fn instruction_len(instruction: Instruction) -> u64;

    /// Execute `instruction` against `context`, leaving the instruction
    /// pointer alone, or report the fault it raises.
    fn step(context: &mut ExceptionContext, instruction: Instruction) -> Result<(), Fault>;

    /// Read the CPUID leaves the domain may emulate.
    fn capture_cpuid() -> CpuidTable;
}

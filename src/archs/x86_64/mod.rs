// SPDX-License-Identifier: Unlicense

//! Simulated x86-64 execution inside the domain.
//!
//! Only the handful of instructions the exception machinery cares about
//! are modelled. `cpuid` is illegal inside the domain and must be emulated
//! by the runtime; `idiv` raises #DE on a zero divisor or on quotient
//! overflow; `ud2` and `int3` always trap.

mod context;
mod cpuid;

pub use context::{ExceptionContext, FpuState};
pub use cpuid::{CpuidTable, CPUID_LEAVES};

use super::{ArchTrait, Fault};
use crate::handler::ExceptionCode;

/// `idiv edi` encodes as `F7 FF`.
///
/// A handler skipping a divide fault must add exactly this to the saved
/// instruction pointer. The length is a property of the fault-injection
/// instruction chosen here, not a general rule: the 64-bit form needs a
/// REX prefix and is one byte longer.
pub const IDIV_R32_LEN: u64 = 2;

/// `idiv rdi` encodes as `48 F7 FF`.
pub const IDIV_R64_LEN: u64 = 3;

/// `cpuid` encodes as `0F A2`.
pub const CPUID_LEN: u64 = 2;

/// `ud2` encodes as `0F 0B`.
pub const UD2_LEN: u64 = 2;

/// `int3` encodes as `CC`.
pub const INT3_LEN: u64 = 1;

/// First instruction of a thread's entry function.
pub const ENTRY_TEXT_BASE: u64 = 0x0010_0000;

/// First instruction of the second-level entry. Each nesting level runs on
/// its own frame above this.
pub const HANDLER_TEXT_BASE: u64 = 0x0020_0000;

/// Spacing of handler frames per nesting level.
pub const HANDLER_FRAME_STRIDE: u64 = 0x1000;

/// Top of the simulated thread stack.
pub const STACK_TOP: u64 = 0x7fff_0000;

/// Instructions the simulated processor executes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// Signed divide of `edx:eax` by `edi`.
    Idiv32,
    /// Signed divide of `rdx:rax` by `rdi`.
    Idiv64,
    /// Processor identification for leaf `eax`, subleaf `ecx`.
    Cpuid,
    /// Guaranteed undefined opcode.
    Ud2,
    /// Breakpoint trap.
    Int3,
}

/// Materialise empty struct implementing Arch trait.
pub struct Arch {}

impl ArchTrait for Arch {
    fn instruction_len(instruction: Instruction) -> u64 {
        match instruction {
            Instruction::Idiv32 => IDIV_R32_LEN,
            Instruction::Idiv64 => IDIV_R64_LEN,
            Instruction::Cpuid => CPUID_LEN,
            Instruction::Ud2 => UD2_LEN,
            Instruction::Int3 => INT3_LEN,
        }
    }

    fn step(context: &mut ExceptionContext, instruction: Instruction) -> Result<(), Fault> {
        let fault = |code| Fault { code, instruction };

        match instruction {
            Instruction::Idiv32 => {
                let high = (context.rdx as u32 as u64) << 32;
                let dividend = (high | context.rax as u32 as u64) as i64;
                let divisor = context.rdi as u32 as i32 as i64;
                let quotient = match dividend.checked_div(divisor) {
                    Some(q) if q >= i32::MIN as i64 && q <= i32::MAX as i64 => q,
                    _ => return Err(fault(ExceptionCode::DivideByZero)),
                };
                // 32-bit writes zero-extend
                context.rax = quotient as i32 as u32 as u64;
                context.rdx = (dividend % divisor) as i32 as u32 as u64;
                Ok(())
            }
            Instruction::Idiv64 => {
                let dividend = (((context.rdx as u128) << 64) | context.rax as u128) as i128;
                let divisor = context.rdi as i64 as i128;
                let quotient = match dividend.checked_div(divisor) {
                    Some(q) if q >= i64::MIN as i128 && q <= i64::MAX as i128 => q,
                    _ => return Err(fault(ExceptionCode::DivideByZero)),
                };
                context.rax = quotient as i64 as u64;
                context.rdx = (dividend % divisor) as i64 as u64;
                Ok(())
            }
            Instruction::Cpuid | Instruction::Ud2 => Err(fault(ExceptionCode::IllegalInstruction)),
            Instruction::Int3 => Err(fault(ExceptionCode::Breakpoint)),
        }
    }

    fn capture_cpuid() -> CpuidTable {
        CpuidTable::capture()
    }
}

// SPDX-License-Identifier: Unlicense

//! Register context saved on entry to exception handling.

use super::{HANDLER_FRAME_STRIDE, HANDLER_TEXT_BASE, STACK_TOP};

/// MXCSR after reset: all exceptions masked, round to nearest.
const MXCSR_DEFAULT: u32 = 0x1f80;

/// Extended (SSE) register state.
#[derive(Clone, Debug, PartialEq)]
pub struct FpuState {
    /// The sixteen 128-bit vector registers.
    pub xmm: [u128; 16],
    /// SSE control and status.
    pub mxcsr: u32,
}

impl Default for FpuState {
    fn default() -> Self {
        Self {
            xmm: [0; 16],
            mxcsr: MXCSR_DEFAULT,
        }
    }
}

impl FpuState {
    /// Scalar single held in the low lane of `xmm[reg]`.
    pub fn f32(&self, reg: usize) -> f32 {
        f32::from_bits(self.xmm[reg] as u32)
    }

    /// Load a scalar single into `xmm[reg]`, clearing the upper lanes.
    pub fn set_f32(&mut self, reg: usize, value: f32) {
        self.xmm[reg] = value.to_bits() as u128;
    }

    /// Scalar double held in the low lane of `xmm[reg]`.
    pub fn f64(&self, reg: usize) -> f64 {
        f64::from_bits(self.xmm[reg] as u64)
    }

    /// Load a scalar double into `xmm[reg]`, clearing the upper lane.
    pub fn set_f64(&mut self, reg: usize, value: f64) {
        self.xmm[reg] = value.to_bits() as u128;
    }
}

/// The exception context as it is captured on trap entry.
#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionContext {
    /// Accumulator; `cpuid` leaf, `idiv` low dividend and quotient.
    pub rax: u64,
    /// `cpuid` output.
    pub rbx: u64,
    /// `cpuid` subleaf and output.
    pub rcx: u64,
    /// High dividend and remainder of `idiv`; `cpuid` output.
    pub rdx: u64,
    /// Source index.
    pub rsi: u64,
    /// Divisor of `idiv`.
    pub rdi: u64,
    /// Frame pointer.
    pub rbp: u64,
    /// Stack pointer.
    pub rsp: u64,
    /// Instruction pointer. Resuming loads execution from here.
    pub rip: u64,
    /// Flags.
    pub rflags: u64,
    /// Extended register state.
    pub fpu: FpuState,
}

impl ExceptionContext {
    /// Fresh context about to execute at `rip`.
    pub fn at(rip: u64) -> Self {
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: STACK_TOP,
            rsp: STACK_TOP,
            rip,
            rflags: 0x202,
            fpu: FpuState::default(),
        }
    }

    /// The register file a second-level handler at nesting `depth` starts
    /// with. Nothing of the interrupted context leaks into it.
    pub fn handler_frame(depth: usize) -> Self {
        let offset = HANDLER_FRAME_STRIDE * depth as u64;
        let mut context = Self::at(HANDLER_TEXT_BASE + offset);
        context.rsp = STACK_TOP - 0x10_0000 - offset;
        context.rbp = context.rsp;
        context
    }
}

// SPDX-License-Identifier: Unlicense

//! Thread execution-state machine for an isolated execution domain.
//!
//! An untrusted host drives threads that run inside a protected domain. Each
//! domain thread carries a [`td::ThreadDescriptor`] whose state moves between
//! entry, blocking and non-blocking execution, second-level exception handling
//! and exit. Hardware faults and host-delivered interrupts trap into a fixed
//! first-level entry which forces the handling state and dispatches to the
//! vectored handlers registered in the domain. Host and domain rendezvous
//! through [`handshake::HandshakeWord`]s.
//!
//! The host side and the CPU are simulated (`host::SimHost`,
//! `archs::x86_64`), so the whole protocol runs on an ordinary OS.

#![warn(missing_docs)]

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate claim;

#[macro_use]
pub mod panic;

pub mod archs;
pub mod config;
pub mod debug;
pub mod domain;
pub mod handler;
pub mod handshake;
pub mod host;
pub mod scenario;
pub mod td;
pub mod util;

pub use config::Config;
pub use domain::{Domain, DomainThread};
pub use handler::{Disposition, ExceptionCode, ExceptionRecord};
pub use handshake::{Code, HandshakeWord};
pub use host::{Host, SimHost, ThreadHandle, Tid};
pub use td::{TdState, ThreadDescriptor};
pub use util::result::{Error, Result};

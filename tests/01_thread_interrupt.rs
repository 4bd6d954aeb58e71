// SPDX-License-Identifier: Unlicense

#[macro_use]
extern crate claim;

mod common;

use libtdstate::archs::arch::IDIV_R64_LEN;
use libtdstate::host::{current_tid, interrupt_until, InterruptStats};
use libtdstate::scenario::thread_interrupt;
use libtdstate::{Disposition, Error, ExceptionCode, Host, TdState};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use test_macros::domain_test;

#[domain_test]
fn interrupt_nonblocking_scenario() {
    assert_ok!(thread_interrupt::nonblocking(&common::host()));
}

#[domain_test]
#[should_panic(expected = "unable to interrupt thread")]
fn interrupt_blocking_scenario_gives_up() {
    let _ = thread_interrupt::blocking(&common::host());
}

#[domain_test]
fn interrupt_with_nested_fault() {
    let host = common::host();
    let sender = host.clone();
    host.ecall(move |domain_thread| {
        let done = Arc::new(AtomicBool::new(false));
        let seen = done.clone();
        domain_thread
            .register_exception_handler(move |thread, record| {
                let td = thread.td().clone();
                match record.code {
                    ExceptionCode::Unknown => {
                        assert!(record.is_interrupt());
                        assert!(td.is_interrupted());
                        td.set_state(TdState::RunningBlocking);

                        thread.idiv64(1, 0);
                        assert_eq!(td.state(), TdState::SecondLevelExceptionHandling);
                        assert!(td.is_interrupted());
                        assert_eq!(td.handling_depth(), 1);

                        seen.store(true, Ordering::Release);
                        Disposition::ContinueExecution
                    }
                    ExceptionCode::DivideByZero => {
                        assert_eq!(td.handling_depth(), 2);
                        assert!(!td.is_interrupted());
                        record.context.rip += IDIV_R64_LEN;
                        Disposition::ContinueExecution
                    }
                    _ => Disposition::ContinueSearch,
                }
            })
            .expect("register");

        let td = domain_thread.td().clone();
        td.set_state(TdState::RunningNonblocking);
        let tid = domain_thread.tid();
        let interrupter = thread::spawn(move || sender.send_interrupt(tid));
        while !done.load(Ordering::Acquire) {
            domain_thread.pause();
        }
        assert_ok!(interrupter.join().expect("interrupter"));

        assert_eq!(td.state(), TdState::RunningNonblocking);
        assert!(!td.is_interrupted());
        assert_eq!(td.handling_depth(), 0);
        // two traps plus the return to the outer frame
        assert_eq!(td.visits(TdState::SecondLevelExceptionHandling), 3);
        assert_eq!(domain_thread.interrupts().accepted, 1);
    })
    .expect("ecall");
}

#[domain_test]
fn blocking_thread_drops_interrupts() {
    let host = common::host();
    let sender = host.clone();
    host.ecall(move |domain_thread| {
        domain_thread.td().set_state(TdState::RunningBlocking);
        let tid = domain_thread.tid();
        let interrupter = thread::spawn(move || sender.send_interrupt(tid));
        assert_ok!(interrupter.join().expect("interrupter"));

        domain_thread.pause();
        assert_eq!(domain_thread.td().visits(TdState::SecondLevelExceptionHandling), 0);
        assert_eq!(
            domain_thread.interrupts(),
            InterruptStats {
                raised: 1,
                accepted: 0,
                dropped: 1,
                consumed_by_host: 0,
            }
        );
    })
    .expect("ecall");
}

#[domain_test]
fn interrupts_during_out_call_stay_on_the_host() {
    let host = common::host();
    let sender = host.clone();
    host.ecall(move |domain_thread| {
        domain_thread.td().set_state(TdState::RunningNonblocking);
        let tid = domain_thread.tid();
        domain_thread.ocall(|_| {
            let interrupter = thread::spawn(move || sender.send_interrupt(tid));
            assert_ok!(interrupter.join().expect("interrupter"));
        });
        domain_thread.pause();

        assert_eq!(domain_thread.td().state(), TdState::Entered);
        let stats = domain_thread.interrupts();
        assert_eq!(stats.consumed_by_host, 1);
        assert_eq!(stats.accepted, 0);
    })
    .expect("ecall");
}

#[domain_test]
fn retries_are_bounded() {
    let host = common::host();
    let tid = host
        .ecall(|domain_thread| domain_thread.tid())
        .expect("ecall");

    // the ecall has returned, so nothing is listening any more
    assert_eq!(
        interrupt_until(&host, tid, 3, Duration::from_millis(1), || false),
        Err(Error::NoSuchThread(tid))
    );

    let sender = host.clone();
    host.ecall(move |domain_thread| {
        domain_thread.td().set_state(TdState::RunningBlocking);
        let tid = domain_thread.tid();
        let outcome = thread::spawn(move || {
            interrupt_until(&sender, tid, 3, Duration::from_millis(1), || false)
        })
        .join()
        .expect("sender");
        assert_eq!(outcome, Err(Error::InterruptUndelivered { tid, attempts: 3 }));
        assert_eq!(domain_thread.interrupts().raised, 3);
    })
    .expect("ecall");
}

#[domain_test]
fn float_lanes_survive_interrupt() {
    let host = common::host();
    let sender = host.clone();
    host.ecall(move |domain_thread| {
        let done = Arc::new(AtomicBool::new(false));
        let seen = done.clone();
        domain_thread
            .register_exception_handler(move |thread, record| {
                assert!(record.is_interrupt());
                assert_eq!(record.context.fpu.f32(0), 0.31);
                // clobber the handler's own frame
                thread.fpu_mut().set_f32(0, 9.0);
                thread.fpu_mut().set_f64(1, 9.0);
                thread.fpu_mut().mxcsr = 0;
                thread.td().set_state(TdState::RunningNonblocking);
                seen.store(true, Ordering::Release);
                Disposition::ContinueExecution
            })
            .expect("register");

        domain_thread.fpu_mut().set_f32(0, 0.31);
        domain_thread.fpu_mut().set_f64(1, 0.32);
        let before = domain_thread.fpu().clone();

        domain_thread.td().set_state(TdState::RunningNonblocking);
        let tid = domain_thread.tid();
        let interrupter = thread::spawn(move || sender.send_interrupt(tid));
        while !done.load(Ordering::Acquire) {
            domain_thread.pause();
        }
        assert_ok!(interrupter.join().expect("interrupter"));

        assert_eq!(domain_thread.interrupts().accepted, 1);
        assert_eq!(domain_thread.fpu().f32(0), 0.31);
        assert_eq!(domain_thread.fpu().f64(1), 0.32);
        assert_eq!(*domain_thread.fpu(), before);
    })
    .expect("ecall");
}

#[domain_test]
fn unwound_ecall_stops_taking_interrupts() {
    let host = common::host();
    let outcome = catch_unwind(AssertUnwindSafe(|| host.ecall(|_| panic!("entry gave up"))));
    assert_err!(outcome);

    let tid = current_tid();
    assert_eq!(host.send_interrupt(tid), Err(Error::NoSuchThread(tid)));
    assert_eq!(
        interrupt_until(&host, tid, 3, Duration::from_millis(1), || false),
        Err(Error::NoSuchThread(tid))
    );
    assert_eq!(host.domain().free_slots(), host.domain().config().thread_slots);
}

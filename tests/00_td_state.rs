// SPDX-License-Identifier: Unlicense

#[macro_use]
extern crate claim;

mod common;

use libtdstate::archs::arch::IDIV_R32_LEN;
use libtdstate::host::{current_tid, EntryKind};
use libtdstate::scenario::td_state;
use libtdstate::util::locked::Locked;
use libtdstate::{Disposition, Domain, Error, ExceptionCode, Host, SimHost, TdState};

use std::sync::Arc;
use test_macros::domain_test;

#[domain_test]
fn td_state_scenario() {
    assert_ok!(td_state::run(&common::host()));
}

#[domain_test]
fn fresh_thread_is_entered() {
    let host = common::host();
    host.bind(EntryKind::Nonblocking, |thread| {
        assert_eq!(thread.td().state(), TdState::Entered);
        assert!(!thread.td().is_interrupted());
        assert_eq!(thread.td().handling_depth(), 0);
    });

    let worker = host.create_thread(false).expect("create");
    assert_ne!(worker.tid(), current_tid());
    assert_ok!(host.join_thread());
    assert_eq!(worker.td().state(), TdState::Exited);
    assert!(worker.td().is_retired());
}

#[domain_test]
fn ecall_runs_on_calling_thread() {
    let host = common::host();
    let (tid, td) = host
        .ecall(|thread| (thread.host_thread_id(), thread.td().clone()))
        .expect("ecall");
    assert_eq!(tid, current_tid());
    assert_eq!(td.state(), TdState::Exited);
    assert_eq!(td.visits(TdState::Exited), 2);
    assert_eq!(td.visits(TdState::Entered), 2);
}

#[domain_test]
fn state_persists_across_out_calls_in_handling() {
    let host = common::host();
    host.ecall(|thread| {
        thread
            .register_exception_handler(|thread, record| {
                let td = thread.td().clone();
                assert_eq!(td.state(), TdState::SecondLevelExceptionHandling);
                let during = thread.ocall(|_| td.state());
                assert_eq!(during, TdState::SecondLevelExceptionHandling);
                assert_eq!(td.state(), TdState::SecondLevelExceptionHandling);
                assert!(!td.is_interrupted());

                record.context.rip += IDIV_R32_LEN;
                Disposition::ContinueExecution
            })
            .expect("register");

        let td = thread.td().clone();
        td.set_state(TdState::RunningBlocking);
        thread.idiv32(5, 0);
        assert_eq!(td.state(), TdState::RunningBlocking);

        thread.ocall(|_| ());
        assert_eq!(td.state(), TdState::Entered);
    })
    .expect("ecall");
}

#[domain_test]
fn worker_panic_is_reported_by_join() {
    let host = common::host();
    host.bind(EntryKind::Blocking, |thread| {
        thread.td().set_state(TdState::RunningBlocking);
        panic!("worker gave up");
    });

    let worker = host.create_thread(true).expect("create");
    assert_eq!(host.join_thread(), Err(Error::ThreadPanicked(worker.tid())));
    // retired on the way out
    assert_eq!(worker.td().state(), TdState::Exited);
}

#[domain_test]
fn thread_slots_run_out() {
    let host = SimHost::new(Domain::new(common::config().with_thread_slots(1)));
    host.bind(EntryKind::Nonblocking, |_| ());

    let created = host
        .ecall(|thread| thread.ocall(|host| host.host().create_thread(false).map(|_| ())))
        .expect("ecall");
    assert_eq!(created, Err(Error::OutOfThreadSlots));
    assert_eq!(host.domain().free_slots(), 1);

    assert_ok!(host.create_thread(false));
    assert_ok!(host.join_thread());
}

#[domain_test]
#[should_panic(expected = "IllegalInstruction")]
fn unhandled_illegal_instruction_is_fatal() {
    let host = common::host();
    host.ecall(|thread| {
        thread
            .register_exception_handler(|_, record| {
                assert_eq!(record.code, ExceptionCode::IllegalInstruction);
                Disposition::ContinueSearch
            })
            .expect("register");
        thread.ud2();
    })
    .expect("ecall");
}

#[domain_test]
fn handles_are_shared_with_the_host() {
    let host = common::host();
    let seen = Arc::new(Locked::new(None));
    let report = seen.clone();
    host.bind(EntryKind::Nonblocking, move |thread| {
        *report.lock() = Some(thread.tid());
    });

    let worker = host.create_thread(false).expect("create");
    assert_ok!(host.join_thread());
    assert_eq!(*seen.lock(), Some(worker.tid()));
}

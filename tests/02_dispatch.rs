// SPDX-License-Identifier: Unlicense

#[macro_use]
extern crate claim;

mod common;

use libtdstate::archs::arch::INT3_LEN;
use libtdstate::util::locked::Locked;
use libtdstate::Disposition::{AbortExecution, ContinueExecution, ContinueSearch};
use libtdstate::{Disposition, DomainThread, Error, ExceptionCode, ExceptionRecord};

use std::sync::Arc;
use test_macros::domain_test;

fn tagging(
    log: &Arc<Locked<Vec<&'static str>>>,
    tag: &'static str,
    answer: Disposition,
) -> impl Fn(&mut DomainThread, &mut ExceptionRecord) -> Disposition + Send + Sync + 'static {
    let log = log.clone();
    move |_: &mut DomainThread, record: &mut ExceptionRecord| {
        log.lock().push(tag);
        if answer == ContinueExecution {
            record.context.rip += INT3_LEN;
        }
        answer
    }
}

#[domain_test]
fn most_recent_registration_goes_first() {
    let log = Arc::new(Locked::new(Vec::new()));
    common::host()
        .ecall(|thread| {
            let last = tagging(&log, "last", ContinueExecution);
            assert_ok!(thread.add_exception_handler(false, last));
            let older = tagging(&log, "older", ContinueSearch);
            assert_ok!(thread.register_exception_handler(older));
            let newest = tagging(&log, "newest", ContinueSearch);
            assert_ok!(thread.register_exception_handler(newest));
            thread.int3();
        })
        .expect("ecall");
    assert_eq!(*log.lock(), vec!["newest", "older", "last"]);
}

#[domain_test]
fn dispatch_stops_at_first_answer() {
    let log = Arc::new(Locked::new(Vec::new()));
    common::host()
        .ecall(|thread| {
            let never = tagging(&log, "never", ContinueExecution);
            assert_ok!(thread.register_exception_handler(never));
            let first = tagging(&log, "first", ContinueExecution);
            assert_ok!(thread.register_exception_handler(first));
            thread.int3();
            thread.int3();
        })
        .expect("ecall");
    assert_eq!(*log.lock(), vec!["first", "first"]);
}

#[domain_test]
fn removed_handler_is_not_consulted() {
    let log = Arc::new(Locked::new(Vec::new()));
    common::host()
        .ecall(|thread| {
            let kept = tagging(&log, "kept", ContinueExecution);
            assert_ok!(thread.register_exception_handler(kept));
            let id = thread
                .register_exception_handler(tagging(&log, "removed", ContinueSearch))
                .expect("register");
            assert_ok!(thread.remove_exception_handler(id));
            assert_eq!(thread.remove_exception_handler(id), Err(Error::HandlerNotFound));
            thread.int3();
        })
        .expect("ecall");
    assert_eq!(*log.lock(), vec!["kept"]);
}

#[domain_test]
fn handler_table_is_bounded() {
    let log = Arc::new(Locked::new(Vec::new()));
    let host = common::host();
    let capacity = host.domain().config().max_handlers;
    host.ecall(|thread| {
        for _ in 0..capacity {
            let filler = tagging(&log, "filler", ContinueSearch);
            assert_ok!(thread.add_exception_handler(false, filler));
        }
        assert_eq!(
            thread
                .add_exception_handler(true, tagging(&log, "spare", ContinueSearch))
                .map(|_| ()),
            Err(Error::TooManyHandlers)
        );
    })
    .expect("ecall");
    assert_eq!(host.domain().handlers().len(), capacity);
}

#[domain_test]
fn handlers_may_register_while_dispatching() {
    let log = Arc::new(Locked::new(Vec::new()));
    let late = log.clone();
    common::host()
        .ecall(|thread| {
            assert_ok!(thread.register_exception_handler(move |thread, record| {
                // not consulted for the exception being dispatched
                let late = tagging(&late, "late", ContinueSearch);
                assert_ok!(thread.register_exception_handler(late));
                assert_eq!(record.code, ExceptionCode::Breakpoint);
                record.context.rip += INT3_LEN;
                ContinueExecution
            }));
            thread.int3();
        })
        .expect("ecall");
    assert!(log.lock().is_empty());
}

#[domain_test]
#[should_panic(expected = "AbortExecution")]
fn nobody_claims_the_fault() {
    let log = Arc::new(Locked::new(Vec::new()));
    common::host()
        .ecall(|thread| {
            let passes = tagging(&log, "passes", ContinueSearch);
            assert_ok!(thread.register_exception_handler(passes));
            thread.int3();
        })
        .expect("ecall");
}

#[domain_test]
#[should_panic(expected = "Breakpoint")]
fn handler_abort_is_fatal() {
    let log = Arc::new(Locked::new(Vec::new()));
    common::host()
        .ecall(|thread| {
            let aborts = tagging(&log, "aborts", AbortExecution);
            assert_ok!(thread.register_exception_handler(aborts));
            let unreached = tagging(&log, "unreached", ContinueExecution);
            assert_ok!(thread.add_exception_handler(false, unreached));
            thread.int3();
        })
        .expect("ecall");
}

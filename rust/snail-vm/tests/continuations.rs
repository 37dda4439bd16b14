//! First-class continuations: escape, re-entry, multi-shot invocation and
//! the `Nuate` instruction used directly.

mod common;

use common::Session;
use snail_vm::{Arity, Value, VmError};

/// Leaves `k` bound to a continuation captured inside `(+ 1 [] )`.
fn capture_plus_one(s: &mut Session) {
    s.eval("(define k #f)").unwrap();
    assert_eq!(s.eval_int("(+ 1 (call/cc (lambda (c) (set! k c) 1)))"), 2);
}

// ─── Escape ───

#[test]
fn call_cc_returning_normally() {
    let mut s = Session::new();
    assert_eq!(s.eval_int("(+ 1 (call/cc (lambda (k) 2)))"), 3);
    assert_eq!(s.vm.stats().continuations_captured, 1);
    assert_eq!(s.vm.stats().continuations_invoked, 0);
}

#[test]
fn escaping_abandons_pending_work() {
    let mut s = Session::new();
    assert_eq!(s.eval_int("(+ 1 (call/cc (lambda (k) (+ 10 (k 5)))))"), 6);
    assert_eq!(s.vm.frame_depth(), 0);
}

#[test]
fn escape_from_deep_recursion() {
    let mut s = Session::new();
    s.eval(
        "(define search
           (lambda (n return)
             (if (= n 0) (return 'found) (+ 1 (search (- n 1) return)))))",
    )
    .unwrap();
    let v = s.eval("(call/cc (lambda (k) (search 100 k)))").unwrap();
    assert_eq!(v, Value::Symbol(s.sym("found")));
    assert!(s.vm.stats().max_frame_depth > 100);
    assert_eq!(s.vm.frame_depth(), 0);
}

#[test]
fn call_cc_in_tail_position_pushes_no_frame() {
    let mut s = Session::new();
    s.eval("(define f (lambda () (call/cc (lambda (k) (k 9)))))").unwrap();
    assert_eq!(s.eval_int("(f)"), 9);
    // Only the top-level call to `f` is framed.
    assert_eq!(s.vm.stats().frames_pushed, 1);
}

// ─── Multi-shot ───

#[test]
fn continuation_invoked_twice_with_different_values() {
    let mut s = Session::new();
    capture_plus_one(&mut s);
    assert_eq!(s.eval_int("(k 10)"), 11);
    assert_eq!(s.eval_int("(k 20)"), 21);
    assert_eq!(s.vm.stats().continuations_invoked, 1);
}

#[test]
fn reentry_restores_pending_arguments() {
    let mut s = Session::new();
    s.eval("(define k #f)").unwrap();
    assert_eq!(
        s.eval_int("(+ 100 (call/cc (lambda (c) (set! k c) 1)) 1000)"),
        1101
    );
    // Arguments before the capture point come from the saved rib, later
    // ones are evaluated again.
    assert_eq!(s.eval_int("(k 5)"), 1105);
    assert_eq!(s.eval_int("(k 7)"), 1107);
}

#[test]
fn reentry_sees_later_mutations() {
    let mut s = Session::new();
    s.eval("(define k #f) (define total 0)").unwrap();
    s.eval("(set! total (+ total (call/cc (lambda (c) (set! k c) 1))))")
        .unwrap();
    assert_eq!(s.eval_int("total"), 1);
    // `total` was read before the capture, so re-entry reuses the old value
    // and overwrites it.
    s.eval("(k 10)").unwrap();
    assert_eq!(s.eval_int("total"), 10);
}

#[test]
fn continuation_requires_one_argument() {
    let mut s = Session::new();
    capture_plus_one(&mut s);
    let err = s.eval("(k 1 2)").unwrap_err();
    match err {
        VmError::ArityMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, Arity::Exactly(1));
            assert_eq!(actual, 2);
        }
        other => panic!("expected arity mismatch, got {other:?}"),
    }
}

// ─── Capture cost ───

#[test]
fn capture_allocates_one_block_at_any_depth() {
    for depth in [0usize, 10, 500] {
        let mut s = Session::new();
        let t = &mut s.table;
        let halt = t.halt();
        let mut entry = t.conti(halt);
        for _ in 0..depth {
            entry = t.frame(halt, entry);
        }
        s.vm.start(entry);
        for _ in 0..depth {
            s.vm.step(&s.table).unwrap();
        }
        let before = s.vm.arena().used_blocks();
        s.vm.step(&s.table).unwrap();
        assert_eq!(s.vm.arena().used_blocks(), before + 1, "depth {depth}");
        assert_eq!(s.vm.frame_depth(), depth);
    }
}

// ─── Nuate ───

#[test]
fn nuate_delivers_accumulator() {
    let mut s = Session::new();
    capture_plus_one(&mut s);
    let k = s.vm.globals().get(s.sym("k")).unwrap();
    let stack = s.vm.continuation_stack(k).expect("k is a continuation");

    let nuate = s.table.nuate(stack, None);
    let entry = s.table.constant(Value::Int(7), nuate);
    assert_eq!(s.vm.run(&s.table, entry).unwrap(), Value::Int(8));
    // The same stack can be reinstated again.
    let entry = s.table.constant(Value::Int(41), nuate);
    assert_eq!(s.vm.run(&s.table, entry).unwrap(), Value::Int(42));
}

#[test]
fn nuate_reads_named_variable() {
    let mut s = Session::new();
    capture_plus_one(&mut s);
    let k = s.vm.globals().get(s.sym("k")).unwrap();
    let stack = s.vm.continuation_stack(k).unwrap();
    let v = s.vm.define_global("v", Value::Int(99));

    let nuate = s.table.nuate(stack, Some(v));
    assert_eq!(s.vm.run(&s.table, nuate).unwrap(), Value::Int(100));
}

#[test]
fn nuate_of_empty_stack_underflows() {
    let mut s = Session::new();
    let nuate = s.table.nuate(None, None);
    let err = s.vm.run(&s.table, nuate).unwrap_err();
    assert!(matches!(err, VmError::StackUnderflow { .. }));
    assert!(err.is_fatal());
}

#[test]
fn stale_continuation_after_reset_is_reported() {
    let mut s = Session::new();
    capture_plus_one(&mut s);
    let k = s.vm.globals().get(s.sym("k")).unwrap();
    s.vm.reset().unwrap();
    assert_eq!(s.vm.continuation_stack(k), None);
    assert!(s.vm.globals().get(s.sym("k")).is_none());
}

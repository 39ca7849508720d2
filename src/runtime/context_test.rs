use crate::bytecode::iseq::{BodyBuilder, IseqType, NO_METHOD};
use crate::bytecode::op_code::OpCode;
use crate::runtime::context::ExecutionContext;
use crate::runtime::value::Value;

fn simple_body(lead: usize, locals: usize) -> std::sync::Arc<crate::bytecode::iseq::IseqBody> {
    let mut b = BodyBuilder::new("t");
    b.iseq_type(IseqType::Method);
    b.params(lead, locals);
    b.emit(OpCode::PutNil, &[]);
    b.emit(OpCode::Leave, &[]);
    b.build().unwrap()
}

#[test]
fn push_frame_nil_fills_locals_and_links_env() {
    let mut ec = ExecutionContext::new();
    let body = simple_body(0, 1);

    ec.push_frame(body, Value::TRUE, 0, Value::NIL, NO_METHOD, None)
        .unwrap();

    let cfp = ec.current_frame();
    assert_eq!(cfp.self_val, Value::TRUE);
    assert_eq!(cfp.pc, 0);
    unsafe {
        // locals are nil-filled, env slot is a null parent
        assert_eq!(*cfp.ep.sub(1), Value::NIL);
        assert_eq!((*cfp.ep).0, 0);
        assert_eq!(cfp.stack_bottom, cfp.ep.add(1));
        assert_eq!(cfp.sp, cfp.stack_bottom);
    }
}

#[test]
fn arguments_become_leading_locals() {
    let mut ec = ExecutionContext::new();
    let callee = simple_body(2, 3);

    // caller frame with two pushed arguments
    let caller = simple_body(0, 0);
    ec.push_frame(caller, Value::NIL, 0, Value::NIL, NO_METHOD, None)
        .unwrap();
    unsafe {
        let sp = ec.current_frame().sp;
        *sp = Value::fixnum(10);
        *sp.add(1) = Value::fixnum(20);
        ec.current_frame_mut().sp = sp.add(2);
    }

    ec.push_frame(callee.clone(), Value::NIL, 2, Value::NIL, NO_METHOD, None)
        .unwrap();
    let cfp = ec.current_frame();
    unsafe {
        // ep-relative: local i sits at ep[-(local_size - i)]
        assert_eq!(*cfp.ep.sub(3), Value::fixnum(10));
        assert_eq!(*cfp.ep.sub(2), Value::fixnum(20));
        assert_eq!(*cfp.ep.sub(1), Value::NIL);
    }
}

#[test]
fn ep_level_walk_reaches_parent_env() {
    let mut ec = ExecutionContext::new();
    let outer = simple_body(0, 2);
    let inner = simple_body(0, 1);

    ec.push_frame(outer, Value::NIL, 0, Value::NIL, NO_METHOD, None)
        .unwrap();
    let outer_ep = ec.current_frame().ep;
    unsafe {
        *outer_ep.sub(2) = Value::fixnum(42);
    }

    ec.push_frame(inner, Value::NIL, 0, Value::NIL, NO_METHOD, Some(outer_ep))
        .unwrap();
    let inner_ep = ec.current_frame().ep;
    let walked = ExecutionContext::ep_at_level(inner_ep, 1);
    assert_eq!(walked, outer_ep);
    unsafe {
        assert_eq!(*walked.sub(2), Value::fixnum(42));
    }
}

#[test]
fn frame_overflow_is_reported() {
    let mut ec = ExecutionContext::new();
    let body = simple_body(0, 0);
    let mut pushed = 0;
    loop {
        match ec.push_frame(body.clone(), Value::NIL, 0, Value::NIL, NO_METHOD, None) {
            Ok(()) => pushed += 1,
            Err(e) => {
                assert!(e.contains("deep") || e.contains("overflow"));
                break;
            }
        }
        assert!(pushed < 10_000, "never overflowed");
    }
}

#[test]
fn raise_sets_errinfo_and_error() {
    let mut ec = ExecutionContext::new();
    assert!(!ec.errored());
    ec.raise("boom");
    assert!(ec.errored());
    assert!(ec.errinfo.is_heap());
    assert_eq!(ec.take_error().unwrap(), "boom");
    assert!(!ec.errored());
    assert!(ec.errinfo.is_nil());
}

#[test]
fn intern_is_stable() {
    let mut ec = ExecutionContext::new();
    let a = ec.host.intern("foo");
    let b = ec.host.intern("foo");
    let c = ec.host.intern("bar");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(ec.host.symbol_name(a.as_symbol_id()), Some("foo"));
}

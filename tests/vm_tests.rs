//! Interpreter-level scenario tests over the public API: each mirrors one
//! of the engine's documented end-to-end behaviors, so the same bodies can
//! be cross-checked against native execution in `jit_engine_tests`.

use std::sync::Arc;

use ember::bytecode::iseq::{BodyBuilder, CI_FCALL, IseqBody, IseqType};
use ember::bytecode::op_code::OpCode;
use ember::runtime::builtins::register_builtins;
use ember::runtime::context::ExecutionContext;
use ember::runtime::heap::ClassId;
use ember::runtime::method::Visibility;
use ember::runtime::value::Value;
use ember::runtime::vm::run_body;

fn new_ec() -> Box<ExecutionContext> {
    let mut ec = ExecutionContext::new();
    register_builtins(&mut ec.host.methods);
    ec
}

#[test]
fn scenario_putobject_returns_zero() {
    let mut b = BodyBuilder::new("zero");
    let c = b.add_const(Value::fixnum(0));
    b.emit(OpCode::PutObject, &[c]);
    b.emit(OpCode::Leave, &[]);
    let out = run_body(&mut new_ec(), b.build().unwrap()).unwrap();
    assert_eq!(out, Value::fixnum(0));
}

#[test]
fn scenario_opt_plus_returns_three() {
    let mut b = BodyBuilder::new("three");
    let one = b.add_const(Value::fixnum(1));
    let two = b.add_const(Value::fixnum(2));
    let ci = b.add_call_info("+", 1, 0, None);
    b.emit(OpCode::PutObject, &[one]);
    b.emit(OpCode::PutObject, &[two]);
    b.emit(OpCode::OptPlus, &[ci]);
    b.emit(OpCode::Leave, &[]);
    let out = run_body(&mut new_ec(), b.build().unwrap()).unwrap();
    assert_eq!(out, Value::fixnum(3));
}

#[test]
fn scenario_putself_send_dispatches_on_self() {
    fn whoami(_: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
        assert!(args.is_empty());
        Ok(Value::boolean(recv.is_nil()))
    }
    let mut ec = new_ec();
    ec.host
        .methods
        .define_builtin(ClassId::Object, "whoami", Visibility::Public, whoami);

    let mut b = BodyBuilder::new("selfsend");
    let ci = b.add_call_info("whoami", 0, CI_FCALL, None);
    b.emit(OpCode::PutSelf, &[]);
    b.emit(OpCode::OptSendWithoutBlock, &[ci]);
    b.emit(OpCode::Leave, &[]);
    // toplevel self is nil, so the receiver must arrive as nil
    assert_eq!(run_body(&mut ec, b.build().unwrap()).unwrap(), Value::TRUE);
}

#[test]
fn scenario_trace_fires_once_then_returns_nil() {
    let mut b = BodyBuilder::new("traced");
    b.emit(OpCode::Trace, &[8]);
    b.emit(OpCode::PutNil, &[]);
    b.emit(OpCode::Leave, &[]);
    let mut ec = new_ec();
    let out = run_body(&mut ec, b.build().unwrap()).unwrap();
    assert_eq!(out, Value::NIL);
    let events: Vec<u8> = ec.host.trace_events.iter().map(|e| e.flag).collect();
    assert_eq!(events, vec![8]);
}

#[test]
fn scenario_branchunless_with_falsey_tos_skips() {
    let mut ec = new_ec();
    let taken_sym = ec.host.intern("taken");
    let skipped_sym = ec.host.intern("skipped");

    let mut b = BodyBuilder::new("branch");
    let skip = b.new_label();
    let t = b.add_const(taken_sym);
    let s = b.add_const(skipped_sym);
    b.emit(OpCode::PutNil, &[]);
    b.emit_branch(OpCode::BranchUnless, &[], skip);
    b.emit(OpCode::PutObject, &[t]);
    b.emit(OpCode::Leave, &[]);
    b.place(skip);
    b.emit(OpCode::PutObject, &[s]);
    b.emit(OpCode::Leave, &[]);
    assert_eq!(run_body(&mut ec, b.build().unwrap()).unwrap(), skipped_sym);
}

#[test]
fn scenario_locals_resolve_per_lexical_level() {
    // yielding method passes its argument to the block; the block writes the
    // outer scope's local through level 1 and reads its own through level 0
    let mut y = BodyBuilder::new("pass");
    y.iseq_type(IseqType::Method);
    y.params(1, 1);
    let ci = y.add_call_info("yield", 1, 0, None);
    y.emit(OpCode::GetLocal0, &[1]);
    y.emit(OpCode::InvokeBlock, &[ci]);
    y.emit(OpCode::Leave, &[]);
    let pass: Arc<IseqBody> = y.build().unwrap();

    let mut ec = new_ec();
    ec.host
        .methods
        .define_iseq(ClassId::NilClass, "pass", Visibility::Public, pass);

    let mut blk = BodyBuilder::new("blk");
    blk.iseq_type(IseqType::Block);
    blk.params(1, 1);
    blk.emit(OpCode::GetLocal0, &[1]);
    blk.emit(OpCode::SetLocal1, &[1]);
    blk.emit(OpCode::PutNil, &[]);
    blk.emit(OpCode::Leave, &[]);
    let blk = blk.build().unwrap();

    let mut b = BodyBuilder::new("outer");
    b.params(0, 1);
    let c = b.add_const(Value::fixnum(64));
    let ci = b.add_call_info("pass", 1, CI_FCALL, Some(blk));
    b.emit(OpCode::PutSelf, &[]);
    b.emit(OpCode::PutObject, &[c]);
    b.emit(OpCode::Send, &[ci]);
    b.emit(OpCode::Pop, &[]);
    b.emit(OpCode::GetLocal0, &[1]);
    b.emit(OpCode::Leave, &[]);
    // the block stored the yielded 64 into the toplevel local
    assert_eq!(run_body(&mut ec, b.build().unwrap()).unwrap(), Value::fixnum(64));
}

#[test]
fn scenario_side_effects_match_between_runs() {
    // same body executed twice produces identical observable effects
    let build = || {
        let mut b = BodyBuilder::new("effects");
        let g = b.add_id("$count");
        let one = b.add_const(Value::fixnum(1));
        let ci = b.add_call_info("+", 1, 0, None);
        b.emit(OpCode::GetGlobal, &[g]);
        b.emit(OpCode::PutObject, &[one]);
        b.emit(OpCode::OptPlus, &[ci]);
        b.emit(OpCode::SetGlobal, &[g]);
        b.emit(OpCode::GetGlobal, &[g]);
        b.emit(OpCode::Leave, &[]);
        b.build().unwrap()
    };

    let mut ec = new_ec();
    ec.host.globals.insert("$count".to_string(), Value::fixnum(0));
    assert_eq!(run_body(&mut ec, build()).unwrap(), Value::fixnum(1));
    assert_eq!(run_body(&mut ec, build()).unwrap(), Value::fixnum(2));
}

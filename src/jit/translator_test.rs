use std::sync::Arc;

use crate::bytecode::iseq::{
    BodyBuilder, CC_KIND_ISEQ_SIMPLE, CC_KIND_NATIVE, IseqBody, IseqType,
};
use crate::bytecode::op_code::OpCode;
use crate::jit::options::JitOptions;
use crate::jit::translator::compile;
use crate::runtime::value::Value;

fn translate(body: &IseqBody) -> (bool, String) {
    let mut out = Vec::new();
    let opts = JitOptions::default();
    let ok = compile(&mut out, body, "_emjit_test", &opts).unwrap();
    (ok, String::from_utf8(out).unwrap())
}

fn leave_const_body() -> Arc<IseqBody> {
    let mut b = BodyBuilder::new("answer");
    let c = b.add_const(Value::fixnum(0));
    b.emit(OpCode::PutObject, &[c]);
    b.emit(OpCode::Leave, &[]);
    b.build().unwrap()
}

#[test]
fn minimal_body_translates() {
    let body = leave_const_body();
    let (ok, c) = translate(&body);
    assert!(ok);
    assert!(c.contains("VALUE _emjit_test(em_execution_context_t *ec, em_control_frame_t *cfp)"));
    assert!(c.contains("struct em_helper_table em_helpers;"));
    assert!(c.contains("label_0: /* PutObject */"));
    assert!(c.contains("stack[0] = em_helpers.iseq_const(cfp, 0);"));
    assert!(c.contains("return stack[0];"));
    assert!(c.contains("cancel:"));
    assert!(c.contains("VALUE stack[1];"));
}

#[test]
fn pc_is_synced_before_every_instruction() {
    let body = leave_const_body();
    let (_, c) = translate(&body);
    assert!(c.contains("cfp->pc = 0;"));
    assert!(c.contains("cfp->pc = 3;"));
}

#[test]
fn output_is_deterministic() {
    let body = leave_const_body();
    let (_, first) = translate(&body);
    let (_, second) = translate(&body);
    assert_eq!(first, second);
}

#[test]
fn optimized_op_cancels_on_undef() {
    let mut b = BodyBuilder::new("plus");
    let one = b.add_const(Value::fixnum(1));
    let two = b.add_const(Value::fixnum(2));
    let ci = b.add_call_info("+", 1, 0, None);
    b.emit(OpCode::PutObject, &[one]);
    b.emit(OpCode::PutObject, &[two]);
    b.emit(OpCode::OptPlus, &[ci]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();

    let (ok, c) = translate(&body);
    assert!(ok);
    assert!(c.contains("v = em_helpers.opt_plus(ec, stack[0], stack[1]);"));
    assert!(c.contains("if (v == EM_QUNDEF) {"));
    // deopt restores sp over both operands before cancelling
    assert!(c.contains("cfp->sp = cfp->stack_bottom + 2;"));
    assert!(c.contains("goto cancel;"));
}

#[test]
fn branch_compiles_both_edges_once() {
    let mut b = BodyBuilder::new("branchy");
    let taken = b.new_label();
    let c0 = b.add_const(Value::fixnum(1));
    let c1 = b.add_const(Value::fixnum(2));
    b.emit(OpCode::PutNil, &[]);
    b.emit_branch(OpCode::BranchUnless, &[], taken);
    b.emit(OpCode::PutObject, &[c0]);
    b.emit(OpCode::Leave, &[]);
    b.place(taken);
    b.emit(OpCode::PutObject, &[c1]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();

    let (ok, c) = translate(&body);
    assert!(ok);
    assert!(c.contains("if (!EM_RTEST(stack[0])) {"));
    assert!(c.contains("em_helpers.check_ints(ec);"));
    assert!(c.contains("goto label_8;"));
    // each position is emitted exactly once
    assert_eq!(c.matches("label_8: /* PutObject */").count(), 1);
    assert_eq!(c.matches("label_4: /* PutObject */").count(), 1);
}

#[test]
fn jump_target_already_compiled_becomes_goto() {
    let mut b = BodyBuilder::new("loop");
    let top = b.new_label();
    b.place(top);
    b.emit(OpCode::PutNil, &[]);
    b.emit(OpCode::Pop, &[]);
    b.emit_branch(OpCode::Jump, &[], top);
    let body = b.build().unwrap();

    let (ok, c) = translate(&body);
    assert!(ok);
    assert!(c.contains("goto label_0;"));
    assert_eq!(c.matches("label_0: /* PutNil */").count(), 1);
}

#[test]
fn stack_overflow_fails_translation() {
    let mut b = BodyBuilder::new("overflow");
    b.stack_max(0);
    b.emit(OpCode::PutNil, &[]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();
    let (ok, c) = translate(&body);
    assert!(!ok);
    // a zero-height body never declares the stack array
    assert!(!c.contains("VALUE stack["));
}

#[test]
fn bad_leave_depth_fails_translation() {
    let mut b = BodyBuilder::new("badleave");
    b.stack_max(2);
    b.emit(OpCode::PutNil, &[]);
    b.emit(OpCode::PutNil, &[]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();
    let (ok, _) = translate(&body);
    assert!(!ok);
}

#[test]
fn unsupported_instruction_fails_translation() {
    let mut b = BodyBuilder::new("blockparam");
    b.stack_max(1);
    b.emit(OpCode::GetBlockParamProxy, &[]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();
    let (ok, _) = translate(&body);
    assert!(!ok);

    let mut b = BodyBuilder::new("defclass");
    b.stack_max(1);
    b.emit(OpCode::DefineClass, &[0]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();
    assert!(!translate(&body).0);

    let mut b = BodyBuilder::new("cfunc");
    b.stack_max(1);
    b.emit(OpCode::OptCallCFunction, &[]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();
    assert!(!translate(&body).0);
}

#[test]
fn empty_cache_send_uses_generic_dispatch() {
    let mut b = BodyBuilder::new("send");
    let ci = b.add_call_info("foo", 0, 0, None);
    b.emit(OpCode::PutSelf, &[]);
    b.emit(OpCode::OptSendWithoutBlock, &[ci]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();

    let (ok, c) = translate(&body);
    assert!(ok);
    assert!(c.contains("em_helpers.call_general(ec, cfp, 0, 0);"));
    assert!(!c.contains("cc_invalid_p"));
}

#[test]
fn cached_native_send_emits_guarded_direct_call() {
    let mut b = BodyBuilder::new("send_native");
    let ci = b.add_call_info("foo", 0, 0, None);
    b.emit(OpCode::PutSelf, &[]);
    b.emit(OpCode::OptSendWithoutBlock, &[ci]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();
    body.call_caches[0].fill(1, 1, 0, CC_KIND_NATIVE);

    let (ok, c) = translate(&body);
    assert!(ok);
    assert!(c.contains("if (em_helpers.cc_invalid_p(ec, cfp, 0, stack[0])) goto cancel;"));
    assert!(c.contains("v = em_helpers.call_cached_native(ec, cfp, 0);"));
    // the receiver and arguments are written back before the call
    assert!(c.contains("cfp->stack_bottom[0] = stack[0];"));
    assert!(c.contains("cfp->sp = cfp->stack_bottom + 1;"));
}

#[test]
fn cached_simple_iseq_send_pushes_frame_inline() {
    let mut b = BodyBuilder::new("send_iseq");
    let ci = b.add_call_info("bar", 0, 0, None);
    b.emit(OpCode::PutSelf, &[]);
    b.emit(OpCode::OptSendWithoutBlock, &[ci]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();
    body.call_caches[0].fill(1, 1, 0, CC_KIND_ISEQ_SIMPLE);

    let (ok, c) = translate(&body);
    assert!(ok);
    assert!(c.contains("if (!em_helpers.push_iseq_frame(ec, cfp, 0)) {"));
    assert!(c.contains("v = em_helpers.jit_exec(ec);"));
    assert!(c.contains("v = em_helpers.exec_finish(ec);"));
}

#[test]
fn send_with_block_is_always_generic() {
    let mut block = BodyBuilder::new("blk");
    block.iseq_type(IseqType::Block);
    block.emit(OpCode::PutNil, &[]);
    block.emit(OpCode::Leave, &[]);
    let block = block.build().unwrap();

    let mut b = BodyBuilder::new("send_block");
    let ci = b.add_call_info("each", 0, 0, Some(block));
    b.emit(OpCode::PutSelf, &[]);
    b.emit(OpCode::Send, &[ci]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();
    body.call_caches[0].fill(1, 1, 0, CC_KIND_NATIVE);

    let (ok, c) = translate(&body);
    assert!(ok);
    assert!(c.contains("em_helpers.call_general(ec, cfp, 0, 1);"));
    assert!(!c.contains("call_cached_native"));
}

#[test]
fn opt_table_emits_entry_prologue() {
    let mut b = BodyBuilder::new("opt");
    b.iseq_type(IseqType::Method);
    b.params(0, 1);
    let c10 = b.add_const(Value::fixnum(10));
    b.opt_entry();
    b.emit(OpCode::PutObject, &[c10]);
    b.emit(OpCode::SetLocal0, &[1]);
    b.opt_entry();
    b.emit(OpCode::GetLocal0, &[1]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();

    let (ok, c) = translate(&body);
    assert!(ok);
    assert!(c.contains("if (cfp->pc == 0) goto label_0;"));
    assert!(c.contains(&format!(
        "if (cfp->pc == {}) goto label_{};",
        body.opt_table[1], body.opt_table[1]
    )));
}

#[test]
fn case_dispatch_emits_target_table() {
    let mut b = BodyBuilder::new("case");
    let one = b.new_label();
    let other = b.new_label();
    let tbl = b.add_case_table(vec![(Value::fixnum(1), one)]);
    let c = b.add_const(Value::fixnum(7));
    b.emit(OpCode::PutObject, &[c]);
    b.emit_branch(OpCode::OptCaseDispatch, &[tbl], other);
    b.place(one);
    b.emit(OpCode::PutNil, &[]);
    b.emit(OpCode::Leave, &[]);
    b.place(other);
    b.emit(OpCode::PutObject, &[c]);
    b.emit(OpCode::Leave, &[]);
    let body = b.build().unwrap();

    let (ok, c) = translate(&body);
    assert!(ok, "{}", c);
    assert!(c.contains("t = em_helpers.case_lookup(cfp, 0, stack[0]);"));
    assert!(c.contains("if (t =="));
}

#[test]
fn leave_pops_the_frame() {
    let body = leave_const_body();
    let (_, c) = translate(&body);
    assert!(c.contains("em_helpers.pop_frame(ec);"));
}

#[test]
fn throw_syncs_sp_and_returns_through_the_host() {
    let mut b = BodyBuilder::new("thrower");
    b.iseq_type(IseqType::Block);
    b.emit(OpCode::PutNil, &[]);
    b.emit(OpCode::Throw, &[2]);
    let body = b.build().unwrap();

    let (ok, c) = translate(&body);
    assert!(ok);
    assert!(c.contains("return em_helpers.vm_throw(ec, cfp, 2, stack[0]);"));
}

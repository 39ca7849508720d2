use std::sync::Arc;

use crate::bytecode::iseq::{CI_FCALL, IseqBody, IseqType, NO_METHOD};
use crate::runtime::context::ExecutionContext;
use crate::runtime::heap::{ObjKind, class_of};
use crate::runtime::method::{MethodKind, NativeFunc, Visibility};
use crate::runtime::value::Value;

use super::{Flow, jit_exec, popn, push, topn, vm_exec};

/// Owned view of a resolved method, detached from the registry borrow.
enum Callee {
    Native(NativeFunc),
    Iseq(Arc<IseqBody>),
}

fn resolve_kind(ec: &ExecutionContext, method_idx: u32) -> Callee {
    match &ec.host.methods.method(method_idx).kind {
        MethodKind::Native(f) => Callee::Native(*f),
        MethodKind::Iseq(b) => Callee::Iseq(b.clone()),
    }
}

/// Dispatch a `Send` / `OptSendWithoutBlock` site: resolve the method, fill
/// the call cache, and either run a native method to completion or push the
/// callee frame (trying native code first).
pub(super) fn vm_send(ec: &mut ExecutionContext, ci_idx: usize, with_block: bool) -> Result<Flow, String> {
    let body = ec.current_frame().body();
    let ci = &body.call_infos[ci_idx];
    let argc = ci.argc as usize;
    let fcall = ci.flags & CI_FCALL != 0;
    let name = body.ids[ci.mid as usize].clone();
    let block_iseq = if with_block { ci.block.clone() } else { None };

    let recv = topn(ec, argc);
    let klass = class_of(recv);
    let Some((method_idx, _)) = ec.host.methods.search(klass, &name) else {
        return Err(format!("undefined method '{}' for {:?}", name, recv));
    };
    // refresh the cache with the snapshot this dispatch resolved under
    let state = ec.host.methods.method_state();
    let serial = ec.host.methods.class_serial(klass);
    let method = ec.host.methods.method(method_idx);
    let kind = match &method.kind {
        MethodKind::Native(_) => crate::bytecode::iseq::CC_KIND_NATIVE,
        MethodKind::Iseq(b) if method.is_simple_iseq() && argc == b.lead_num => {
            crate::bytecode::iseq::CC_KIND_ISEQ_SIMPLE
        }
        MethodKind::Iseq(_) => crate::bytecode::iseq::CC_KIND_OTHER,
    };
    if method.visibility == Visibility::Private && !fcall {
        return Err(format!("private method '{}' called", name));
    }
    ec.current_frame().body().call_caches[ci_idx].fill(state, serial, method_idx, kind);

    let block = match block_iseq {
        Some(iseq) => {
            let self_val = ec.current_frame().self_val;
            let ep = ec.current_frame().ep;
            ec.host.heap.alloc(
                crate::runtime::heap::ClassId::Proc,
                ObjKind::Proc {
                    iseq,
                    self_val,
                    ep,
                },
            )
        }
        None => Value::NIL,
    };

    match resolve_kind(ec, method_idx) {
        Callee::Native(f) => {
            let mut args = Vec::with_capacity(argc);
            for i in (0..argc).rev() {
                args.push(topn(ec, i));
            }
            let v = f(ec, recv, &args)?;
            popn(ec, argc + 1);
            push(ec, v);
            Ok(Flow::Next)
        }
        Callee::Iseq(callee) => {
            check_arity(&callee, argc)?;
            enter_iseq_call(ec, callee, recv, argc, block, method_idx, None)
        }
    }
}

pub(super) fn vm_invokesuper(ec: &mut ExecutionContext, ci_idx: usize) -> Result<Flow, String> {
    let body = ec.current_frame().body();
    let ci = &body.call_infos[ci_idx];
    let argc = ci.argc as usize;

    let current = ec.current_frame().method_entry;
    if current == NO_METHOD {
        return Err("super called outside of method".to_string());
    }
    let (cur_klass, name) = {
        let m = ec.host.methods.method(current);
        (m.klass, m.name.clone())
    };
    if cur_klass == crate::runtime::heap::ClassId::Object {
        return Err(format!("super: no superclass method '{}'", name));
    }
    // the built-in class hierarchy is flat: everything inherits Object
    let Some((method_idx, _)) = ec
        .host
        .methods
        .search(crate::runtime::heap::ClassId::Object, &name)
    else {
        return Err(format!("super: no superclass method '{}'", name));
    };

    let recv = topn(ec, argc);
    match resolve_kind(ec, method_idx) {
        Callee::Native(f) => {
            let mut args = Vec::with_capacity(argc);
            for i in (0..argc).rev() {
                args.push(topn(ec, i));
            }
            let v = f(ec, recv, &args)?;
            popn(ec, argc + 1);
            push(ec, v);
            Ok(Flow::Next)
        }
        Callee::Iseq(callee) => {
            check_arity(&callee, argc)?;
            enter_iseq_call(ec, callee, recv, argc, Value::NIL, method_idx, None)
        }
    }
}

pub(super) fn vm_invokeblock(ec: &mut ExecutionContext, ci_idx: usize) -> Result<Flow, String> {
    let body = ec.current_frame().body();
    let ci = &body.call_infos[ci_idx];
    let mut argc = ci.argc as usize;

    let block = block_for_current(ec);
    if block.is_nil() {
        return Err("no block given (yield)".to_string());
    }
    let (iseq, self_val, parent_ep) = match &unsafe { block.as_object() }.kind {
        ObjKind::Proc { iseq, self_val, ep } => (iseq.clone(), *self_val, *ep),
        _ => return Err("yield: block is not a proc".to_string()),
    };

    // blocks pad missing arguments with nil
    if argc > iseq.lead_num {
        return Err(format!(
            "wrong number of arguments (given {}, expected {})",
            argc, iseq.lead_num
        ));
    }
    while argc < iseq.lead_num {
        push(ec, Value::NIL);
        argc += 1;
    }

    enter_iseq_call(ec, iseq, self_val, argc, Value::NIL, NO_METHOD, Some(parent_ep))
}

/// Push the callee frame and try native code. A native result is placed on
/// the caller's stack here; `UNDEF` leaves the callee frame current for the
/// interpreter loop (or carries a recorded error outward).
fn enter_iseq_call(
    ec: &mut ExecutionContext,
    callee: Arc<IseqBody>,
    recv: Value,
    argc: usize,
    block: Value,
    method_entry: u32,
    parent_ep: Option<*mut Value>,
) -> Result<Flow, String> {
    let caller_sp = ec.current_frame().sp;
    let is_block = parent_ep.is_some();
    ec.push_frame(callee, recv, argc, block, method_entry, parent_ep)?;

    let v = jit_exec(ec);
    if v.is_undef() {
        if ec.errored() {
            return Ok(Flow::Return(Value::UNDEF));
        }
        return Ok(Flow::Next);
    }

    // native code ran to completion and popped the callee frame
    unsafe {
        let dst = if is_block {
            caller_sp.sub(argc)
        } else {
            caller_sp.sub(argc + 1)
        };
        *dst = v;
        ec.current_frame_mut().sp = dst.add(1);
    }
    Ok(Flow::Next)
}

fn check_arity(callee: &IseqBody, argc: usize) -> Result<(), String> {
    let min = callee.lead_num;
    let max = callee.lead_num + callee.opt_num();
    if argc < min || argc > max {
        return Err(format!(
            "wrong number of arguments (given {}, expected {})",
            argc,
            if min == max {
                min.to_string()
            } else {
                format!("{}..{}", min, max)
            }
        ));
    }
    Ok(())
}

/// Resolve the block visible at the current frame: block frames delegate to
/// the enclosing method frame.
pub(crate) fn block_for_current(ec: &ExecutionContext) -> Value {
    for frame in ec.frames_in_use().iter().rev() {
        let body = unsafe { &*frame.iseq };
        match body.iseq_type {
            IseqType::Block => continue,
            _ => return frame.block,
        }
    }
    Value::NIL
}

/// Run a `Send`-family site to completion on behalf of generated code:
/// receiver and arguments are already on the real stack below `sp`. Errors
/// are recorded on the context and surface as `UNDEF`.
pub(crate) fn vm_send_complete(ec: &mut ExecutionContext, ci_idx: usize, with_block: bool) -> Value {
    let depth = ec.frame_depth();
    let flow = vm_send(ec, ci_idx, with_block);
    complete_flow(ec, depth, flow)
}

pub(crate) fn vm_invokesuper_complete(ec: &mut ExecutionContext, ci_idx: usize) -> Value {
    let depth = ec.frame_depth();
    let flow = vm_invokesuper(ec, ci_idx);
    complete_flow(ec, depth, flow)
}

pub(crate) fn vm_invokeblock_complete(ec: &mut ExecutionContext, ci_idx: usize) -> Value {
    let depth = ec.frame_depth();
    let flow = vm_invokeblock(ec, ci_idx);
    complete_flow(ec, depth, flow)
}

fn complete_flow(
    ec: &mut ExecutionContext,
    depth: usize,
    flow: Result<Flow, String>,
) -> Value {
    match flow {
        Err(e) => {
            ec.raise(e);
            Value::UNDEF
        }
        Ok(Flow::Return(v)) => v,
        Ok(Flow::Next) => {
            if ec.frame_depth() > depth {
                super::exec_finish(ec)
            } else {
                // the callee already completed; its result sits on the stack
                super::pop(ec)
            }
        }
    }
}

/// Synchronous full dispatch used by deoptimized operator fallbacks and by
/// JIT helpers: arguments are materialized, bytecode callees run to
/// completion before this returns.
pub fn call_method(
    ec: &mut ExecutionContext,
    recv: Value,
    name: &str,
    args: &[Value],
) -> Result<Value, String> {
    let klass = class_of(recv);
    let Some((method_idx, _)) = ec.host.methods.search(klass, name) else {
        return Err(format!("undefined method '{}' for {:?}", name, recv));
    };
    match resolve_kind(ec, method_idx) {
        Callee::Native(f) => f(ec, recv, args),
        Callee::Iseq(callee) => {
            check_arity(&callee, args.len())?;
            // synchronous call: push recv+args, run the callee to completion
            push(ec, recv);
            for a in args {
                push(ec, *a);
            }
            ec.push_frame(
                callee,
                recv,
                args.len(),
                Value::NIL,
                method_idx,
                None,
            )?;
            ec.current_frame_mut().finish = 1;
            let v = jit_exec(ec);
            let v = if v.is_undef() && !ec.errored() {
                vm_exec(ec)
            } else {
                v
            };
            if let Some(e) = ec.host.error.clone() {
                ec.take_error();
                return Err(e);
            }
            // drop recv+args from the caller stack
            popn(ec, args.len() + 1);
            Ok(v)
        }
    }
}

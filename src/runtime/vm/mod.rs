use std::sync::Arc;

use crate::bytecode::iseq::{IseqBody, IseqType, NO_METHOD};
use crate::bytecode::op_code::decode;
use crate::runtime::context::ExecutionContext;
use crate::runtime::value::Value;

mod dispatch;
mod send;

pub use send::call_method;
pub(crate) use dispatch::{check_match, defined_desc, get_ivar, set_ivar};
pub(crate) use send::{
    block_for_current, vm_invokeblock_complete, vm_invokesuper_complete, vm_send_complete,
};

/// Throw state for a non-local method return.
pub const THROW_RETURN: u32 = 1;
/// Throw state for breaking out of the nearest block.
pub const THROW_BREAK: u32 = 2;

/// Run a toplevel body to completion, trying native code first.
pub fn run_body(ec: &mut ExecutionContext, body: Arc<IseqBody>) -> Result<Value, String> {
    ec.push_frame(body, Value::NIL, 0, Value::NIL, NO_METHOD, None)?;
    ec.current_frame_mut().finish = 1;
    let v = jit_exec(ec);
    let v = if v.is_undef() && !ec.errored() {
        vm_exec(ec)
    } else {
        v
    };
    match ec.take_error() {
        Some(e) => {
            ec.reset_frames();
            Err(e)
        }
        None => Ok(v),
    }
}

/// Attempt native execution of the current frame's body. Counts the call,
/// queues hot bodies, and runs published code; `UNDEF` means "interpret".
pub fn jit_exec(ec: &mut ExecutionContext) -> Value {
    let Some(jit) = ec.host.jit.clone() else {
        return Value::UNDEF;
    };
    jit.exec(ec)
}

/// Set the finish flag on the current frame and interpret until it returns.
/// Generated code re-enters the interpreter through this path.
pub fn exec_finish(ec: &mut ExecutionContext) -> Value {
    ec.current_frame_mut().finish = 1;
    vm_exec(ec)
}

/// The dispatch loop. Interprets from the current frame until a
/// finish-flagged frame pops; returns `UNDEF` with the error recorded on the
/// context when execution fails.
pub fn vm_exec(ec: &mut ExecutionContext) -> Value {
    loop {
        if ec.errored() {
            return Value::UNDEF;
        }
        if ec.host.throw_pending.is_some() {
            match handle_throw(ec) {
                ThrowResult::Finished(v) => return v,
                ThrowResult::Continue => continue,
            }
        }

        let cfp = ec.current_frame();
        let body = cfp.body();
        let pc = cfp.pc as usize;
        debug_assert!(pc < body.iseq_size);
        let (op, operands, next) = decode(&body.iseq_encoded, pc);

        match dispatch::dispatch_instruction(ec, op, &operands, next) {
            Ok(Flow::Next) => {}
            Ok(Flow::Return(v)) => return v,
            Err(e) => {
                ec.raise(e);
                return Value::UNDEF;
            }
        }
    }
}

/// Control transfer out of one dispatched instruction.
pub(super) enum Flow {
    Next,
    Return(Value),
}

/// Pop the current frame as `leave` does, placing `result` where the caller
/// expects it. Returns the value when a finish-flagged frame pops.
pub(super) fn frame_leave(ec: &mut ExecutionContext, result: Value) -> Flow {
    let cfp = ec.current_frame();
    let body = cfp.body();
    let finish = cfp.finish != 0;
    let iseq_type = body.iseq_type;
    let base = unsafe { cfp.ep.sub(body.local_size) };
    ec.pop_frame();

    if finish || ec.frame_depth() == 0 {
        return Flow::Return(result);
    }

    let dst = match iseq_type {
        IseqType::Method => unsafe { base.sub(1) },
        IseqType::Block => base,
        IseqType::Top => return Flow::Return(result),
    };
    unsafe {
        *dst = result;
        ec.current_frame_mut().sp = dst.add(1);
    }
    Flow::Next
}

enum ThrowResult {
    Finished(Value),
    Continue,
}

/// Unwind a pending `Throw`. Return state pops frames until a method frame
/// leaves; break state pops the nearest block frame.
fn handle_throw(ec: &mut ExecutionContext) -> ThrowResult {
    let (state, val) = ec.host.throw_pending.take().expect("pending throw");
    loop {
        if ec.frame_depth() == 0 {
            ec.raise("unexpected throw");
            return ThrowResult::Finished(Value::UNDEF);
        }
        let iseq_type = ec.current_frame().body().iseq_type;
        let done = match state {
            THROW_RETURN => iseq_type == IseqType::Method || iseq_type == IseqType::Top,
            THROW_BREAK => iseq_type == IseqType::Block,
            _ => {
                ec.raise(format!("unsupported throw state {}", state));
                return ThrowResult::Finished(Value::UNDEF);
            }
        };
        if done {
            return match frame_leave(ec, val) {
                Flow::Return(v) => ThrowResult::Finished(v),
                Flow::Next => ThrowResult::Continue,
            };
        }
        let finish = ec.current_frame().finish != 0;
        ec.pop_frame();
        if finish {
            // The throw crosses a native re-entry boundary; surface it to the
            // native caller, which propagates the sentinel outward.
            ec.host.throw_pending = Some((state, val));
            return ThrowResult::Finished(Value::UNDEF);
        }
    }
}

#[inline]
pub(super) fn push(ec: &mut ExecutionContext, v: Value) {
    let cfp = ec.current_frame_mut();
    unsafe {
        *cfp.sp = v;
        cfp.sp = cfp.sp.add(1);
    }
}

#[inline]
pub(super) fn pop(ec: &mut ExecutionContext) -> Value {
    let cfp = ec.current_frame_mut();
    unsafe {
        cfp.sp = cfp.sp.sub(1);
        *cfp.sp
    }
}

#[inline]
pub(super) fn topn(ec: &ExecutionContext, n: usize) -> Value {
    unsafe { *ec.current_frame().sp.sub(n + 1) }
}

#[inline]
pub(super) fn set_topn(ec: &mut ExecutionContext, n: usize, v: Value) {
    unsafe { *ec.current_frame().sp.sub(n + 1) = v }
}

#[inline]
pub(super) fn popn(ec: &mut ExecutionContext, n: usize) {
    let cfp = ec.current_frame_mut();
    unsafe {
        cfp.sp = cfp.sp.sub(n);
    }
}

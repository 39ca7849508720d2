use crate::bytecode::op_code::OpCode;
use crate::runtime::context::{ExecutionContext, TraceEvent};
use crate::runtime::heap::{ObjKind, class_of, values_eql};
use crate::runtime::ops;
use crate::runtime::value::Value;

use super::{Flow, frame_leave, pop, popn, push, send, set_topn, topn};

/// Execute one decoded instruction. The current frame's pc is advanced to
/// `next` before the instruction body runs; branch arms overwrite it.
pub(super) fn dispatch_instruction(
    ec: &mut ExecutionContext,
    op: OpCode,
    operands: &[usize],
    next: usize,
) -> Result<Flow, String> {
    let pos = ec.current_frame().pc;
    ec.current_frame_mut().pc = next as u64;

    match op {
        OpCode::Nop => {}
        OpCode::PutNil => push(ec, Value::NIL),
        OpCode::PutSelf => {
            let v = ec.current_frame().self_val;
            push(ec, v);
        }
        OpCode::PutObject => {
            let v = ec.current_frame().body().consts[operands[0]];
            push(ec, v);
        }
        OpCode::Dup => {
            let v = topn(ec, 0);
            push(ec, v);
        }
        OpCode::DupN => {
            let n = operands[0];
            for _ in 0..n {
                let v = topn(ec, n - 1);
                push(ec, v);
            }
        }
        OpCode::Swap => {
            let a = topn(ec, 0);
            let b = topn(ec, 1);
            set_topn(ec, 0, b);
            set_topn(ec, 1, a);
        }
        OpCode::Pop => {
            pop(ec);
        }
        OpCode::TopN => {
            let v = topn(ec, operands[0]);
            push(ec, v);
        }
        OpCode::SetN => {
            let v = topn(ec, 0);
            set_topn(ec, operands[0], v);
        }
        OpCode::Reverse => {
            let n = operands[0];
            for i in 0..n / 2 {
                let a = topn(ec, i);
                let b = topn(ec, n - 1 - i);
                set_topn(ec, i, b);
                set_topn(ec, n - 1 - i, a);
            }
        }
        OpCode::AdjustStack => popn(ec, operands[0]),

        OpCode::GetLocal => {
            let ep = ExecutionContext::ep_at_level(ec.current_frame().ep, operands[1]);
            push(ec, unsafe { *ep.sub(operands[0]) });
        }
        OpCode::SetLocal => {
            let v = pop(ec);
            let ep = ExecutionContext::ep_at_level(ec.current_frame().ep, operands[1]);
            unsafe { *ep.sub(operands[0]) = v };
        }
        OpCode::GetLocal0 => {
            let ep = ec.current_frame().ep;
            push(ec, unsafe { *ep.sub(operands[0]) });
        }
        OpCode::SetLocal0 => {
            let v = pop(ec);
            let ep = ec.current_frame().ep;
            unsafe { *ep.sub(operands[0]) = v };
        }
        OpCode::GetLocal1 => {
            let ep = ExecutionContext::ep_at_level(ec.current_frame().ep, 1);
            push(ec, unsafe { *ep.sub(operands[0]) });
        }
        OpCode::SetLocal1 => {
            let v = pop(ec);
            let ep = ExecutionContext::ep_at_level(ec.current_frame().ep, 1);
            unsafe { *ep.sub(operands[0]) = v };
        }

        OpCode::NewArray => {
            let n = operands[0];
            let mut elems = Vec::with_capacity(n);
            for i in (0..n).rev() {
                elems.push(topn(ec, i));
            }
            popn(ec, n);
            let ary = ec.host.heap.alloc_array(elems);
            push(ec, ary);
        }
        OpCode::NewHash => {
            let n = operands[0];
            debug_assert!(n % 2 == 0);
            let mut pairs = Vec::with_capacity(n / 2);
            for i in (0..n / 2).rev() {
                let k = topn(ec, i * 2 + 1);
                let v = topn(ec, i * 2);
                pairs.push((k, v));
            }
            popn(ec, n);
            let h = ec.host.heap.alloc_hash(pairs);
            push(ec, h);
        }
        OpCode::NewRange => {
            let end = pop(ec);
            let beg = pop(ec);
            let r = ec.host.heap.alloc_range(beg, end, operands[0] != 0);
            push(ec, r);
        }
        OpCode::DupArray => {
            let pooled = ec.current_frame().body().consts[operands[0]];
            let elems = match &unsafe { pooled.as_object() }.kind {
                ObjKind::Array(elems) => elems.clone(),
                _ => return Err("duparray on non-array constant".to_string()),
            };
            let ary = ec.host.heap.alloc_array(elems);
            push(ec, ary);
        }
        OpCode::SplatArray => {
            let v = pop(ec);
            let elems = splat_elems(v);
            let dup = operands[0] != 0;
            let out = if dup || !is_array(v) {
                ec.host.heap.alloc_array(elems)
            } else {
                v
            };
            push(ec, out);
        }
        OpCode::ConcatArray => {
            let b = pop(ec);
            let a = pop(ec);
            let mut elems = splat_elems(a);
            elems.extend(splat_elems(b));
            let out = ec.host.heap.alloc_array(elems);
            push(ec, out);
        }
        OpCode::ExpandArray => {
            let n = operands[0];
            let splat_rest = operands[1] & 1 != 0;
            let v = pop(ec);
            let elems = splat_elems(v);
            if splat_rest {
                let rest: Vec<Value> = elems.iter().skip(n).copied().collect();
                let rest = ec.host.heap.alloc_array(rest);
                push(ec, rest);
            }
            for i in (0..n).rev() {
                push(ec, elems.get(i).copied().unwrap_or(Value::NIL));
            }
        }
        OpCode::ToRegexp => {
            let cnt = operands[1];
            let mut source = String::new();
            for i in (0..cnt).rev() {
                source.push_str(&ops::value_to_s(ec, topn(ec, i)));
            }
            popn(ec, cnt);
            if operands[0] & 1 != 0 {
                source = format!("(?i){}", source);
            }
            let re = ec.host.heap.alloc_regexp(source)?;
            push(ec, re);
        }

        OpCode::PutString => {
            let pooled = ec.current_frame().body().consts[operands[0]];
            let s = crate::runtime::heap::str_of(pooled)
                .ok_or("putstring on non-string constant")?
                .to_string();
            let v = ec.host.heap.alloc_string(s);
            push(ec, v);
        }
        OpCode::ConcatStrings => {
            let cnt = operands[0];
            let mut out = String::new();
            for i in (0..cnt).rev() {
                out.push_str(&ops::value_to_s(ec, topn(ec, i)));
            }
            popn(ec, cnt);
            let v = ec.host.heap.alloc_string(out);
            push(ec, v);
        }
        OpCode::ToString => {
            let v = pop(ec);
            let s = ops::value_to_s(ec, v);
            let v = ec.host.heap.alloc_string(s);
            push(ec, v);
        }
        OpCode::FreezeString => {
            let v = topn(ec, 0);
            if v.is_heap() {
                if let ObjKind::Str { frozen, .. } = &mut unsafe { v.as_object_mut() }.kind {
                    *frozen = true;
                }
            }
        }
        OpCode::Intern => {
            let v = pop(ec);
            let name = ops::value_to_s(ec, v);
            let sym = ec.host.intern(&name);
            push(ec, sym);
        }
        OpCode::OptStrFreeze => {
            let pooled = ec.current_frame().body().consts[operands[0]];
            let v = ops::opt_str_freeze(ec, pooled);
            if v.is_undef() {
                let s = crate::runtime::heap::str_of(pooled).unwrap_or("").to_string();
                let recv = ec.host.heap.alloc_string(s);
                let v = send::call_method(ec, recv, "freeze", &[])?;
                push(ec, v);
            } else {
                push(ec, v);
            }
        }
        OpCode::OptStrUminus => {
            let pooled = ec.current_frame().body().consts[operands[0]];
            let v = ops::opt_str_uminus(ec, pooled);
            if v.is_undef() {
                let s = crate::runtime::heap::str_of(pooled).unwrap_or("").to_string();
                let recv = ec.host.heap.alloc_string(s);
                let v = send::call_method(ec, recv, "-@", &[])?;
                push(ec, v);
            } else {
                push(ec, v);
            }
        }

        OpCode::GetInstanceVariable => {
            let name = ec.current_frame().body().ids[operands[0]].clone();
            let recv = ec.current_frame().self_val;
            let v = get_ivar(ec, recv, &name);
            push(ec, v);
        }
        OpCode::SetInstanceVariable => {
            let name = ec.current_frame().body().ids[operands[0]].clone();
            let v = pop(ec);
            let recv = ec.current_frame().self_val;
            set_ivar(ec, recv, &name, v);
        }
        OpCode::GetClassVariable => {
            let name = ec.current_frame().body().ids[operands[0]].clone();
            let klass = class_of(ec.current_frame().self_val);
            let v = ec
                .host
                .class_vars
                .get(&(klass, name.clone()))
                .copied()
                .ok_or_else(|| format!("uninitialized class variable {}", name))?;
            push(ec, v);
        }
        OpCode::SetClassVariable => {
            let name = ec.current_frame().body().ids[operands[0]].clone();
            let v = pop(ec);
            let klass = class_of(ec.current_frame().self_val);
            ec.host.class_vars.insert((klass, name), v);
        }
        OpCode::GetConstant => {
            let name = ec.current_frame().body().ids[operands[0]].clone();
            let base = pop(ec);
            if !base.is_nil() {
                return Err("constant lookup under an explicit namespace is not supported".to_string());
            }
            let v = ec
                .host
                .constants
                .get(&name)
                .copied()
                .ok_or_else(|| format!("uninitialized constant {}", name))?;
            push(ec, v);
        }
        OpCode::SetConstant => {
            let name = ec.current_frame().body().ids[operands[0]].clone();
            let base = pop(ec);
            let v = pop(ec);
            if !base.is_nil() {
                return Err("constant write under an explicit namespace is not supported".to_string());
            }
            ec.host.constants.insert(name, v);
            ec.host
                .constant_serial
                .fetch_add(1, std::sync::atomic::Ordering::Release);
        }
        OpCode::GetGlobal => {
            let name = ec.current_frame().body().ids[operands[0]].clone();
            let v = ec.host.globals.get(&name).copied().unwrap_or(Value::NIL);
            push(ec, v);
        }
        OpCode::SetGlobal => {
            let name = ec.current_frame().body().ids[operands[0]].clone();
            let v = pop(ec);
            ec.host.globals.insert(name, v);
        }
        OpCode::GetInlineCache => {
            let body = ec.current_frame().body();
            let ic = &body.inline_caches[operands[0]];
            let serial = ic.serial.load(std::sync::atomic::Ordering::Acquire);
            let live = ec
                .host
                .constant_serial
                .load(std::sync::atomic::Ordering::Acquire);
            if serial == live {
                let v = Value(ic.value.load(std::sync::atomic::Ordering::Acquire));
                push(ec, v);
                ec.check_ints();
                ec.current_frame_mut().pc = operands[1] as u64;
            } else {
                push(ec, Value::NIL);
            }
        }
        OpCode::SetInlineCache => {
            let v = topn(ec, 0);
            let live = ec
                .host
                .constant_serial
                .load(std::sync::atomic::Ordering::Acquire);
            let body = ec.current_frame().body();
            let ic = &body.inline_caches[operands[0]];
            ic.value.store(v.0, std::sync::atomic::Ordering::Release);
            ic.serial.store(live, std::sync::atomic::Ordering::Release);
        }

        OpCode::Jump => {
            ec.check_ints();
            ec.current_frame_mut().pc = operands[0] as u64;
        }
        OpCode::BranchIf => {
            let v = pop(ec);
            if v.test() {
                ec.check_ints();
                ec.current_frame_mut().pc = operands[0] as u64;
            }
        }
        OpCode::BranchUnless => {
            let v = pop(ec);
            if !v.test() {
                ec.check_ints();
                ec.current_frame_mut().pc = operands[0] as u64;
            }
        }
        OpCode::BranchNil => {
            let v = pop(ec);
            if v.is_nil() {
                ec.check_ints();
                ec.current_frame_mut().pc = operands[0] as u64;
            }
        }
        OpCode::BranchIfType => {
            let v = pop(ec);
            if class_of(v) as u32 == operands[0] as u32 {
                ec.check_ints();
                ec.current_frame_mut().pc = operands[1] as u64;
            }
        }
        OpCode::OptCaseDispatch => {
            let key = pop(ec);
            let body = ec.current_frame().body();
            let table = &body.case_tables[operands[0]];
            let target = table
                .entries
                .iter()
                .find(|(bits, _)| values_eql(Value(*bits), key))
                .map(|(_, t)| *t as usize)
                .unwrap_or(operands[1]);
            ec.check_ints();
            ec.current_frame_mut().pc = target as u64;
        }

        OpCode::Send => return send::vm_send(ec, operands[0], true),
        OpCode::OptSendWithoutBlock => return send::vm_send(ec, operands[0], false),
        OpCode::InvokeSuper => return send::vm_invokesuper(ec, operands[0]),
        OpCode::InvokeBlock => return send::vm_invokeblock(ec, operands[0]),

        OpCode::OptPlus
        | OpCode::OptMinus
        | OpCode::OptMult
        | OpCode::OptDiv
        | OpCode::OptMod
        | OpCode::OptEq
        | OpCode::OptNeq
        | OpCode::OptLt
        | OpCode::OptLe
        | OpCode::OptGt
        | OpCode::OptGe => {
            let obj = topn(ec, 0);
            let recv = topn(ec, 1);
            let v = binary_op(ec, op, recv, obj);
            if v.is_undef() {
                popn(ec, 2);
                let v = send::call_method(ec, recv, op_method_name(op), &[obj])?;
                push(ec, v);
            } else {
                popn(ec, 1);
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptLtLt => {
            let obj = topn(ec, 0);
            let recv = topn(ec, 1);
            let v = ops::opt_ltlt(ec, recv, obj);
            if v.is_undef() {
                popn(ec, 2);
                let v = send::call_method(ec, recv, "<<", &[obj])?;
                push(ec, v);
            } else {
                popn(ec, 1);
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptAref => {
            let key = topn(ec, 0);
            let recv = topn(ec, 1);
            let v = ops::opt_aref(ec, recv, key);
            if v.is_undef() {
                popn(ec, 2);
                let v = send::call_method(ec, recv, "[]", &[key])?;
                push(ec, v);
            } else {
                popn(ec, 1);
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptAset => {
            let val = topn(ec, 0);
            let key = topn(ec, 1);
            let recv = topn(ec, 2);
            let v = ops::opt_aset(ec, recv, key, val);
            if v.is_undef() {
                popn(ec, 3);
                let v = send::call_method(ec, recv, "[]=", &[key, val])?;
                push(ec, v);
            } else {
                popn(ec, 2);
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptArefWith => {
            let key = ec.current_frame().body().consts[operands[0]];
            let recv = topn(ec, 0);
            let v = ops::opt_aref(ec, recv, key);
            if v.is_undef() {
                popn(ec, 1);
                let v = send::call_method(ec, recv, "[]", &[key])?;
                push(ec, v);
            } else {
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptAsetWith => {
            let key = ec.current_frame().body().consts[operands[0]];
            let val = topn(ec, 0);
            let recv = topn(ec, 1);
            let v = ops::opt_aset(ec, recv, key, val);
            if v.is_undef() {
                popn(ec, 2);
                let v = send::call_method(ec, recv, "[]=", &[key, val])?;
                push(ec, v);
            } else {
                popn(ec, 1);
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptLength | OpCode::OptSize => {
            let recv = topn(ec, 0);
            let v = if op == OpCode::OptLength {
                ops::opt_length(ec, recv)
            } else {
                ops::opt_size(ec, recv)
            };
            if v.is_undef() {
                popn(ec, 1);
                let name = if op == OpCode::OptLength { "length" } else { "size" };
                let v = send::call_method(ec, recv, name, &[])?;
                push(ec, v);
            } else {
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptEmptyP => {
            let recv = topn(ec, 0);
            let v = ops::opt_empty_p(ec, recv);
            if v.is_undef() {
                popn(ec, 1);
                let v = send::call_method(ec, recv, "empty?", &[])?;
                push(ec, v);
            } else {
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptSucc => {
            let recv = topn(ec, 0);
            let v = ops::opt_succ(ec, recv);
            if v.is_undef() {
                popn(ec, 1);
                let v = send::call_method(ec, recv, "succ", &[])?;
                push(ec, v);
            } else {
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptNot => {
            let recv = topn(ec, 0);
            let v = ops::opt_not(ec, recv);
            if v.is_undef() {
                popn(ec, 1);
                let v = send::call_method(ec, recv, "!", &[])?;
                push(ec, v);
            } else {
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptRegexpMatch1 => {
            let re = ec.current_frame().body().consts[operands[0]];
            let s = topn(ec, 0);
            let v = ops::opt_regexp_match(ec, re, s);
            if v.is_undef() {
                popn(ec, 1);
                let v = send::call_method(ec, re, "=~", &[s])?;
                push(ec, v);
            } else {
                set_topn(ec, 0, v);
            }
        }
        OpCode::OptRegexpMatch2 => {
            let obj = topn(ec, 0);
            let recv = topn(ec, 1);
            let v = ops::opt_regexp_match(ec, recv, obj);
            if v.is_undef() {
                popn(ec, 2);
                let v = send::call_method(ec, recv, "=~", &[obj])?;
                push(ec, v);
            } else {
                popn(ec, 1);
                set_topn(ec, 0, v);
            }
        }

        OpCode::Trace => {
            ec.host.trace_events.push(TraceEvent {
                flag: operands[0] as u8,
                pc: pos,
            });
        }
        OpCode::Defined => {
            let v = pop(ec);
            let name = ec.current_frame().body().ids[operands[1]].clone();
            let desc = defined_desc(ec, operands[0], &name, v);
            let out = match desc {
                Some(d) => ec.host.heap.alloc_frozen_string(d),
                None => Value::NIL,
            };
            push(ec, out);
        }
        OpCode::CheckMatch => {
            let pattern = pop(ec);
            let target = pop(ec);
            let v = check_match(ec, pattern, target, operands[0]);
            push(ec, v);
        }
        OpCode::CheckKeyword => {
            let ep = ec.current_frame().ep;
            let bits = unsafe { *ep.sub(operands[0]) };
            let given = bits.is_fixnum() && bits.as_fixnum() & (1 << operands[1]) == 0;
            push(ec, Value::boolean(given));
        }

        OpCode::Leave => {
            ec.check_ints();
            let result = pop(ec);
            return Ok(frame_leave(ec, result));
        }
        OpCode::Throw => {
            let val = pop(ec);
            ec.host.throw_pending = Some((operands[0] as u32, val));
        }

        OpCode::GetBlockParamProxy => {
            let block = send::block_for_current(ec);
            push(ec, block);
        }
        OpCode::DefineClass => {
            return Err("dynamic class definition is not supported by this host".to_string());
        }
        OpCode::OptCallCFunction => {
            return Err("opt_call_c_function is not supported by this host".to_string());
        }
    }
    Ok(Flow::Next)
}

fn binary_op(ec: &mut ExecutionContext, op: OpCode, recv: Value, obj: Value) -> Value {
    match op {
        OpCode::OptPlus => ops::opt_plus(ec, recv, obj),
        OpCode::OptMinus => ops::opt_minus(ec, recv, obj),
        OpCode::OptMult => ops::opt_mult(ec, recv, obj),
        OpCode::OptDiv => ops::opt_div(ec, recv, obj),
        OpCode::OptMod => ops::opt_mod(ec, recv, obj),
        OpCode::OptEq => ops::opt_eq(ec, recv, obj),
        OpCode::OptNeq => ops::opt_neq(ec, recv, obj),
        OpCode::OptLt => ops::opt_lt(ec, recv, obj),
        OpCode::OptLe => ops::opt_le(ec, recv, obj),
        OpCode::OptGt => ops::opt_gt(ec, recv, obj),
        OpCode::OptGe => ops::opt_ge(ec, recv, obj),
        _ => unreachable!(),
    }
}

fn op_method_name(op: OpCode) -> &'static str {
    match op {
        OpCode::OptPlus => "+",
        OpCode::OptMinus => "-",
        OpCode::OptMult => "*",
        OpCode::OptDiv => "/",
        OpCode::OptMod => "%",
        OpCode::OptEq => "==",
        OpCode::OptNeq => "!=",
        OpCode::OptLt => "<",
        OpCode::OptLe => "<=",
        OpCode::OptGt => ">",
        OpCode::OptGe => ">=",
        _ => unreachable!(),
    }
}

fn is_array(v: Value) -> bool {
    v.is_heap() && matches!(unsafe { v.as_object() }.kind, ObjKind::Array(_))
}

fn splat_elems(v: Value) -> Vec<Value> {
    if v.is_heap() {
        if let ObjKind::Array(elems) = &unsafe { v.as_object() }.kind {
            return elems.clone();
        }
    }
    vec![v]
}

pub(crate) fn get_ivar(ec: &ExecutionContext, recv: Value, name: &str) -> Value {
    if recv.is_heap() {
        unsafe { recv.as_object() }
            .ivars
            .get(name)
            .copied()
            .unwrap_or(Value::NIL)
    } else {
        ec.host
            .generic_ivars
            .get(&(recv.0, name.to_string()))
            .copied()
            .unwrap_or(Value::NIL)
    }
}

pub(crate) fn set_ivar(ec: &mut ExecutionContext, recv: Value, name: &str, v: Value) {
    if recv.is_heap() {
        unsafe { recv.as_object_mut() }
            .ivars
            .insert(name.to_string(), v);
    } else {
        ec.host.generic_ivars.insert((recv.0, name.to_string()), v);
    }
}

/// `Defined` type operands.
pub const DEFINED_IVAR: usize = 1;
pub const DEFINED_GVAR: usize = 2;
pub const DEFINED_CONST: usize = 3;
pub const DEFINED_METHOD: usize = 4;
pub const DEFINED_CVAR: usize = 5;

pub(crate) fn defined_desc(
    ec: &ExecutionContext,
    ty: usize,
    name: &str,
    v: Value,
) -> Option<&'static str> {
    match ty {
        DEFINED_IVAR => {
            let recv = ec.current_frame().self_val;
            let present = if recv.is_heap() {
                unsafe { recv.as_object() }.ivars.contains_key(name)
            } else {
                ec.host.generic_ivars.contains_key(&(recv.0, name.to_string()))
            };
            present.then_some("instance-variable")
        }
        DEFINED_GVAR => ec
            .host
            .globals
            .contains_key(name)
            .then_some("global-variable"),
        DEFINED_CONST => ec.host.constants.contains_key(name).then_some("constant"),
        DEFINED_METHOD => ec
            .host
            .methods
            .search(class_of(v), name)
            .map(|_| "method"),
        DEFINED_CVAR => {
            let klass = class_of(ec.current_frame().self_val);
            ec.host
                .class_vars
                .contains_key(&(klass, name.to_string()))
                .then_some("class variable")
        }
        _ => Some("expression"),
    }
}

pub(crate) fn check_match(ec: &mut ExecutionContext, pattern: Value, target: Value, flag: usize) -> Value {
    if flag & 1 != 0 {
        // splat form: pattern is an array, any element may match
        let patterns = splat_elems(pattern);
        for p in patterns {
            if ops::case_eq(ec, p, target).test() {
                return Value::TRUE;
            }
        }
        Value::FALSE
    } else {
        ops::case_eq(ec, pattern, target)
    }
}

//! Host entry points for generated code.
//!
//! Every function here is `extern "C"` and reachable from a JIT-compiled
//! shared object through [`HelperTable`], which the loader writes into the
//! object's `em_helpers` symbol right after `dlopen`. Field order is ABI and
//! must match `struct em_helper_table` in `jit/ember.h` exactly.
//!
//! Convention: helpers that can fail either return `UNDEF` to make the
//! generated code cancel (guard-style helpers), or record an error on the
//! context and return `UNDEF` so the sentinel propagates outward.

use std::sync::atomic::Ordering;

use crate::bytecode::iseq::{CC_KIND_NATIVE, NO_METHOD};
use crate::runtime::context::{ControlFrame, ExecutionContext, TraceEvent};
use crate::runtime::heap::{ObjKind, class_of, values_eql};
use crate::runtime::method::MethodKind;
use crate::runtime::ops;
use crate::runtime::value::Value;
use crate::runtime::vm;

type Ec = ExecutionContext;
type Cfp = ControlFrame;

#[inline]
unsafe fn ec_ref<'a>(ec: *mut Ec) -> &'a mut Ec {
    unsafe { &mut *ec }
}

#[inline]
unsafe fn cfp_ref<'a>(cfp: *mut Cfp) -> &'a mut Cfp {
    unsafe { &mut *cfp }
}

/// Function-pointer table handed to every loaded shared object. Layout
/// mirrors `struct em_helper_table`.
#[repr(C)]
pub struct HelperTable {
    pub check_ints: extern "C" fn(*mut Ec),
    pub iseq_const: extern "C" fn(*mut Cfp, u32) -> Value,
    pub ep_at: extern "C" fn(*mut Cfp, u32) -> *mut Value,
    pub value_class: extern "C" fn(Value) -> u32,
    pub pop_frame: extern "C" fn(*mut Ec),
    pub vm_throw: extern "C" fn(*mut Ec, *mut Cfp, u32, Value) -> Value,
    pub trace: extern "C" fn(*mut Ec, *mut Cfp, u32, Value),

    pub new_array: extern "C" fn(*mut Ec, *const Value, u32) -> Value,
    pub dup_array: extern "C" fn(*mut Ec, *mut Cfp, u32) -> Value,
    pub new_hash: extern "C" fn(*mut Ec, *const Value, u32) -> Value,
    pub new_range: extern "C" fn(*mut Ec, Value, Value, u32) -> Value,
    pub splat_array: extern "C" fn(*mut Ec, Value, u32) -> Value,
    pub concat_array: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub expand_array: extern "C" fn(*mut Ec, *mut Cfp, u32, u32),
    pub to_regexp: extern "C" fn(*mut Ec, *const Value, u32, u32) -> Value,

    pub str_resurrect: extern "C" fn(*mut Ec, *mut Cfp, u32) -> Value,
    pub concat_strings: extern "C" fn(*mut Ec, *const Value, u32) -> Value,
    pub obj_to_string: extern "C" fn(*mut Ec, Value) -> Value,
    pub str_freeze: extern "C" fn(*mut Ec, Value) -> Value,
    pub str_intern: extern "C" fn(*mut Ec, Value) -> Value,
    pub opt_str_freeze: extern "C" fn(*mut Ec, *mut Cfp, u32) -> Value,
    pub opt_str_uminus: extern "C" fn(*mut Ec, *mut Cfp, u32) -> Value,

    pub getivar: extern "C" fn(*mut Ec, *mut Cfp, u32) -> Value,
    pub setivar: extern "C" fn(*mut Ec, *mut Cfp, u32, Value),
    pub getcvar: extern "C" fn(*mut Ec, *mut Cfp, u32) -> Value,
    pub setcvar: extern "C" fn(*mut Ec, *mut Cfp, u32, Value),
    pub getconst: extern "C" fn(*mut Ec, *mut Cfp, u32, Value) -> Value,
    pub setconst: extern "C" fn(*mut Ec, *mut Cfp, u32, Value, Value) -> u32,
    pub getglobal: extern "C" fn(*mut Ec, *mut Cfp, u32) -> Value,
    pub setglobal: extern "C" fn(*mut Ec, *mut Cfp, u32, Value),
    pub ic_hit: extern "C" fn(*mut Ec, *mut Cfp, u32) -> u32,
    pub ic_get: extern "C" fn(*mut Cfp, u32) -> Value,
    pub ic_update: extern "C" fn(*mut Ec, *mut Cfp, u32, Value),
    pub case_lookup: extern "C" fn(*mut Cfp, u32, Value) -> i64,

    pub opt_plus: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_minus: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_mult: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_div: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_mod: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_eq: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_neq: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_lt: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_le: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_gt: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_ge: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_ltlt: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_aref: extern "C" fn(*mut Ec, Value, Value) -> Value,
    pub opt_aset: extern "C" fn(*mut Ec, Value, Value, Value) -> Value,
    pub opt_aref_with: extern "C" fn(*mut Ec, *mut Cfp, u32, Value) -> Value,
    pub opt_aset_with: extern "C" fn(*mut Ec, *mut Cfp, u32, Value, Value) -> Value,
    pub opt_length: extern "C" fn(*mut Ec, Value) -> Value,
    pub opt_size: extern "C" fn(*mut Ec, Value) -> Value,
    pub opt_empty_p: extern "C" fn(*mut Ec, Value) -> Value,
    pub opt_succ: extern "C" fn(*mut Ec, Value) -> Value,
    pub opt_not: extern "C" fn(*mut Ec, Value) -> Value,
    pub opt_rx_match1: extern "C" fn(*mut Ec, *mut Cfp, u32, Value) -> Value,
    pub opt_rx_match2: extern "C" fn(*mut Ec, Value, Value) -> Value,

    pub defined: extern "C" fn(*mut Ec, *mut Cfp, u32, u32, Value) -> Value,
    pub check_match: extern "C" fn(*mut Ec, Value, Value, u32) -> Value,
    pub check_keyword: extern "C" fn(*mut Cfp, u32, u32) -> Value,
    pub block_param_proxy: extern "C" fn(*mut Ec) -> Value,

    pub cc_invalid_p: extern "C" fn(*mut Ec, *mut Cfp, u32, Value) -> u32,
    pub call_cached_native: extern "C" fn(*mut Ec, *mut Cfp, u32) -> Value,
    pub push_iseq_frame: extern "C" fn(*mut Ec, *mut Cfp, u32) -> u32,
    pub call_general: extern "C" fn(*mut Ec, *mut Cfp, u32, u32) -> Value,
    pub invokesuper: extern "C" fn(*mut Ec, *mut Cfp, u32) -> Value,
    pub invokeblock: extern "C" fn(*mut Ec, *mut Cfp, u32) -> Value,
    pub jit_exec: extern "C" fn(*mut Ec) -> Value,
    pub exec_finish: extern "C" fn(*mut Ec) -> Value,
}

pub static HELPERS: HelperTable = HelperTable {
    check_ints: em_check_ints,
    iseq_const: em_iseq_const,
    ep_at: em_ep_at,
    value_class: em_value_class,
    pop_frame: em_pop_frame,
    vm_throw: em_vm_throw,
    trace: em_trace,
    new_array: em_new_array,
    dup_array: em_dup_array,
    new_hash: em_new_hash,
    new_range: em_new_range,
    splat_array: em_splat_array,
    concat_array: em_concat_array,
    expand_array: em_expand_array,
    to_regexp: em_to_regexp,
    str_resurrect: em_str_resurrect,
    concat_strings: em_concat_strings,
    obj_to_string: em_obj_to_string,
    str_freeze: em_str_freeze,
    str_intern: em_str_intern,
    opt_str_freeze: em_opt_str_freeze,
    opt_str_uminus: em_opt_str_uminus,
    getivar: em_getivar,
    setivar: em_setivar,
    getcvar: em_getcvar,
    setcvar: em_setcvar,
    getconst: em_getconst,
    setconst: em_setconst,
    getglobal: em_getglobal,
    setglobal: em_setglobal,
    ic_hit: em_ic_hit,
    ic_get: em_ic_get,
    ic_update: em_ic_update,
    case_lookup: em_case_lookup,
    opt_plus: em_opt_plus,
    opt_minus: em_opt_minus,
    opt_mult: em_opt_mult,
    opt_div: em_opt_div,
    opt_mod: em_opt_mod,
    opt_eq: em_opt_eq,
    opt_neq: em_opt_neq,
    opt_lt: em_opt_lt,
    opt_le: em_opt_le,
    opt_gt: em_opt_gt,
    opt_ge: em_opt_ge,
    opt_ltlt: em_opt_ltlt,
    opt_aref: em_opt_aref,
    opt_aset: em_opt_aset,
    opt_aref_with: em_opt_aref_with,
    opt_aset_with: em_opt_aset_with,
    opt_length: em_opt_length,
    opt_size: em_opt_size,
    opt_empty_p: em_opt_empty_p,
    opt_succ: em_opt_succ,
    opt_not: em_opt_not,
    opt_rx_match1: em_opt_rx_match1,
    opt_rx_match2: em_opt_rx_match2,
    defined: em_defined,
    check_match: em_check_match,
    check_keyword: em_check_keyword,
    block_param_proxy: em_block_param_proxy,
    cc_invalid_p: em_cc_invalid_p,
    call_cached_native: em_call_cached_native,
    push_iseq_frame: em_push_iseq_frame,
    call_general: em_call_general,
    invokesuper: em_invokesuper,
    invokeblock: em_invokeblock,
    jit_exec: em_jit_exec,
    exec_finish: em_exec_finish,
};

extern "C" fn em_check_ints(ec: *mut Ec) {
    unsafe { ec_ref(ec) }.check_ints();
}

extern "C" fn em_iseq_const(cfp: *mut Cfp, idx: u32) -> Value {
    unsafe { cfp_ref(cfp) }.body().consts[idx as usize]
}

extern "C" fn em_ep_at(cfp: *mut Cfp, level: u32) -> *mut Value {
    ExecutionContext::ep_at_level(unsafe { cfp_ref(cfp) }.ep, level as usize)
}

extern "C" fn em_value_class(v: Value) -> u32 {
    class_of(v) as u32
}

extern "C" fn em_pop_frame(ec: *mut Ec) {
    unsafe { ec_ref(ec) }.pop_frame();
}

extern "C" fn em_vm_throw(ec: *mut Ec, _cfp: *mut Cfp, state: u32, val: Value) -> Value {
    unsafe { ec_ref(ec) }.host.throw_pending = Some((state, val));
    Value::UNDEF
}

extern "C" fn em_trace(ec: *mut Ec, cfp: *mut Cfp, flag: u32, _val: Value) {
    let pc = unsafe { cfp_ref(cfp) }.pc;
    unsafe { ec_ref(ec) }.host.trace_events.push(TraceEvent {
        flag: flag as u8,
        pc,
    });
}

extern "C" fn em_new_array(ec: *mut Ec, elts: *const Value, n: u32) -> Value {
    let elems = unsafe { std::slice::from_raw_parts(elts, n as usize) }.to_vec();
    unsafe { ec_ref(ec) }.host.heap.alloc_array(elems)
}

extern "C" fn em_dup_array(ec: *mut Ec, cfp: *mut Cfp, idx: u32) -> Value {
    let pooled = unsafe { cfp_ref(cfp) }.body().consts[idx as usize];
    let elems = match &unsafe { pooled.as_object() }.kind {
        ObjKind::Array(elems) => elems.clone(),
        _ => Vec::new(),
    };
    unsafe { ec_ref(ec) }.host.heap.alloc_array(elems)
}

extern "C" fn em_new_hash(ec: *mut Ec, elts: *const Value, n: u32) -> Value {
    let flat = unsafe { std::slice::from_raw_parts(elts, n as usize) };
    let pairs = flat.chunks(2).map(|c| (c[0], c[1])).collect();
    unsafe { ec_ref(ec) }.host.heap.alloc_hash(pairs)
}

extern "C" fn em_new_range(ec: *mut Ec, beg: Value, end: Value, excl: u32) -> Value {
    unsafe { ec_ref(ec) }.host.heap.alloc_range(beg, end, excl != 0)
}

extern "C" fn em_splat_array(ec: *mut Ec, ary: Value, dup: u32) -> Value {
    let ec = unsafe { ec_ref(ec) };
    let is_array = ary.is_heap() && matches!(unsafe { ary.as_object() }.kind, ObjKind::Array(_));
    if is_array && dup == 0 {
        return ary;
    }
    let elems = splat_elems(ary);
    ec.host.heap.alloc_array(elems)
}

extern "C" fn em_concat_array(ec: *mut Ec, a: Value, b: Value) -> Value {
    let mut elems = splat_elems(a);
    elems.extend(splat_elems(b));
    unsafe { ec_ref(ec) }.host.heap.alloc_array(elems)
}

extern "C" fn em_expand_array(ec: *mut Ec, cfp: *mut Cfp, n: u32, flag: u32) {
    let ec = unsafe { ec_ref(ec) };
    let cfp = unsafe { cfp_ref(cfp) };
    let n = n as usize;
    unsafe {
        cfp.sp = cfp.sp.sub(1);
        let v = *cfp.sp;
        let elems = splat_elems(v);
        if flag & 1 != 0 {
            let rest: Vec<Value> = elems.iter().skip(n).copied().collect();
            let rest = ec.host.heap.alloc_array(rest);
            *cfp.sp = rest;
            cfp.sp = cfp.sp.add(1);
        }
        for i in (0..n).rev() {
            *cfp.sp = elems.get(i).copied().unwrap_or(Value::NIL);
            cfp.sp = cfp.sp.add(1);
        }
    }
}

extern "C" fn em_to_regexp(ec: *mut Ec, parts: *const Value, n: u32, opt: u32) -> Value {
    let ec = unsafe { ec_ref(ec) };
    let parts = unsafe { std::slice::from_raw_parts(parts, n as usize) };
    let mut source = String::new();
    for p in parts {
        source.push_str(&ops::value_to_s(ec, *p));
    }
    if opt & 1 != 0 {
        source = format!("(?i){}", source);
    }
    match ec.host.heap.alloc_regexp(source) {
        Ok(v) => v,
        Err(e) => {
            ec.raise(e);
            Value::UNDEF
        }
    }
}

extern "C" fn em_str_resurrect(ec: *mut Ec, cfp: *mut Cfp, idx: u32) -> Value {
    let pooled = unsafe { cfp_ref(cfp) }.body().consts[idx as usize];
    let s = crate::runtime::heap::str_of(pooled).unwrap_or("").to_string();
    unsafe { ec_ref(ec) }.host.heap.alloc_string(s)
}

extern "C" fn em_concat_strings(ec: *mut Ec, parts: *const Value, n: u32) -> Value {
    let ec = unsafe { ec_ref(ec) };
    let parts = unsafe { std::slice::from_raw_parts(parts, n as usize) };
    let mut out = String::new();
    for p in parts {
        out.push_str(&ops::value_to_s(ec, *p));
    }
    ec.host.heap.alloc_string(out)
}

extern "C" fn em_obj_to_string(ec: *mut Ec, v: Value) -> Value {
    let ec = unsafe { ec_ref(ec) };
    let s = ops::value_to_s(ec, v);
    ec.host.heap.alloc_string(s)
}

extern "C" fn em_str_freeze(_ec: *mut Ec, v: Value) -> Value {
    if v.is_heap() {
        if let ObjKind::Str { frozen, .. } = &mut unsafe { v.as_object_mut() }.kind {
            *frozen = true;
        }
    }
    v
}

extern "C" fn em_str_intern(ec: *mut Ec, v: Value) -> Value {
    let ec = unsafe { ec_ref(ec) };
    let name = ops::value_to_s(ec, v);
    ec.host.intern(&name)
}

extern "C" fn em_opt_str_freeze(ec: *mut Ec, cfp: *mut Cfp, idx: u32) -> Value {
    let pooled = unsafe { cfp_ref(cfp) }.body().consts[idx as usize];
    ops::opt_str_freeze(unsafe { ec_ref(ec) }, pooled)
}

extern "C" fn em_opt_str_uminus(ec: *mut Ec, cfp: *mut Cfp, idx: u32) -> Value {
    let pooled = unsafe { cfp_ref(cfp) }.body().consts[idx as usize];
    ops::opt_str_uminus(unsafe { ec_ref(ec) }, pooled)
}

extern "C" fn em_getivar(ec: *mut Ec, cfp: *mut Cfp, id: u32) -> Value {
    let cfp = unsafe { cfp_ref(cfp) };
    let name = cfp.body().ids[id as usize].clone();
    let recv = cfp.self_val;
    vm::get_ivar(unsafe { ec_ref(ec) }, recv, &name)
}

extern "C" fn em_setivar(ec: *mut Ec, cfp: *mut Cfp, id: u32, v: Value) {
    let cfp = unsafe { cfp_ref(cfp) };
    let name = cfp.body().ids[id as usize].clone();
    let recv = cfp.self_val;
    vm::set_ivar(unsafe { ec_ref(ec) }, recv, &name, v);
}

extern "C" fn em_getcvar(ec: *mut Ec, cfp: *mut Cfp, id: u32) -> Value {
    let cfp = unsafe { cfp_ref(cfp) };
    let name = cfp.body().ids[id as usize].clone();
    let klass = class_of(cfp.self_val);
    unsafe { ec_ref(ec) }
        .host
        .class_vars
        .get(&(klass, name))
        .copied()
        .unwrap_or(Value::UNDEF)
}

extern "C" fn em_setcvar(ec: *mut Ec, cfp: *mut Cfp, id: u32, v: Value) {
    let cfp = unsafe { cfp_ref(cfp) };
    let name = cfp.body().ids[id as usize].clone();
    let klass = class_of(cfp.self_val);
    unsafe { ec_ref(ec) }.host.class_vars.insert((klass, name), v);
}

extern "C" fn em_getconst(ec: *mut Ec, cfp: *mut Cfp, id: u32, base: Value) -> Value {
    if !base.is_nil() {
        return Value::UNDEF;
    }
    let name = unsafe { cfp_ref(cfp) }.body().ids[id as usize].clone();
    unsafe { ec_ref(ec) }
        .host
        .constants
        .get(&name)
        .copied()
        .unwrap_or(Value::UNDEF)
}

extern "C" fn em_setconst(ec: *mut Ec, cfp: *mut Cfp, id: u32, val: Value, base: Value) -> u32 {
    if !base.is_nil() {
        return 0;
    }
    let name = unsafe { cfp_ref(cfp) }.body().ids[id as usize].clone();
    let ec = unsafe { ec_ref(ec) };
    ec.host.constants.insert(name, val);
    ec.host.constant_serial.fetch_add(1, Ordering::Release);
    1
}

extern "C" fn em_getglobal(ec: *mut Ec, cfp: *mut Cfp, id: u32) -> Value {
    let name = unsafe { cfp_ref(cfp) }.body().ids[id as usize].clone();
    unsafe { ec_ref(ec) }
        .host
        .globals
        .get(&name)
        .copied()
        .unwrap_or(Value::NIL)
}

extern "C" fn em_setglobal(ec: *mut Ec, cfp: *mut Cfp, id: u32, v: Value) {
    let name = unsafe { cfp_ref(cfp) }.body().ids[id as usize].clone();
    unsafe { ec_ref(ec) }.host.globals.insert(name, v);
}

extern "C" fn em_ic_hit(ec: *mut Ec, cfp: *mut Cfp, idx: u32) -> u32 {
    let body = unsafe { cfp_ref(cfp) }.body();
    let ic = &body.inline_caches[idx as usize];
    let live = unsafe { ec_ref(ec) }
        .host
        .constant_serial
        .load(Ordering::Acquire);
    (ic.serial.load(Ordering::Acquire) == live) as u32
}

extern "C" fn em_ic_get(cfp: *mut Cfp, idx: u32) -> Value {
    let body = unsafe { cfp_ref(cfp) }.body();
    Value(body.inline_caches[idx as usize].value.load(Ordering::Acquire))
}

extern "C" fn em_ic_update(ec: *mut Ec, cfp: *mut Cfp, idx: u32, v: Value) {
    let live = unsafe { ec_ref(ec) }
        .host
        .constant_serial
        .load(Ordering::Acquire);
    let body = unsafe { cfp_ref(cfp) }.body();
    let ic = &body.inline_caches[idx as usize];
    ic.value.store(v.0, Ordering::Release);
    ic.serial.store(live, Ordering::Release);
}

extern "C" fn em_case_lookup(cfp: *mut Cfp, table: u32, key: Value) -> i64 {
    let body = unsafe { cfp_ref(cfp) }.body();
    body.case_tables[table as usize]
        .entries
        .iter()
        .find(|(bits, _)| values_eql(Value(*bits), key))
        .map(|(_, target)| *target as i64)
        .unwrap_or(-1)
}

macro_rules! binary_helper {
    ($name:ident, $op:path) => {
        extern "C" fn $name(ec: *mut Ec, a: Value, b: Value) -> Value {
            $op(unsafe { ec_ref(ec) }, a, b)
        }
    };
}

macro_rules! unary_helper {
    ($name:ident, $op:path) => {
        extern "C" fn $name(ec: *mut Ec, v: Value) -> Value {
            $op(unsafe { ec_ref(ec) }, v)
        }
    };
}

binary_helper!(em_opt_plus, ops::opt_plus);
binary_helper!(em_opt_minus, ops::opt_minus);
binary_helper!(em_opt_mult, ops::opt_mult);
binary_helper!(em_opt_div, ops::opt_div);
binary_helper!(em_opt_mod, ops::opt_mod);
binary_helper!(em_opt_eq, ops::opt_eq);
binary_helper!(em_opt_neq, ops::opt_neq);
binary_helper!(em_opt_lt, ops::opt_lt);
binary_helper!(em_opt_le, ops::opt_le);
binary_helper!(em_opt_gt, ops::opt_gt);
binary_helper!(em_opt_ge, ops::opt_ge);
binary_helper!(em_opt_ltlt, ops::opt_ltlt);
binary_helper!(em_opt_aref, ops::opt_aref);
binary_helper!(em_opt_rx_match2, ops::opt_regexp_match);
unary_helper!(em_opt_length, ops::opt_length);
unary_helper!(em_opt_size, ops::opt_size);
unary_helper!(em_opt_empty_p, ops::opt_empty_p);
unary_helper!(em_opt_succ, ops::opt_succ);
unary_helper!(em_opt_not, ops::opt_not);

extern "C" fn em_opt_aset(ec: *mut Ec, recv: Value, key: Value, val: Value) -> Value {
    ops::opt_aset(unsafe { ec_ref(ec) }, recv, key, val)
}

extern "C" fn em_opt_aref_with(ec: *mut Ec, cfp: *mut Cfp, idx: u32, recv: Value) -> Value {
    let key = unsafe { cfp_ref(cfp) }.body().consts[idx as usize];
    ops::opt_aref(unsafe { ec_ref(ec) }, recv, key)
}

extern "C" fn em_opt_aset_with(
    ec: *mut Ec,
    cfp: *mut Cfp,
    idx: u32,
    recv: Value,
    val: Value,
) -> Value {
    let key = unsafe { cfp_ref(cfp) }.body().consts[idx as usize];
    ops::opt_aset(unsafe { ec_ref(ec) }, recv, key, val)
}

extern "C" fn em_opt_rx_match1(ec: *mut Ec, cfp: *mut Cfp, idx: u32, s: Value) -> Value {
    let re = unsafe { cfp_ref(cfp) }.body().consts[idx as usize];
    ops::opt_regexp_match(unsafe { ec_ref(ec) }, re, s)
}

extern "C" fn em_defined(ec: *mut Ec, cfp: *mut Cfp, ty: u32, id: u32, v: Value) -> Value {
    let name = unsafe { cfp_ref(cfp) }.body().ids[id as usize].clone();
    let ec = unsafe { ec_ref(ec) };
    match vm::defined_desc(ec, ty as usize, &name, v) {
        Some(d) => ec.host.heap.alloc_frozen_string(d),
        None => Value::NIL,
    }
}

extern "C" fn em_check_match(ec: *mut Ec, target: Value, pattern: Value, flag: u32) -> Value {
    vm::check_match(unsafe { ec_ref(ec) }, pattern, target, flag as usize)
}

extern "C" fn em_check_keyword(cfp: *mut Cfp, bits: u32, kw: u32) -> Value {
    let ep = unsafe { cfp_ref(cfp) }.ep;
    let bits = unsafe { *ep.sub(bits as usize) };
    let given = bits.is_fixnum() && bits.as_fixnum() & (1 << kw) == 0;
    Value::boolean(given)
}

extern "C" fn em_block_param_proxy(ec: *mut Ec) -> Value {
    vm::block_for_current(unsafe { ec_ref(ec) })
}

extern "C" fn em_cc_invalid_p(ec: *mut Ec, cfp: *mut Cfp, ci: u32, recv: Value) -> u32 {
    let ec = unsafe { ec_ref(ec) };
    let body = unsafe { cfp_ref(cfp) }.body();
    let cc = &body.call_caches[ci as usize];
    if cc.method_idx.load(Ordering::Relaxed) == NO_METHOD {
        return 1;
    }
    let state_ok =
        ec.host.methods.method_state() == cc.method_state.load(Ordering::Relaxed);
    let serial_ok =
        ec.host.methods.class_serial(class_of(recv)) == cc.class_serial.load(Ordering::Relaxed);
    (!(state_ok && serial_ok)) as u32
}

extern "C" fn em_call_cached_native(ec: *mut Ec, cfp: *mut Cfp, ci: u32) -> Value {
    let ec = unsafe { ec_ref(ec) };
    let cfp = unsafe { cfp_ref(cfp) };
    let body = cfp.body();
    let argc = body.call_infos[ci as usize].argc as usize;
    let cc = &body.call_caches[ci as usize];
    let method_idx = cc.method_idx.load(Ordering::Relaxed);
    if method_idx == NO_METHOD || cc.method_kind.load(Ordering::Relaxed) != CC_KIND_NATIVE {
        return Value::UNDEF;
    }
    let f = match &ec.host.methods.method(method_idx).kind {
        MethodKind::Native(f) => *f,
        MethodKind::Iseq(_) => return Value::UNDEF,
    };
    unsafe {
        let recv = *cfp.sp.sub(argc + 1);
        let args = std::slice::from_raw_parts(cfp.sp.sub(argc), argc).to_vec();
        match f(ec, recv, &args) {
            Ok(v) => v,
            Err(e) => {
                ec.raise(e);
                Value::UNDEF
            }
        }
    }
}

extern "C" fn em_push_iseq_frame(ec: *mut Ec, cfp: *mut Cfp, ci: u32) -> u32 {
    let ec = unsafe { ec_ref(ec) };
    let cfp = unsafe { cfp_ref(cfp) };
    let body = cfp.body();
    let argc = body.call_infos[ci as usize].argc as usize;
    let cc = &body.call_caches[ci as usize];
    let method_idx = cc.method_idx.load(Ordering::Relaxed);
    if method_idx == NO_METHOD {
        ec.raise("stale call cache in generated code");
        return 0;
    }
    let callee = match &ec.host.methods.method(method_idx).kind {
        MethodKind::Iseq(b) => Some(b.clone()),
        MethodKind::Native(_) => None,
    };
    let Some(callee) = callee else {
        ec.raise("stale call cache in generated code");
        return 0;
    };
    let recv = unsafe { *cfp.sp.sub(argc + 1) };
    match ec.push_frame(callee, recv, argc, Value::NIL, method_idx, None) {
        Ok(()) => 1,
        Err(e) => {
            ec.raise(e);
            0
        }
    }
}

extern "C" fn em_call_general(ec: *mut Ec, _cfp: *mut Cfp, ci: u32, with_block: u32) -> Value {
    vm::vm_send_complete(unsafe { ec_ref(ec) }, ci as usize, with_block != 0)
}

extern "C" fn em_invokesuper(ec: *mut Ec, _cfp: *mut Cfp, ci: u32) -> Value {
    vm::vm_invokesuper_complete(unsafe { ec_ref(ec) }, ci as usize)
}

extern "C" fn em_invokeblock(ec: *mut Ec, _cfp: *mut Cfp, ci: u32) -> Value {
    vm::vm_invokeblock_complete(unsafe { ec_ref(ec) }, ci as usize)
}

extern "C" fn em_jit_exec(ec: *mut Ec) -> Value {
    vm::jit_exec(unsafe { ec_ref(ec) })
}

extern "C" fn em_exec_finish(ec: *mut Ec) -> Value {
    vm::exec_finish(unsafe { ec_ref(ec) })
}

fn splat_elems(v: Value) -> Vec<Value> {
    if v.is_heap() {
        if let ObjKind::Array(elems) = &unsafe { v.as_object() }.kind {
            return elems.clone();
        }
    }
    vec![v]
}

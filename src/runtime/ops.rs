//! Optimized-operator semantics. Each function mirrors one `Opt*`
//! instruction: it returns a real value when the receiver/argument shapes are
//! supported and the basic operation is unredefined, and `UNDEF` otherwise.
//! `UNDEF` makes the caller fall back: the interpreter re-dispatches a full
//! method call, generated code cancels to the interpreter.

use crate::runtime::context::ExecutionContext;
use crate::runtime::heap::{ObjKind, float_of, num_of, str_of, values_eql};
use crate::runtime::method::Bop;
use crate::runtime::value::Value;

fn bop_ok(ec: &ExecutionContext, bop: Bop) -> bool {
    !ec.host.methods.bop_redefined(bop)
}

pub fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && (a < 0) != (b < 0) { q - 1 } else { q }
}

pub fn floor_mod(a: i64, b: i64) -> i64 {
    let m = a % b;
    if m != 0 && (m < 0) != (b < 0) { m + b } else { m }
}

pub fn opt_plus(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    if !bop_ok(ec, Bop::Plus) {
        return Value::UNDEF;
    }
    if recv.is_fixnum() && obj.is_fixnum() {
        return match recv.as_fixnum().checked_add(obj.as_fixnum()) {
            Some(n) => Value::fixnum(n),
            None => Value::UNDEF,
        };
    }
    if let (Some(a), Some(b)) = (num_of(recv), num_of(obj)) {
        return ec.host.heap.alloc_float(a + b);
    }
    if let (Some(a), Some(b)) = (str_of(recv), str_of(obj)) {
        let s = format!("{}{}", a, b);
        return ec.host.heap.alloc_string(s);
    }
    if recv.is_heap() && obj.is_heap() {
        let (ra, rb) = unsafe { (recv.as_object(), obj.as_object()) };
        if let (ObjKind::Array(a), ObjKind::Array(b)) = (&ra.kind, &rb.kind) {
            let mut out = a.clone();
            out.extend_from_slice(b);
            return ec.host.heap.alloc_array(out);
        }
    }
    Value::UNDEF
}

fn both_fixnum(a: Value, b: Value) -> bool {
    a.is_fixnum() && b.is_fixnum()
}

fn float_involved(a: Value, b: Value) -> bool {
    float_of(a).is_some() || float_of(b).is_some()
}

pub fn opt_minus(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    if !bop_ok(ec, Bop::Minus) {
        return Value::UNDEF;
    }
    if both_fixnum(recv, obj) {
        return match recv.as_fixnum().checked_sub(obj.as_fixnum()) {
            Some(n) => Value::fixnum(n),
            None => Value::UNDEF,
        };
    }
    if float_involved(recv, obj) {
        if let (Some(a), Some(b)) = (num_of(recv), num_of(obj)) {
            return ec.host.heap.alloc_float(a - b);
        }
    }
    Value::UNDEF
}

pub fn opt_mult(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    if !bop_ok(ec, Bop::Mult) {
        return Value::UNDEF;
    }
    if both_fixnum(recv, obj) {
        return match recv.as_fixnum().checked_mul(obj.as_fixnum()) {
            Some(n) => Value::fixnum(n),
            None => Value::UNDEF,
        };
    }
    if float_involved(recv, obj) {
        if let (Some(a), Some(b)) = (num_of(recv), num_of(obj)) {
            return ec.host.heap.alloc_float(a * b);
        }
    }
    Value::UNDEF
}

pub fn opt_div(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    if !bop_ok(ec, Bop::Div) {
        return Value::UNDEF;
    }
    if both_fixnum(recv, obj) {
        if obj.as_fixnum() == 0 {
            return Value::UNDEF;
        }
        return Value::fixnum(floor_div(recv.as_fixnum(), obj.as_fixnum()));
    }
    if float_involved(recv, obj) {
        if let (Some(a), Some(b)) = (num_of(recv), num_of(obj)) {
            return ec.host.heap.alloc_float(a / b);
        }
    }
    Value::UNDEF
}

pub fn opt_mod(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    if !bop_ok(ec, Bop::Mod) {
        return Value::UNDEF;
    }
    if both_fixnum(recv, obj) {
        if obj.as_fixnum() == 0 {
            return Value::UNDEF;
        }
        return Value::fixnum(floor_mod(recv.as_fixnum(), obj.as_fixnum()));
    }
    if float_involved(recv, obj) {
        if let (Some(a), Some(b)) = (num_of(recv), num_of(obj)) {
            let m = a - b * (a / b).floor();
            return ec.host.heap.alloc_float(m);
        }
    }
    Value::UNDEF
}

pub fn opt_eq(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    if !bop_ok(ec, Bop::Eq) {
        return Value::UNDEF;
    }
    Value::boolean(values_eql(recv, obj))
}

pub fn opt_neq(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    if !bop_ok(ec, Bop::Neq) || !bop_ok(ec, Bop::Eq) {
        return Value::UNDEF;
    }
    Value::boolean(!values_eql(recv, obj))
}

fn numeric_cmp(ec: &ExecutionContext, bop: Bop, recv: Value, obj: Value) -> Option<std::cmp::Ordering> {
    if !bop_ok(ec, bop) {
        return None;
    }
    if both_fixnum(recv, obj) {
        return Some(recv.as_fixnum().cmp(&obj.as_fixnum()));
    }
    if let (Some(a), Some(b)) = (num_of(recv), num_of(obj)) {
        return a.partial_cmp(&b);
    }
    None
}

pub fn opt_lt(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    match numeric_cmp(ec, Bop::Lt, recv, obj) {
        Some(o) => Value::boolean(o.is_lt()),
        None => Value::UNDEF,
    }
}

pub fn opt_le(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    match numeric_cmp(ec, Bop::Le, recv, obj) {
        Some(o) => Value::boolean(o.is_le()),
        None => Value::UNDEF,
    }
}

pub fn opt_gt(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    match numeric_cmp(ec, Bop::Gt, recv, obj) {
        Some(o) => Value::boolean(o.is_gt()),
        None => Value::UNDEF,
    }
}

pub fn opt_ge(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    match numeric_cmp(ec, Bop::Ge, recv, obj) {
        Some(o) => Value::boolean(o.is_ge()),
        None => Value::UNDEF,
    }
}

pub fn opt_ltlt(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    if !bop_ok(ec, Bop::LtLt) {
        return Value::UNDEF;
    }
    push_impl(recv, obj)
}

/// `<<` without the redefinition guard; the builtin fallback uses this.
pub fn push_impl(recv: Value, obj: Value) -> Value {
    if !recv.is_heap() {
        return Value::UNDEF;
    }
    let robj = unsafe { recv.as_object_mut() };
    match &mut robj.kind {
        ObjKind::Array(elems) => {
            elems.push(obj);
            recv
        }
        ObjKind::Str { s, frozen } => {
            if *frozen {
                return Value::UNDEF;
            }
            match str_of(obj) {
                Some(o) => {
                    s.push_str(o);
                    recv
                }
                None => Value::UNDEF,
            }
        }
        _ => Value::UNDEF,
    }
}

/// Array element lookup with negative-index and out-of-range-to-nil rules.
pub fn ary_entry(elems: &[Value], offset: i64) -> Value {
    let len = elems.len() as i64;
    let idx = if offset < 0 { offset + len } else { offset };
    if idx < 0 || idx >= len {
        Value::NIL
    } else {
        elems[idx as usize]
    }
}

pub fn opt_aref(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    if !bop_ok(ec, Bop::Aref) {
        return Value::UNDEF;
    }
    aref_impl(recv, obj)
}

pub fn aref_impl(recv: Value, obj: Value) -> Value {
    if !recv.is_heap() {
        return Value::UNDEF;
    }
    let robj = unsafe { recv.as_object() };
    match &robj.kind {
        ObjKind::Array(elems) if obj.is_fixnum() => ary_entry(elems, obj.as_fixnum()),
        ObjKind::Hash(pairs) => {
            crate::runtime::heap::hash_lookup(pairs, obj).unwrap_or(Value::NIL)
        }
        _ => Value::UNDEF,
    }
}

pub fn opt_aset(ec: &mut ExecutionContext, recv: Value, key: Value, val: Value) -> Value {
    if !bop_ok(ec, Bop::Aset) {
        return Value::UNDEF;
    }
    aset_impl(recv, key, val)
}

pub fn aset_impl(recv: Value, key: Value, val: Value) -> Value {
    if !recv.is_heap() {
        return Value::UNDEF;
    }
    let robj = unsafe { recv.as_object_mut() };
    match &mut robj.kind {
        ObjKind::Array(elems) if key.is_fixnum() => {
            let len = elems.len() as i64;
            let mut idx = key.as_fixnum();
            if idx < 0 {
                idx += len;
                if idx < 0 {
                    return Value::UNDEF;
                }
            }
            let idx = idx as usize;
            if idx >= elems.len() {
                elems.resize(idx + 1, Value::NIL);
            }
            elems[idx] = val;
            val
        }
        ObjKind::Hash(pairs) => {
            if let Some(slot) = pairs.iter_mut().find(|(k, _)| values_eql(*k, key)) {
                slot.1 = val;
            } else {
                pairs.push((key, val));
            }
            val
        }
        _ => Value::UNDEF,
    }
}

pub fn opt_length(ec: &mut ExecutionContext, recv: Value) -> Value {
    if !bop_ok(ec, Bop::Length) || !recv.is_heap() {
        return Value::UNDEF;
    }
    collection_size(recv)
}

pub fn opt_size(ec: &mut ExecutionContext, recv: Value) -> Value {
    if !bop_ok(ec, Bop::Size) || !recv.is_heap() {
        return Value::UNDEF;
    }
    collection_size(recv)
}

pub fn collection_size(recv: Value) -> Value {
    let robj = unsafe { recv.as_object() };
    match &robj.kind {
        ObjKind::Str { s, .. } => Value::fixnum(s.chars().count() as i64),
        ObjKind::Array(elems) => Value::fixnum(elems.len() as i64),
        ObjKind::Hash(pairs) => Value::fixnum(pairs.len() as i64),
        _ => Value::UNDEF,
    }
}

pub fn opt_empty_p(ec: &mut ExecutionContext, recv: Value) -> Value {
    if !bop_ok(ec, Bop::EmptyP) || !recv.is_heap() {
        return Value::UNDEF;
    }
    match collection_size(recv) {
        Value::UNDEF => Value::UNDEF,
        n => Value::boolean(n.as_fixnum() == 0),
    }
}

pub fn opt_succ(ec: &mut ExecutionContext, recv: Value) -> Value {
    if !bop_ok(ec, Bop::Succ) {
        return Value::UNDEF;
    }
    if recv.is_fixnum() {
        return match recv.as_fixnum().checked_add(1) {
            Some(n) => Value::fixnum(n),
            None => Value::UNDEF,
        };
    }
    Value::UNDEF
}

pub fn opt_not(ec: &mut ExecutionContext, recv: Value) -> Value {
    if !bop_ok(ec, Bop::Not) {
        return Value::UNDEF;
    }
    Value::boolean(!recv.test())
}

pub fn opt_regexp_match(ec: &mut ExecutionContext, recv: Value, obj: Value) -> Value {
    if !bop_ok(ec, Bop::Match) {
        return Value::UNDEF;
    }
    let (re_val, str_val) = if is_regexp(recv) { (recv, obj) } else { (obj, recv) };
    if !is_regexp(re_val) {
        return Value::UNDEF;
    }
    let Some(s) = str_of(str_val) else {
        return Value::UNDEF;
    };
    let robj = unsafe { re_val.as_object() };
    match &robj.kind {
        ObjKind::Regexp { re, .. } => match re.find(s) {
            Some(m) => Value::fixnum(s[..m.start()].chars().count() as i64),
            None => Value::NIL,
        },
        _ => Value::UNDEF,
    }
}

fn is_regexp(v: Value) -> bool {
    v.is_heap() && matches!(unsafe { v.as_object() }.kind, ObjKind::Regexp { .. })
}

pub fn opt_str_freeze(ec: &mut ExecutionContext, pooled: Value) -> Value {
    if !bop_ok(ec, Bop::Freeze) {
        return Value::UNDEF;
    }
    pooled
}

pub fn opt_str_uminus(ec: &mut ExecutionContext, pooled: Value) -> Value {
    if !bop_ok(ec, Bop::UMinus) {
        return Value::UNDEF;
    }
    pooled
}

/// `pattern === target`, as used by `CheckMatch` and case dispatch misses.
pub fn case_eq(_ec: &mut ExecutionContext, pattern: Value, target: Value) -> Value {
    if pattern.is_heap() {
        let robj = unsafe { pattern.as_object() };
        match &robj.kind {
            ObjKind::Range { beg, end, excl } => {
                return range_cover(*beg, *end, *excl, target);
            }
            ObjKind::Regexp { re, .. } => {
                return match str_of(target) {
                    Some(s) => Value::boolean(re.is_match(s)),
                    None => Value::FALSE,
                };
            }
            _ => {}
        }
    }
    Value::boolean(values_eql(pattern, target))
}

fn range_cover(beg: Value, end: Value, excl: bool, v: Value) -> Value {
    let (Some(b), Some(e), Some(x)) = (num_of(beg), num_of(end), num_of(v)) else {
        return Value::FALSE;
    };
    Value::boolean(x >= b && if excl { x < e } else { x <= e })
}

/// `to_s` rendering used by `ToString`, `ConcatStrings`, and `puts`.
pub fn value_to_s(ec: &ExecutionContext, v: Value) -> String {
    if v.is_nil() {
        return String::new();
    }
    if v == Value::TRUE {
        return "true".to_string();
    }
    if v == Value::FALSE {
        return "false".to_string();
    }
    if v.is_fixnum() {
        return v.as_fixnum().to_string();
    }
    if v.is_static_symbol() {
        return ec
            .host
            .symbol_name(v.as_symbol_id())
            .unwrap_or("?")
            .to_string();
    }
    let robj = unsafe { v.as_object() };
    match &robj.kind {
        ObjKind::Str { s, .. } => s.clone(),
        ObjKind::Float(f) => {
            if f.fract() == 0.0 && f.is_finite() {
                format!("{:.1}", f)
            } else {
                format!("{}", f)
            }
        }
        ObjKind::Array(elems) => {
            let parts: Vec<String> = elems.iter().map(|e| value_to_s(ec, *e)).collect();
            format!("[{}]", parts.join(", "))
        }
        ObjKind::Hash(pairs) => format!("{{{} pairs}}", pairs.len()),
        ObjKind::Range { beg, end, excl } => format!(
            "{}{}{}",
            value_to_s(ec, *beg),
            if *excl { "..." } else { ".." },
            value_to_s(ec, *end)
        ),
        ObjKind::Regexp { source, .. } => format!("/{}/", source),
        ObjKind::Proc { .. } => "#<Proc>".to_string(),
    }
}


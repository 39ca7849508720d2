use crate::runtime::context::ExecutionContext;
use crate::runtime::heap::{ClassId, str_of};
use crate::runtime::method::Visibility;
use crate::runtime::ops::*;
use crate::runtime::value::Value;

fn ec() -> Box<ExecutionContext> {
    ExecutionContext::new()
}

#[test]
fn fixnum_arithmetic() {
    let mut ec = ec();
    assert_eq!(opt_plus(&mut ec, Value::fixnum(1), Value::fixnum(2)), Value::fixnum(3));
    assert_eq!(opt_minus(&mut ec, Value::fixnum(1), Value::fixnum(2)), Value::fixnum(-1));
    assert_eq!(opt_mult(&mut ec, Value::fixnum(3), Value::fixnum(4)), Value::fixnum(12));
    assert_eq!(opt_div(&mut ec, Value::fixnum(7), Value::fixnum(2)), Value::fixnum(3));
    assert_eq!(opt_mod(&mut ec, Value::fixnum(7), Value::fixnum(2)), Value::fixnum(1));
}

#[test]
fn division_follows_floor_semantics() {
    let mut ec = ec();
    assert_eq!(opt_div(&mut ec, Value::fixnum(-7), Value::fixnum(2)), Value::fixnum(-4));
    assert_eq!(opt_div(&mut ec, Value::fixnum(7), Value::fixnum(-2)), Value::fixnum(-4));
    assert_eq!(opt_mod(&mut ec, Value::fixnum(-7), Value::fixnum(2)), Value::fixnum(1));
    assert_eq!(opt_mod(&mut ec, Value::fixnum(7), Value::fixnum(-2)), Value::fixnum(-1));
}

#[test]
fn division_by_zero_deoptimizes() {
    let mut ec = ec();
    assert_eq!(opt_div(&mut ec, Value::fixnum(1), Value::fixnum(0)), Value::UNDEF);
    assert_eq!(opt_mod(&mut ec, Value::fixnum(1), Value::fixnum(0)), Value::UNDEF);
}

#[test]
fn overflow_deoptimizes() {
    let mut ec = ec();
    let max = Value::fixnum(i64::MAX >> 1);
    assert_eq!(opt_plus(&mut ec, max, Value::fixnum(i64::MAX >> 1)), Value::UNDEF);
}

#[test]
fn string_plus_concatenates() {
    let mut ec = ec();
    let a = ec.host.heap.alloc_string("foo");
    let b = ec.host.heap.alloc_string("bar");
    let out = opt_plus(&mut ec, a, b);
    assert_eq!(str_of(out), Some("foobar"));
    // operands untouched
    assert_eq!(str_of(a), Some("foo"));
}

#[test]
fn redefined_bop_deoptimizes() {
    fn nop(
        _: &mut ExecutionContext,
        _: Value,
        _: &[Value],
    ) -> Result<Value, String> {
        Ok(Value::NIL)
    }
    let mut ec = ec();
    assert_eq!(opt_plus(&mut ec, Value::fixnum(1), Value::fixnum(1)), Value::fixnum(2));
    ec.host
        .methods
        .define_native(ClassId::Integer, "+", Visibility::Public, nop);
    assert_eq!(opt_plus(&mut ec, Value::fixnum(1), Value::fixnum(1)), Value::UNDEF);
}

#[test]
fn comparisons() {
    let mut ec = ec();
    assert_eq!(opt_lt(&mut ec, Value::fixnum(1), Value::fixnum(2)), Value::TRUE);
    assert_eq!(opt_ge(&mut ec, Value::fixnum(1), Value::fixnum(2)), Value::FALSE);
    assert_eq!(opt_eq(&mut ec, Value::fixnum(5), Value::fixnum(5)), Value::TRUE);
    assert_eq!(opt_neq(&mut ec, Value::NIL, Value::FALSE), Value::TRUE);
}

#[test]
fn float_mix_promotes() {
    let mut ec = ec();
    let f = ec.host.heap.alloc_float(1.5);
    let out = opt_plus(&mut ec, f, Value::fixnum(2));
    assert_eq!(crate::runtime::heap::float_of(out), Some(3.5));
}

#[test]
fn aref_and_aset_on_arrays() {
    let mut ec = ec();
    let ary = ec
        .host
        .heap
        .alloc_array(vec![Value::fixnum(10), Value::fixnum(20)]);
    assert_eq!(opt_aref(&mut ec, ary, Value::fixnum(0)), Value::fixnum(10));
    assert_eq!(opt_aref(&mut ec, ary, Value::fixnum(-1)), Value::fixnum(20));
    assert_eq!(opt_aref(&mut ec, ary, Value::fixnum(9)), Value::NIL);

    assert_eq!(opt_aset(&mut ec, ary, Value::fixnum(3), Value::TRUE), Value::TRUE);
    assert_eq!(opt_aref(&mut ec, ary, Value::fixnum(2)), Value::NIL);
    assert_eq!(opt_aref(&mut ec, ary, Value::fixnum(3)), Value::TRUE);
}

#[test]
fn hash_aref_aset() {
    let mut ec = ec();
    let h = ec.host.heap.alloc_hash(vec![]);
    let k = Value::fixnum(1);
    assert_eq!(opt_aref(&mut ec, h, k), Value::NIL);
    opt_aset(&mut ec, h, k, Value::fixnum(99));
    assert_eq!(opt_aref(&mut ec, h, k), Value::fixnum(99));
}

#[test]
fn length_empty_succ_not() {
    let mut ec = ec();
    let s = ec.host.heap.alloc_string("abc");
    assert_eq!(opt_length(&mut ec, s), Value::fixnum(3));
    assert_eq!(opt_empty_p(&mut ec, s), Value::FALSE);
    assert_eq!(opt_succ(&mut ec, Value::fixnum(9)), Value::fixnum(10));
    assert_eq!(opt_not(&mut ec, Value::NIL), Value::TRUE);
    assert_eq!(opt_not(&mut ec, Value::fixnum(0)), Value::FALSE);
}

#[test]
fn regexp_match_returns_char_index() {
    let mut ec = ec();
    let re = ec.host.heap.alloc_regexp("b+").unwrap();
    let s = ec.host.heap.alloc_string("aabbb");
    assert_eq!(opt_regexp_match(&mut ec, s, re), Value::fixnum(2));
    assert_eq!(opt_regexp_match(&mut ec, re, s), Value::fixnum(2));
    let miss = ec.host.heap.alloc_string("zzz");
    assert_eq!(opt_regexp_match(&mut ec, miss, re), Value::NIL);
}

#[test]
fn case_eq_ranges_and_values() {
    let mut ec = ec();
    let r = ec
        .host
        .heap
        .alloc_range(Value::fixnum(1), Value::fixnum(5), false);
    assert_eq!(case_eq(&mut ec, r, Value::fixnum(5)), Value::TRUE);
    let rx = ec
        .host
        .heap
        .alloc_range(Value::fixnum(1), Value::fixnum(5), true);
    assert_eq!(case_eq(&mut ec, rx, Value::fixnum(5)), Value::FALSE);
    assert_eq!(case_eq(&mut ec, Value::fixnum(3), Value::fixnum(3)), Value::TRUE);
}

#[test]
fn to_s_renders_values() {
    let mut ec = ec();
    assert_eq!(value_to_s(&ec, Value::fixnum(42)), "42");
    assert_eq!(value_to_s(&ec, Value::NIL), "");
    let sym = ec.host.intern("taken");
    assert_eq!(value_to_s(&ec, sym), "taken");
    let f = ec.host.heap.alloc_float(2.0);
    assert_eq!(value_to_s(&ec, f), "2.0");
}

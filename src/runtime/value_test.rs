use crate::runtime::value::Value;

#[test]
fn special_constants_are_distinct() {
    let all = [Value::NIL, Value::FALSE, Value::TRUE, Value::UNDEF];
    for (i, a) in all.iter().enumerate() {
        for (j, b) in all.iter().enumerate() {
            assert_eq!(i == j, a == b);
        }
    }
}

#[test]
fn fixnum_round_trip() {
    for n in [0i64, 1, -1, 42, -42, i64::MAX >> 1, i64::MIN >> 1] {
        let v = Value::fixnum(n);
        assert!(v.is_fixnum());
        assert_eq!(v.as_fixnum(), n);
        assert!(!v.is_heap());
    }
}

#[test]
fn fixnum_zero_is_not_false() {
    assert!(Value::fixnum(0).test());
    assert_ne!(Value::fixnum(0), Value::FALSE);
}

#[test]
fn symbol_round_trip() {
    let v = Value::symbol(7);
    assert!(v.is_static_symbol());
    assert_eq!(v.as_symbol_id(), 7);
    assert!(!v.is_fixnum());
    assert!(!v.is_heap());
}

#[test]
fn truthiness() {
    assert!(!Value::NIL.test());
    assert!(!Value::FALSE.test());
    assert!(Value::TRUE.test());
    assert!(Value::fixnum(-3).test());
    assert!(Value::symbol(0).test());
}

#[test]
fn undef_is_not_a_program_value() {
    assert!(Value::UNDEF.is_special_const());
    assert!(!Value::UNDEF.is_fixnum());
    assert!(!Value::UNDEF.is_static_symbol());
    assert!(!Value::UNDEF.is_nil());
}

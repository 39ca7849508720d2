use crate::runtime::context::ExecutionContext;
use crate::runtime::heap::ClassId;
use crate::runtime::method::{Bop, MethodTable, Visibility};
use crate::runtime::value::Value;

fn nop(_: &mut ExecutionContext, _: Value, _: &[Value]) -> Result<Value, String> {
    Ok(Value::NIL)
}

#[test]
fn search_falls_back_to_object() {
    let mut mt = MethodTable::new();
    mt.define_builtin(ClassId::Object, "greet", Visibility::Public, nop);
    assert!(mt.search(ClassId::Integer, "greet").is_some());
    assert!(mt.search(ClassId::Integer, "missing").is_none());
}

#[test]
fn definition_bumps_state_and_serial() {
    let mut mt = MethodTable::new();
    let state = mt.method_state();
    let serial = mt.class_serial(ClassId::String);
    mt.define_native(ClassId::String, "shout", Visibility::Public, nop);
    assert!(mt.method_state() > state);
    assert!(mt.class_serial(ClassId::String) > serial);
    // other classes keep their serial
    assert_eq!(mt.class_serial(ClassId::Array), serial);
}

#[test]
fn builtin_registration_does_not_redefine_bops() {
    let mut mt = MethodTable::new();
    mt.define_builtin(ClassId::Integer, "+", Visibility::Public, nop);
    assert!(!mt.bop_redefined(Bop::Plus));
}

#[test]
fn user_definition_redefines_bop() {
    let mut mt = MethodTable::new();
    mt.define_builtin(ClassId::Integer, "+", Visibility::Public, nop);
    mt.define_native(ClassId::Integer, "+", Visibility::Public, nop);
    assert!(mt.bop_redefined(Bop::Plus));
    assert!(!mt.bop_redefined(Bop::Minus));
}

#[test]
fn redefinition_shadows_previous_method() {
    fn one(_: &mut ExecutionContext, _: Value, _: &[Value]) -> Result<Value, String> {
        Ok(Value::fixnum(1))
    }
    fn two(_: &mut ExecutionContext, _: Value, _: &[Value]) -> Result<Value, String> {
        Ok(Value::fixnum(2))
    }
    let mut mt = MethodTable::new();
    mt.define_builtin(ClassId::Object, "pick", Visibility::Public, one);
    mt.define_native(ClassId::Object, "pick", Visibility::Public, two);
    let (idx, m) = mt.search(ClassId::Object, "pick").unwrap();
    assert_eq!(m.name, "pick");
    assert_eq!(mt.method(idx).name, "pick");
}

//! Native method registrations for the built-in classes. These are the full
//! (raising) counterparts of the optimized-operator fast paths: when an
//! `Opt*` instruction deoptimizes, dispatch lands here.

use crate::runtime::context::ExecutionContext;
use crate::runtime::heap::{ClassId, ObjKind, float_of, str_of, values_eql};
use crate::runtime::method::{MethodTable, Visibility};
use crate::runtime::ops;
use crate::runtime::value::Value;

pub fn register_builtins(mt: &mut MethodTable) {
    use ClassId::*;
    mt.define_builtin(Object, "puts", Visibility::Private, object_puts);
    mt.define_builtin(Object, "==", Visibility::Public, object_eq);
    mt.define_builtin(Object, "!=", Visibility::Public, object_neq);
    mt.define_builtin(Object, "!", Visibility::Public, object_not);
    mt.define_builtin(Object, "freeze", Visibility::Public, object_freeze);
    mt.define_builtin(Object, "inspect", Visibility::Public, object_to_s);
    mt.define_builtin(Object, "to_s", Visibility::Public, object_to_s);

    mt.define_builtin(Integer, "+", Visibility::Public, int_add);
    mt.define_builtin(Integer, "-", Visibility::Public, int_sub);
    mt.define_builtin(Integer, "*", Visibility::Public, int_mul);
    mt.define_builtin(Integer, "/", Visibility::Public, int_div);
    mt.define_builtin(Integer, "%", Visibility::Public, int_mod);
    mt.define_builtin(Integer, "<", Visibility::Public, num_lt);
    mt.define_builtin(Integer, "<=", Visibility::Public, num_le);
    mt.define_builtin(Integer, ">", Visibility::Public, num_gt);
    mt.define_builtin(Integer, ">=", Visibility::Public, num_ge);
    mt.define_builtin(Integer, "succ", Visibility::Public, int_succ);
    mt.define_builtin(Float, "+", Visibility::Public, int_add);
    mt.define_builtin(Float, "-", Visibility::Public, int_sub);
    mt.define_builtin(Float, "*", Visibility::Public, int_mul);
    mt.define_builtin(Float, "/", Visibility::Public, int_div);
    mt.define_builtin(Float, "<", Visibility::Public, num_lt);
    mt.define_builtin(Float, "<=", Visibility::Public, num_le);
    mt.define_builtin(Float, ">", Visibility::Public, num_gt);
    mt.define_builtin(Float, ">=", Visibility::Public, num_ge);

    mt.define_builtin(String, "+", Visibility::Public, str_add);
    mt.define_builtin(String, "<<", Visibility::Public, any_push);
    mt.define_builtin(String, "length", Visibility::Public, any_length);
    mt.define_builtin(String, "size", Visibility::Public, any_length);
    mt.define_builtin(String, "empty?", Visibility::Public, any_empty);
    mt.define_builtin(String, "freeze", Visibility::Public, str_freeze);

    mt.define_builtin(Array, "[]", Visibility::Public, any_aref);
    mt.define_builtin(Array, "[]=", Visibility::Public, any_aset);
    mt.define_builtin(Array, "<<", Visibility::Public, any_push);
    mt.define_builtin(Array, "length", Visibility::Public, any_length);
    mt.define_builtin(Array, "size", Visibility::Public, any_length);
    mt.define_builtin(Array, "empty?", Visibility::Public, any_empty);

    mt.define_builtin(Hash, "[]", Visibility::Public, any_aref);
    mt.define_builtin(Hash, "[]=", Visibility::Public, any_aset);
    mt.define_builtin(Hash, "length", Visibility::Public, any_length);
    mt.define_builtin(Hash, "size", Visibility::Public, any_length);
    mt.define_builtin(Hash, "empty?", Visibility::Public, any_empty);
}

fn arity(args: &[Value], n: usize) -> Result<(), String> {
    if args.len() != n {
        return Err(format!(
            "wrong number of arguments (given {}, expected {})",
            args.len(),
            n
        ));
    }
    Ok(())
}

fn object_puts(ec: &mut ExecutionContext, _recv: Value, args: &[Value]) -> Result<Value, String> {
    if args.is_empty() {
        write_line(ec, String::new());
    }
    for a in args {
        let line = ops::value_to_s(ec, *a);
        write_line(ec, line);
    }
    Ok(Value::NIL)
}

fn write_line(ec: &mut ExecutionContext, line: String) {
    if ec.host.echo_output {
        println!("{}", line);
    }
    ec.host.output.push(line);
}

fn object_eq(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(Value::boolean(values_eql(recv, args[0])))
}

fn object_neq(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(Value::boolean(!values_eql(recv, args[0])))
}

fn object_not(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 0)?;
    Ok(Value::boolean(!recv.test()))
}

fn object_freeze(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 0)?;
    Ok(recv)
}

fn object_to_s(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 0)?;
    let s = ops::value_to_s(ec, recv);
    Ok(ec.host.heap.alloc_string(s))
}

fn num2(recv: Value, args: &[Value]) -> Result<(Value, Value), String> {
    arity(args, 1)?;
    Ok((recv, args[0]))
}

fn numeric_type_error(ec: &ExecutionContext, v: Value) -> String {
    format!("{} can't be coerced into Numeric", ops::value_to_s(ec, v))
}

fn int_add(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    let (a, b) = num2(recv, args)?;
    if a.is_fixnum() && b.is_fixnum() {
        return a
            .as_fixnum()
            .checked_add(b.as_fixnum())
            .map(Value::fixnum)
            .ok_or_else(|| "integer overflow".to_string());
    }
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return Ok(ec.host.heap.alloc_float(x + y));
    }
    if let (Some(x), Some(y)) = (str_of(a), str_of(b)) {
        let s = format!("{}{}", x, y);
        return Ok(ec.host.heap.alloc_string(s));
    }
    Err(numeric_type_error(ec, b))
}

fn int_sub(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    let (a, b) = num2(recv, args)?;
    if a.is_fixnum() && b.is_fixnum() {
        return a
            .as_fixnum()
            .checked_sub(b.as_fixnum())
            .map(Value::fixnum)
            .ok_or_else(|| "integer overflow".to_string());
    }
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return Ok(ec.host.heap.alloc_float(x - y));
    }
    Err(numeric_type_error(ec, b))
}

fn int_mul(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    let (a, b) = num2(recv, args)?;
    if a.is_fixnum() && b.is_fixnum() {
        return a
            .as_fixnum()
            .checked_mul(b.as_fixnum())
            .map(Value::fixnum)
            .ok_or_else(|| "integer overflow".to_string());
    }
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return Ok(ec.host.heap.alloc_float(x * y));
    }
    Err(numeric_type_error(ec, b))
}

fn int_div(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    let (a, b) = num2(recv, args)?;
    if a.is_fixnum() && b.is_fixnum() {
        if b.as_fixnum() == 0 {
            return Err("divided by 0".to_string());
        }
        return Ok(Value::fixnum(ops::floor_div(a.as_fixnum(), b.as_fixnum())));
    }
    if let (Some(x), Some(y)) = (as_num(a), as_num(b)) {
        return Ok(ec.host.heap.alloc_float(x / y));
    }
    Err(numeric_type_error(ec, b))
}

fn int_mod(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    let (a, b) = num2(recv, args)?;
    if a.is_fixnum() && b.is_fixnum() {
        if b.as_fixnum() == 0 {
            return Err("divided by 0".to_string());
        }
        return Ok(Value::fixnum(ops::floor_mod(a.as_fixnum(), b.as_fixnum())));
    }
    Err(numeric_type_error(ec, b))
}

fn as_num(v: Value) -> Option<f64> {
    if v.is_fixnum() {
        Some(v.as_fixnum() as f64)
    } else {
        float_of(v)
    }
}

fn num_cmp(ec: &ExecutionContext, recv: Value, args: &[Value]) -> Result<std::cmp::Ordering, String> {
    arity(args, 1)?;
    match (as_num(recv), as_num(args[0])) {
        (Some(a), Some(b)) => a
            .partial_cmp(&b)
            .ok_or_else(|| "comparison failed".to_string()),
        _ => Err(format!(
            "comparison of Numeric with {} failed",
            ops::value_to_s(ec, args[0])
        )),
    }
}

fn num_lt(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    Ok(Value::boolean(num_cmp(ec, recv, args)?.is_lt()))
}

fn num_le(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    Ok(Value::boolean(num_cmp(ec, recv, args)?.is_le()))
}

fn num_gt(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    Ok(Value::boolean(num_cmp(ec, recv, args)?.is_gt()))
}

fn num_ge(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    Ok(Value::boolean(num_cmp(ec, recv, args)?.is_ge()))
}

fn int_succ(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 0)?;
    recv.as_fixnum()
        .checked_add(1)
        .map(Value::fixnum)
        .ok_or_else(|| "integer overflow".to_string())
}

fn str_add(ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    match (str_of(recv), str_of(args[0])) {
        (Some(a), Some(b)) => {
            let s = format!("{}{}", a, b);
            Ok(ec.host.heap.alloc_string(s))
        }
        _ => Err("no implicit conversion into String".to_string()),
    }
}

fn str_freeze(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 0)?;
    if let ObjKind::Str { frozen, .. } = &mut unsafe { recv.as_object_mut() }.kind {
        *frozen = true;
    }
    Ok(recv)
}

fn any_push(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    let v = ops::push_impl(recv, args[0]);
    if v.is_undef() {
        return Err("can't append to receiver".to_string());
    }
    Ok(v)
}

fn any_aref(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    let v = ops::aref_impl(recv, args[0]);
    if v.is_undef() {
        return Err("bad index".to_string());
    }
    Ok(v)
}

fn any_aset(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    let v = ops::aset_impl(recv, args[0], args[1]);
    if v.is_undef() {
        return Err("index out of range".to_string());
    }
    Ok(v)
}

fn any_length(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 0)?;
    if !recv.is_heap() {
        return Err("receiver has no length".to_string());
    }
    let v = ops::collection_size(recv);
    if v.is_undef() {
        return Err("receiver has no length".to_string());
    }
    Ok(v)
}

fn any_empty(_ec: &mut ExecutionContext, recv: Value, args: &[Value]) -> Result<Value, String> {
    arity(args, 0)?;
    if !recv.is_heap() {
        return Err("receiver has no size".to_string());
    }
    let v = ops::collection_size(recv);
    if v.is_undef() {
        return Err("receiver has no size".to_string());
    }
    Ok(Value::boolean(v.as_fixnum() == 0))
}

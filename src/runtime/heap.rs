use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::bytecode::iseq::IseqBody;
use crate::runtime::value::Value;

/// Built-in classes. `DefineClass` is not compilable, so the class set is
/// closed; host embedders hang extra methods off `Object`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ClassId {
    Object = 0,
    NilClass,
    TrueClass,
    FalseClass,
    Integer,
    Float,
    Symbol,
    String,
    Array,
    Hash,
    Range,
    Regexp,
    Proc,
}

pub const CLASS_COUNT: usize = ClassId::Proc as usize + 1;

pub fn class_of(v: Value) -> ClassId {
    if v.is_fixnum() {
        ClassId::Integer
    } else if v.is_static_symbol() {
        ClassId::Symbol
    } else if v == Value::NIL {
        ClassId::NilClass
    } else if v == Value::TRUE {
        ClassId::TrueClass
    } else if v == Value::FALSE {
        ClassId::FalseClass
    } else {
        unsafe { v.as_object() }.class
    }
}

pub enum ObjKind {
    Str { s: String, frozen: bool },
    Array(Vec<Value>),
    Hash(Vec<(Value, Value)>),
    Range { beg: Value, end: Value, excl: bool },
    Regexp { source: String, re: Regex },
    Float(f64),
    Proc { iseq: Arc<IseqBody>, self_val: Value, ep: *mut Value },
}

pub struct RObject {
    pub class: ClassId,
    pub kind: ObjKind,
    pub ivars: HashMap<String, Value>,
}

/// Owns every heap object for the lifetime of the host. Objects have stable
/// addresses (boxed) and are freed when the heap drops. Collection cycles are
/// driven by the host and only exist to exercise the engine's GC hooks; see
/// DESIGN.md.
#[derive(Default)]
pub struct Heap {
    objects: Vec<Box<RObject>>,
    pub gc_count: u64,
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    pub fn alloc(&mut self, class: ClassId, kind: ObjKind) -> Value {
        let obj = Box::new(RObject {
            class,
            kind,
            ivars: HashMap::new(),
        });
        let ptr: *const RObject = &*obj;
        self.objects.push(obj);
        Value::object(ptr)
    }

    pub fn alloc_string(&mut self, s: impl Into<String>) -> Value {
        self.alloc(
            ClassId::String,
            ObjKind::Str {
                s: s.into(),
                frozen: false,
            },
        )
    }

    pub fn alloc_frozen_string(&mut self, s: impl Into<String>) -> Value {
        self.alloc(
            ClassId::String,
            ObjKind::Str {
                s: s.into(),
                frozen: true,
            },
        )
    }

    pub fn alloc_array(&mut self, elems: Vec<Value>) -> Value {
        self.alloc(ClassId::Array, ObjKind::Array(elems))
    }

    pub fn alloc_hash(&mut self, pairs: Vec<(Value, Value)>) -> Value {
        self.alloc(ClassId::Hash, ObjKind::Hash(pairs))
    }

    pub fn alloc_range(&mut self, beg: Value, end: Value, excl: bool) -> Value {
        self.alloc(ClassId::Range, ObjKind::Range { beg, end, excl })
    }

    pub fn alloc_float(&mut self, f: f64) -> Value {
        self.alloc(ClassId::Float, ObjKind::Float(f))
    }

    pub fn alloc_regexp(&mut self, source: impl Into<String>) -> Result<Value, String> {
        let source = source.into();
        let re = Regex::new(&source).map_err(|e| format!("invalid regexp: {}", e))?;
        Ok(self.alloc(ClassId::Regexp, ObjKind::Regexp { source, re }))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

pub fn str_of<'a>(v: Value) -> Option<&'a str> {
    if !v.is_heap() {
        return None;
    }
    let obj: &'a RObject = unsafe { v.as_object() };
    match &obj.kind {
        ObjKind::Str { s, .. } => Some(s.as_str()),
        _ => None,
    }
}

pub fn float_of(v: Value) -> Option<f64> {
    if !v.is_heap() {
        return None;
    }
    match unsafe { v.as_object() }.kind {
        ObjKind::Float(f) => Some(f),
        _ => None,
    }
}

/// Numeric value of a fixnum or boxed float.
pub fn num_of(v: Value) -> Option<f64> {
    if v.is_fixnum() {
        Some(v.as_fixnum() as f64)
    } else {
        float_of(v)
    }
}

/// Content equality as used by `==`, hash keys, and case dispatch.
pub fn values_eql(a: Value, b: Value) -> bool {
    if a == b {
        return true;
    }
    match (num_of(a), num_of(b)) {
        (Some(x), Some(y)) => return x == y,
        _ => {}
    }
    match (str_of(a), str_of(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

pub fn hash_lookup(pairs: &[(Value, Value)], key: Value) -> Option<Value> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| values_eql(*k, key))
        .map(|(_, v)| *v)
}

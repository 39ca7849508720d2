use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bytecode::iseq::IseqBody;
use crate::runtime::context::ExecutionContext;
use crate::runtime::heap::{CLASS_COUNT, ClassId};
use crate::runtime::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
    Protected,
}

pub type NativeFunc = fn(&mut ExecutionContext, Value, &[Value]) -> Result<Value, String>;

pub enum MethodKind {
    Native(NativeFunc),
    Iseq(Arc<IseqBody>),
}

pub struct Method {
    pub klass: ClassId,
    pub name: String,
    pub kind: MethodKind,
    pub visibility: Visibility,
}

impl Method {
    /// Fast-path predicate for JIT'd inline frame pushes: bytecode callee with
    /// a plain parameter layout and non-protected visibility.
    pub fn is_simple_iseq(&self) -> bool {
        match &self.kind {
            MethodKind::Iseq(body) => {
                !body.has_opt()
                    && body.local_size >= body.lead_num
                    && self.visibility != Visibility::Protected
            }
            MethodKind::Native(_) => false,
        }
    }

    pub fn iseq(&self) -> Option<&Arc<IseqBody>> {
        match &self.kind {
            MethodKind::Iseq(body) => Some(body),
            MethodKind::Native(_) => None,
        }
    }
}

/// Basic operations whose optimized instructions must deoptimize once the
/// operation is redefined on a built-in class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Bop {
    Plus = 0,
    Minus,
    Mult,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    LtLt,
    Aref,
    Aset,
    Length,
    Size,
    EmptyP,
    Succ,
    Not,
    Freeze,
    UMinus,
    Match,
}

impl Bop {
    pub fn bit(self) -> u64 {
        1 << (self as u32)
    }

    fn from_method(klass: ClassId, name: &str) -> Option<Bop> {
        let builtin = matches!(
            klass,
            ClassId::Integer
                | ClassId::Float
                | ClassId::String
                | ClassId::Array
                | ClassId::Hash
                | ClassId::Regexp
        );
        if !builtin {
            return None;
        }
        Some(match name {
            "+" => Bop::Plus,
            "-" => Bop::Minus,
            "*" => Bop::Mult,
            "/" => Bop::Div,
            "%" => Bop::Mod,
            "==" => Bop::Eq,
            "!=" => Bop::Neq,
            "<" => Bop::Lt,
            "<=" => Bop::Le,
            ">" => Bop::Gt,
            ">=" => Bop::Ge,
            "<<" => Bop::LtLt,
            "[]" => Bop::Aref,
            "[]=" => Bop::Aset,
            "length" => Bop::Length,
            "size" => Bop::Size,
            "empty?" => Bop::EmptyP,
            "succ" => Bop::Succ,
            "!" => Bop::Not,
            "freeze" => Bop::Freeze,
            "-@" => Bop::UMinus,
            "=~" => Bop::Match,
            _ => return None,
        })
    }
}

/// Global method registry with the invalidation state the JIT guards read:
/// a process-wide method-state counter, per-class serials, and the
/// basic-operation redefinition bitmask.
pub struct MethodTable {
    methods: Vec<Method>,
    lookup: HashMap<(ClassId, String), u32>,
    method_state: AtomicU64,
    class_serials: [AtomicU64; CLASS_COUNT],
    redefined_bops: AtomicU64,
}

impl Default for MethodTable {
    fn default() -> Self {
        MethodTable {
            methods: Vec::new(),
            lookup: HashMap::new(),
            method_state: AtomicU64::new(1),
            class_serials: std::array::from_fn(|_| AtomicU64::new(1)),
            redefined_bops: AtomicU64::new(0),
        }
    }
}

impl MethodTable {
    pub fn new() -> Self {
        MethodTable::default()
    }

    /// Register a built-in during boot; does not count as a redefinition.
    pub fn define_builtin(
        &mut self,
        klass: ClassId,
        name: &str,
        visibility: Visibility,
        f: NativeFunc,
    ) {
        self.insert(klass, name, MethodKind::Native(f), visibility, false);
    }

    pub fn define_native(
        &mut self,
        klass: ClassId,
        name: &str,
        visibility: Visibility,
        f: NativeFunc,
    ) {
        self.insert(klass, name, MethodKind::Native(f), visibility, true);
    }

    pub fn define_iseq(
        &mut self,
        klass: ClassId,
        name: &str,
        visibility: Visibility,
        body: Arc<IseqBody>,
    ) {
        self.insert(klass, name, MethodKind::Iseq(body), visibility, true);
    }

    fn insert(
        &mut self,
        klass: ClassId,
        name: &str,
        kind: MethodKind,
        visibility: Visibility,
        user: bool,
    ) {
        let idx = self.methods.len() as u32;
        self.methods.push(Method {
            klass,
            name: name.to_string(),
            kind,
            visibility,
        });
        self.lookup.insert((klass, name.to_string()), idx);
        self.method_state.fetch_add(1, Ordering::Release);
        self.class_serials[klass as usize].fetch_add(1, Ordering::Release);
        if user {
            if let Some(bop) = Bop::from_method(klass, name) {
                self.redefined_bops.fetch_or(bop.bit(), Ordering::Release);
            }
        }
    }

    /// Resolve `name` on `klass`, falling back to `Object`.
    pub fn search(&self, klass: ClassId, name: &str) -> Option<(u32, &Method)> {
        if let Some(&idx) = self.lookup.get(&(klass, name.to_string())) {
            return Some((idx, &self.methods[idx as usize]));
        }
        if klass != ClassId::Object {
            if let Some(&idx) = self.lookup.get(&(ClassId::Object, name.to_string())) {
                return Some((idx, &self.methods[idx as usize]));
            }
        }
        None
    }

    pub fn method(&self, idx: u32) -> &Method {
        &self.methods[idx as usize]
    }

    pub fn method_state(&self) -> u64 {
        self.method_state.load(Ordering::Acquire)
    }

    pub fn class_serial(&self, klass: ClassId) -> u64 {
        self.class_serials[klass as usize].load(Ordering::Acquire)
    }

    pub fn bop_redefined(&self, bop: Bop) -> bool {
        self.redefined_bops.load(Ordering::Acquire) & bop.bit() != 0
    }
}


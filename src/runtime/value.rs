use std::fmt;

use crate::runtime::heap::RObject;

/// Word-sized tagged value, shared bit-for-bit with generated C code
/// (`typedef uint64_t VALUE` in `ember.h`).
///
/// Encoding:
/// - `0x00` false, `0x08` nil, `0x14` true, `0x34` the undefined sentinel
/// - fixnums: 63-bit signed integer shifted left once, low bit 1
/// - static symbols: 32-bit symbol id shifted left a byte, low byte `0x0c`
/// - everything else: an 8-byte-aligned pointer to an [`RObject`]
///
/// `UNDEF` is never a legal program value. It doubles as the cancellation
/// return of JIT-compiled functions and as a small-integer state in the
/// entry-point slot encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(pub u64);

pub const SYMBOL_TAG: u64 = 0x0c;

impl Value {
    pub const FALSE: Value = Value(0x00);
    pub const NIL: Value = Value(0x08);
    pub const TRUE: Value = Value(0x14);
    pub const UNDEF: Value = Value(0x34);

    pub fn fixnum(n: i64) -> Value {
        Value(((n as u64) << 1) | 1)
    }

    pub fn boolean(b: bool) -> Value {
        if b { Value::TRUE } else { Value::FALSE }
    }

    pub fn symbol(id: u32) -> Value {
        Value(((id as u64) << 8) | SYMBOL_TAG)
    }

    pub fn object(ptr: *const RObject) -> Value {
        debug_assert!(!ptr.is_null() && (ptr as u64) & 0x7 == 0);
        Value(ptr as u64)
    }

    pub fn is_fixnum(self) -> bool {
        self.0 & 1 == 1
    }

    pub fn as_fixnum(self) -> i64 {
        debug_assert!(self.is_fixnum());
        (self.0 as i64) >> 1
    }

    pub fn is_static_symbol(self) -> bool {
        self.0 & 0xff == SYMBOL_TAG
    }

    pub fn as_symbol_id(self) -> u32 {
        debug_assert!(self.is_static_symbol());
        (self.0 >> 8) as u32
    }

    pub fn is_nil(self) -> bool {
        self == Value::NIL
    }

    pub fn is_undef(self) -> bool {
        self == Value::UNDEF
    }

    /// Truthiness: everything except nil and false.
    pub fn test(self) -> bool {
        self.0 & !Value::NIL.0 != 0
    }

    pub fn is_special_const(self) -> bool {
        self.is_fixnum() || self.0 <= Value::UNDEF.0 || self.is_static_symbol()
    }

    pub fn is_heap(self) -> bool {
        !self.is_special_const()
    }

    /// # Safety
    /// The value must be a heap value whose object is still owned by a live
    /// [`crate::runtime::heap::Heap`].
    pub unsafe fn as_object<'a>(self) -> &'a RObject {
        debug_assert!(self.is_heap());
        unsafe { &*(self.0 as *const RObject) }
    }

    /// # Safety
    /// Same as [`Value::as_object`]; additionally the caller must be the only
    /// one holding a reference into the object (single mutator thread).
    pub unsafe fn as_object_mut<'a>(self) -> &'a mut RObject {
        debug_assert!(self.is_heap());
        unsafe { &mut *(self.0 as *mut RObject) }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Value::NIL {
            write!(f, "nil")
        } else if *self == Value::TRUE {
            write!(f, "true")
        } else if *self == Value::FALSE {
            write!(f, "false")
        } else if *self == Value::UNDEF {
            write!(f, "undef")
        } else if self.is_fixnum() {
            write!(f, "{}", self.as_fixnum())
        } else if self.is_static_symbol() {
            write!(f, "sym#{}", self.as_symbol_id())
        } else {
            write!(f, "obj@{:#x}", self.0)
        }
    }
}


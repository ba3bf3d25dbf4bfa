//! Runtime values of the interpreter.
//!
//! The evaluation stack follows the CIL stack model: every integer narrower than 64 bits
//! travels as [`EmValue::I32`], booleans and characters included. Reference types are
//! [`EmValue::ObjectRef`] handles into the [`crate::emulation::ManagedHeap`]; managed pointers
//! created by `ldarga`/`ldloca` alias the slot they point to through a shared [`ValueCell`].

use std::{cell::RefCell, cmp::Ordering, fmt, rc::Rc};

use crate::metadata::{signatures::TypeSig, token::Token};

/// Handle of a heap object; equality is reference equality
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef(pub(crate) usize);

impl HeapRef {
    /// Index of the object in its heap
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Runtime descriptor of a member produced by `ldtoken`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberHandle {
    /// Module defining the member
    pub module: String,
    /// Member token
    pub token: Token,
}

/// A shared storage slot: an argument, a local, or the target of a managed pointer
#[derive(Clone, Debug, Default)]
pub struct ValueCell(Rc<RefCell<EmValue>>);

impl ValueCell {
    /// A slot holding `value`
    #[must_use]
    pub fn new(value: EmValue) -> Self {
        ValueCell(Rc::new(RefCell::new(value)))
    }

    /// Current content
    #[must_use]
    pub fn get(&self) -> EmValue {
        self.0.borrow().clone()
    }

    /// Replaces the content
    pub fn set(&self, value: EmValue) {
        *self.0.borrow_mut() = value;
    }

    /// True if both cells are the same slot
    #[must_use]
    pub fn same_slot(&self, other: &ValueCell) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A value on the evaluation stack or in a slot
#[derive(Clone, Debug, Default)]
pub enum EmValue {
    /// Null reference
    #[default]
    Null,
    /// 32-bit integer, also carries bool, char and narrower integers
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Reference to a heap object
    ObjectRef(HeapRef),
    /// Managed pointer to a slot
    Pointer(ValueCell),
    /// Member descriptor
    Member(MemberHandle),
}

impl PartialEq for EmValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EmValue::Null, EmValue::Null) => true,
            (EmValue::I32(a), EmValue::I32(b)) => a == b,
            (EmValue::I64(a), EmValue::I64(b)) => a == b,
            (EmValue::I32(a), EmValue::I64(b)) | (EmValue::I64(b), EmValue::I32(a)) => {
                i64::from(*a) == *b
            }
            (EmValue::F32(a), EmValue::F32(b)) => a == b,
            (EmValue::F64(a), EmValue::F64(b)) => a == b,
            (EmValue::F32(a), EmValue::F64(b)) | (EmValue::F64(b), EmValue::F32(a)) => {
                f64::from(*a) == *b
            }
            (EmValue::ObjectRef(a), EmValue::ObjectRef(b)) => a == b,
            (EmValue::Pointer(a), EmValue::Pointer(b)) => a.same_slot(b),
            (EmValue::Member(a), EmValue::Member(b)) => a == b,
            _ => false,
        }
    }
}

impl EmValue {
    /// The zero value of a slot of type `sig`
    #[must_use]
    pub fn zero(sig: &TypeSig) -> Self {
        match sig {
            TypeSig::Boolean
            | TypeSig::Char
            | TypeSig::I1
            | TypeSig::U1
            | TypeSig::I2
            | TypeSig::U2
            | TypeSig::I4
            | TypeSig::U4
            | TypeSig::ValueType(_) => EmValue::I32(0),
            TypeSig::I8 | TypeSig::U8 => EmValue::I64(0),
            TypeSig::R4 => EmValue::F32(0.0),
            TypeSig::R8 => EmValue::F64(0.0),
            _ => EmValue::Null,
        }
    }

    /// True for the null reference
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, EmValue::Null)
    }

    /// The integer content, widened
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EmValue::I32(v) => Some(i64::from(*v)),
            EmValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// The 32-bit integer content
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            EmValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// The heap handle, if this is an object reference
    #[must_use]
    pub fn as_heap_ref(&self) -> Option<HeapRef> {
        match self {
            EmValue::ObjectRef(r) => Some(*r),
            _ => None,
        }
    }

    /// Truth value as tested by `brtrue`
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self {
            EmValue::Null => false,
            EmValue::I32(v) => *v != 0,
            EmValue::I64(v) => *v != 0,
            EmValue::F32(v) => *v != 0.0,
            EmValue::F64(v) => *v != 0.0,
            EmValue::ObjectRef(_) | EmValue::Pointer(_) | EmValue::Member(_) => true,
        }
    }

    /// Numeric ordering used by the comparison branches
    #[must_use]
    pub fn compare(&self, other: &EmValue) -> Option<Ordering> {
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }

    /// The numeric content as a double
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EmValue::F32(v) => Some(f64::from(*v)),
            EmValue::F64(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Stack kind name used in fault messages
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            EmValue::Null => "null",
            EmValue::I32(_) => "int32",
            EmValue::I64(_) => "int64",
            EmValue::F32(_) => "float32",
            EmValue::F64(_) => "float64",
            EmValue::ObjectRef(_) => "object",
            EmValue::Pointer(_) => "managed pointer",
            EmValue::Member(_) => "member handle",
        }
    }

    /// Converts a numeric value to the stack representation of `sig`
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn convert(&self, sig: &TypeSig) -> Option<EmValue> {
        let int = || match self {
            EmValue::F32(v) => Some(*v as i64),
            EmValue::F64(v) => Some(*v as i64),
            other => other.as_i64(),
        };
        Some(match sig {
            TypeSig::I1 => EmValue::I32(i32::from(int()? as i8)),
            TypeSig::U1 | TypeSig::Boolean => EmValue::I32(i32::from(int()? as u8)),
            TypeSig::I2 => EmValue::I32(i32::from(int()? as i16)),
            TypeSig::U2 | TypeSig::Char => EmValue::I32(i32::from(int()? as u16)),
            TypeSig::I4 | TypeSig::U4 => EmValue::I32(int()? as i32),
            TypeSig::I8 | TypeSig::U8 => EmValue::I64(int()?),
            TypeSig::R4 => EmValue::F32(self.as_f64()? as f32),
            TypeSig::R8 => EmValue::F64(self.as_f64()?),
            _ => return None,
        })
    }
}

impl fmt::Display for EmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmValue::Null => f.write_str("null"),
            EmValue::I32(v) => write!(f, "{v}"),
            EmValue::I64(v) => write!(f, "{v}"),
            EmValue::F32(v) => write!(f, "{v}"),
            EmValue::F64(v) => write!(f, "{v}"),
            EmValue::ObjectRef(r) => write!(f, "{r}"),
            EmValue::Pointer(cell) => write!(f, "&{}", cell.get()),
            EmValue::Member(m) => write!(f, "[{}]{}", m.module, m.token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_width_equality() {
        assert_eq!(EmValue::I32(7), EmValue::I64(7));
        assert_ne!(EmValue::I32(7), EmValue::Null);
        assert_ne!(EmValue::ObjectRef(HeapRef(1)), EmValue::ObjectRef(HeapRef(2)));
    }

    #[test]
    fn test_pointer_aliases_slot() {
        let slot = ValueCell::new(EmValue::I32(1));
        let pointer = EmValue::Pointer(slot.clone());
        if let EmValue::Pointer(target) = &pointer {
            target.set(EmValue::I32(5));
        }
        assert_eq!(slot.get(), EmValue::I32(5));
        assert_eq!(pointer, EmValue::Pointer(slot));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(EmValue::I32(300).convert(&TypeSig::U1), Some(EmValue::I32(44)));
        assert_eq!(EmValue::F64(2.9).convert(&TypeSig::I4), Some(EmValue::I32(2)));
        assert_eq!(EmValue::I32(-1).convert(&TypeSig::I8), Some(EmValue::I64(-1)));
        assert!(EmValue::Null.convert(&TypeSig::I4).is_none());
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(EmValue::zero(&TypeSig::Boolean), EmValue::I32(0));
        assert_eq!(EmValue::zero(&TypeSig::R8), EmValue::F64(0.0));
        assert!(EmValue::zero(&TypeSig::String).is_null());
    }
}

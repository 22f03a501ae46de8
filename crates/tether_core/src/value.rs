//! Variant value type
//!
//! `Value` is the closed tagged union every datum crossing the bridge is
//! packed into. Conversions between tags are total: every getter returns a
//! well-defined result for every tag, falling back to the target type's
//! zero value where no meaningful conversion exists. Handle payloads are
//! shared via `Arc`, so cloning a Value bumps the handle's count and
//! dropping it releases the reference; re-assigning a Value releases the
//! old payload through ordinary drop semantics.

use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

use crate::object::{Function, FunctionRef, Object, ObjectRef};

/// Opaque pointer payload. The bridge carries it as a cookie for the
/// embedding application and never dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpaquePtr(pub *mut c_void);

impl OpaquePtr {
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

// Carried, never dereferenced.
unsafe impl Send for OpaquePtr {}
unsafe impl Sync for OpaquePtr {}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Empty,
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Ptr(OpaquePtr),
    Object(ObjectRef),
    Function(FunctionRef),
}

macro_rules! get_integer {
    ($name:ident, $ty:ty, $label:literal) => {
        pub fn $name(&self) -> $ty {
            match self {
                Value::Empty => 0,
                Value::Bool(v) => *v as $ty,
                Value::Int8(v) => *v as $ty,
                Value::UInt8(v) => *v as $ty,
                Value::Int32(v) => *v as $ty,
                Value::UInt32(v) => *v as $ty,
                Value::Int64(v) => *v as $ty,
                Value::UInt64(v) => *v as $ty,
                Value::Float(v) => *v as $ty,
                Value::Double(v) => *v as $ty,
                Value::String(s) => parse_int_prefix(s) as $ty,
                Value::Ptr(_) => {
                    tracing::warn!(concat!("no conversion from ptr to ", $label));
                    0
                }
                Value::Object(_) | Value::Function(_) => 0,
            }
        }
    };
}

macro_rules! get_float {
    ($name:ident, $ty:ty, $label:literal) => {
        pub fn $name(&self) -> $ty {
            match self {
                Value::Empty => 0.0,
                Value::Bool(v) => *v as u8 as $ty,
                Value::Int8(v) => *v as $ty,
                Value::UInt8(v) => *v as $ty,
                Value::Int32(v) => *v as $ty,
                Value::UInt32(v) => *v as $ty,
                Value::Int64(v) => *v as $ty,
                Value::UInt64(v) => *v as $ty,
                Value::Float(v) => *v as $ty,
                Value::Double(v) => *v as $ty,
                Value::String(s) => parse_float_prefix(s) as $ty,
                Value::Ptr(_) => {
                    tracing::warn!(concat!("no conversion from ptr to ", $label));
                    0.0
                }
                Value::Object(_) | Value::Function(_) => 0.0,
            }
        }
    };
}

impl Value {
    /// Shorthand for wrapping a native object into a handle-tagged value.
    pub fn object<T: Object + 'static>(object: T) -> Self {
        Value::Object(Arc::new(object))
    }

    /// Shorthand for wrapping a native function into a handle-tagged value.
    pub fn function<T: Function + 'static>(function: T) -> Self {
        Value::Function(Arc::new(function))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Bool(_) => "bool",
            Value::Int8(_) => "int8",
            Value::UInt8(_) => "uint8",
            Value::Int32(_) => "int32",
            Value::UInt32(_) => "uint32",
            Value::Int64(_) => "int64",
            Value::UInt64(_) => "uint64",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Ptr(_) => "ptr",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// Truthiness across every tag. A held handle is always true; the only
    /// false string is the exact text `"false"`.
    pub fn get_bool(&self) -> bool {
        match self {
            Value::Empty => false,
            Value::Bool(v) => *v,
            Value::Int8(v) => *v != 0,
            Value::UInt8(v) => *v != 0,
            Value::Int32(v) => *v != 0,
            Value::UInt32(v) => *v != 0,
            Value::Int64(v) => *v != 0,
            Value::UInt64(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Double(v) => *v != 0.0,
            Value::String(s) => s != "false",
            Value::Ptr(p) => !p.is_null(),
            Value::Object(_) | Value::Function(_) => true,
        }
    }

    get_integer!(get_i8, i8, "int8");
    get_integer!(get_u8, u8, "uint8");
    get_integer!(get_i32, i32, "int32");
    get_integer!(get_u32, u32, "uint32");
    get_integer!(get_i64, i64, "int64");
    get_integer!(get_u64, u64, "uint64");
    get_float!(get_f32, f32, "float");
    get_float!(get_f64, f64, "double");

    /// Canonical decimal text for numerics, `"true"`/`"false"` for bool,
    /// empty text for tags with no textual form.
    pub fn get_string(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Bool(v) => if *v { "true" } else { "false" }.to_string(),
            Value::Int8(v) => v.to_string(),
            Value::UInt8(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::UInt32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::UInt64(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::String(s) => s.clone(),
            Value::Ptr(_) => {
                tracing::warn!("no conversion from ptr to string");
                String::new()
            }
            // TODO call a toString hook on the handle once one exists
            Value::Object(_) | Value::Function(_) => String::new(),
        }
    }

    /// The held object handle, or `None` (the empty handle) for every other
    /// tag. Nothing converts implicitly into an object.
    pub fn to_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(o) => Some(o.clone()),
            _ => None,
        }
    }

    /// The held function handle, or `None` for every other tag.
    pub fn to_function(&self) -> Option<FunctionRef> {
        match self {
            Value::Function(f) => Some(f.clone()),
            _ => None,
        }
    }

    /// The held opaque pointer; every other tag yields the null cookie.
    pub fn get_ptr(&self) -> OpaquePtr {
        match self {
            Value::Ptr(p) => *p,
            _ => OpaquePtr::null(),
        }
    }
}

/// Leading-integer parse in the C `atol` discipline: consume an optional
/// sign and digits, ignore the rest, zero when nothing parses.
fn parse_int_prefix(s: &str) -> i64 {
    let t = s.trim_start();
    let mut end = 0;
    for (i, c) in t.char_indices() {
        let ok = c.is_ascii_digit() || (i == 0 && (c == '+' || c == '-'));
        if !ok {
            break;
        }
        end = i + c.len_utf8();
    }
    t[..end].parse().unwrap_or(0)
}

/// Leading-float parse in the C `atof` discipline.
fn parse_float_prefix(s: &str) -> f64 {
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    for (i, c) in t.char_indices() {
        let ok = match c {
            '0'..='9' => true,
            '+' | '-' => {
                i == 0 || matches!(bytes.get(i.wrapping_sub(1)), Some(b'e') | Some(b'E'))
            }
            '.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            'e' | 'E' if !seen_exp && i > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end = i + c.len_utf8();
    }
    t[..end].parse().unwrap_or(0.0)
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "Empty"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int8(v) => write!(f, "Int8({v})"),
            Value::UInt8(v) => write!(f, "UInt8({v})"),
            Value::Int32(v) => write!(f, "Int32({v})"),
            Value::UInt32(v) => write!(f, "UInt32({v})"),
            Value::Int64(v) => write!(f, "Int64({v})"),
            Value::UInt64(v) => write!(f, "UInt64({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Double(v) => write!(f, "Double({v})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Ptr(p) => write!(f, "Ptr({:p})", p.0),
            Value::Object(o) => write!(f, "Object(refs={})", Arc::strong_count(o)),
            Value::Function(x) => write!(f, "Function(refs={})", Arc::strong_count(x)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int8(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::UInt8(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<OpaquePtr> for Value {
    fn from(v: OpaquePtr) -> Self {
        Value::Ptr(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

impl From<FunctionRef> for Value {
    fn from(v: FunctionRef) -> Self {
        Value::Function(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PropertyBag;

    #[test]
    fn test_default_is_empty() {
        let v = Value::default();
        assert!(v.is_empty());
        assert!(!v.get_bool());
        assert_eq!(v.get_i32(), 0);
        assert_eq!(v.get_string(), "");
    }

    #[test]
    fn test_int32_conversions() {
        let v = Value::from(42);
        assert_eq!(v.get_string(), "42");
        assert!(v.get_bool());
        assert_eq!(v.get_i64(), 42);
        assert_eq!(v.get_f64(), 42.0);
        assert_eq!(v.get_u8(), 42);
    }

    #[test]
    fn test_string_false_is_case_sensitive() {
        assert!(!Value::from("false").get_bool());
        assert!(Value::from("FALSE").get_bool());
        assert!(Value::from("").get_bool());
        assert!(Value::from("no").get_bool());
    }

    #[test]
    fn test_string_to_numeric_prefix_parse() {
        assert_eq!(Value::from("42").get_i32(), 42);
        assert_eq!(Value::from("  -7 apples").get_i32(), -7);
        assert_eq!(Value::from("3.75").get_i32(), 3);
        assert_eq!(Value::from("3.75").get_f64(), 3.75);
        assert_eq!(Value::from("1e2!").get_f64(), 100.0);
        assert_eq!(Value::from("nope").get_i64(), 0);
        assert_eq!(Value::from("nope").get_f32(), 0.0);
    }

    #[test]
    fn test_bool_conversions() {
        let t = Value::from(true);
        assert_eq!(t.get_string(), "true");
        assert_eq!(t.get_i32(), 1);
        assert_eq!(t.get_f64(), 1.0);
        let f = Value::from(false);
        assert_eq!(f.get_string(), "false");
        assert_eq!(f.get_u64(), 0);
    }

    #[test]
    fn test_numeric_truncation_follows_cast_semantics() {
        assert_eq!(Value::from(300u32).get_u8(), 300u32 as u8);
        assert_eq!(Value::from(-1i32).get_u32(), -1i32 as u32);
        assert_eq!(Value::from(3.9f64).get_i32(), 3);
        assert_eq!(Value::from(-3.9f64).get_i32(), -3);
    }

    #[test]
    fn test_handle_tags_never_convert_to_primitives() {
        let v = Value::object(PropertyBag::new());
        assert_eq!(v.get_i32(), 0);
        assert_eq!(v.get_f64(), 0.0);
        assert_eq!(v.get_string(), "");
        assert!(v.get_bool());
        assert!(v.to_function().is_none());
    }

    #[test]
    fn test_primitives_never_convert_to_handles() {
        assert!(Value::from(42).to_object().is_none());
        assert!(Value::from("x").to_function().is_none());
        assert!(Value::Empty.to_object().is_none());
    }

    #[test]
    fn test_ptr_round_trip() {
        let cookie = OpaquePtr(0x1000 as *mut std::ffi::c_void);
        let v = Value::from(cookie);
        assert_eq!(v.get_ptr(), cookie);
        assert!(v.get_bool());
        // no meaningful conversion: zero value, logged diagnostic
        assert_eq!(v.get_i32(), 0);
        assert_eq!(v.get_string(), "");
        assert!(Value::from(1).get_ptr().is_null());
    }

    #[test]
    fn test_clone_shares_the_handle() {
        let v = Value::object(PropertyBag::new());
        let handle = v.to_object().unwrap();
        assert_eq!(Arc::strong_count(&handle), 2);
        let copy = v.clone();
        assert_eq!(Arc::strong_count(&handle), 3);
        drop(copy);
        drop(v);
        assert_eq!(Arc::strong_count(&handle), 1);
    }

    #[test]
    fn test_reassignment_releases_old_payload() {
        let handle: ObjectRef = Arc::new(PropertyBag::new());
        let mut v = Value::from(handle.clone());
        assert_eq!(Arc::strong_count(&handle), 2);
        v = Value::from("replaced");
        assert_eq!(Arc::strong_count(&handle), 1);
        assert_eq!(v.get_string(), "replaced");
    }

    #[test]
    fn test_canonical_round_trip() {
        for v in [Value::from(0), Value::from(-17), Value::from(123456)] {
            let text = v.get_string();
            assert_eq!(Value::from(text).get_i32(), v.get_i32());
        }
        let d = Value::from(2.5f64);
        assert_eq!(Value::from(d.get_string()).get_f64(), 2.5);
    }
}

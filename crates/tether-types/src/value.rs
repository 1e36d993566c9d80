use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A value owned by the host side of the bridge.
///
/// Reference variants share their payload through `Rc`, so cloning a
/// `HostValue` produces a second reference to the same object, never a copy.
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    Error(HostError),
    Object(HostObject),
    Function(NativeFn),
}

impl HostValue {
    /// Build a string value.
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Self::String(s.into())
    }

    /// Build an error value with the given name and message.
    pub fn error(name: &str, message: &str) -> Self {
        Self::Error(HostError::new(name, message))
    }

    /// Wrap an arbitrary host object.
    pub fn object<T: Any>(value: T) -> Self {
        Self::Object(HostObject::new(value))
    }

    /// `undefined` and `null` both mean "absent".
    pub fn is_like_none(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Error(_) => "error",
            Self::Object(obj) => obj.type_name(),
            Self::Function(_) => "function",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Downcast an object value to a concrete host type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_object().and_then(HostObject::downcast_ref)
    }

    /// Identity comparison.
    ///
    /// Reference variants compare by pointer; primitives compare by value
    /// (`NaN` is never identical to itself).
    pub fn same_ref(&self, other: &HostValue) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => Rc::ptr_eq(a, b),
            (Self::Error(a), Self::Error(b)) => Rc::ptr_eq(&a.message, &b.message),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }

    /// Render the value for diagnostics.
    pub fn debug_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => format!("\"{s}\""),
            Self::Bytes(b) => format!("Bytes({})", b.len()),
            Self::Error(e) => format!("{}: {}", e.name, e.message),
            Self::Object(obj) => obj.type_name().to_string(),
            Self::Function(f) if f.name.is_empty() => "Function".to_string(),
            Self::Function(f) => format!("Function({})", f.name),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.debug_string())
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

/// Integral numbers print without a fractional part, like the host they model.
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// HostError
// ══════════════════════════════════════════════════════════════════════════════

/// A thrown error value.
#[derive(Debug, Clone, PartialEq)]
pub struct HostError {
    pub name: Rc<str>,
    pub message: Rc<str>,
}

impl HostError {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// HostObject
// ══════════════════════════════════════════════════════════════════════════════

/// A type-erased, reference-counted host object.
#[derive(Clone)]
pub struct HostObject {
    type_name: &'static str,
    inner: Rc<dyn Any>,
}

impl HostObject {
    pub fn new<T: Any>(value: T) -> Self {
        Self::from_rc(Rc::new(value))
    }

    /// Wrap an existing `Rc`, keeping shared ownership with the caller.
    pub fn from_rc<T: Any>(value: Rc<T>) -> Self {
        Self {
            type_name: short_type_name::<T>(),
            inner: value,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// A new strong reference to the concrete object.
    pub fn downcast_rc<T: Any>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.inner).downcast::<T>().ok()
    }

    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let start = base.rfind("::").map_or(0, |i| i + 2);
    &full[start..]
}

// ══════════════════════════════════════════════════════════════════════════════
// NativeFn
// ══════════════════════════════════════════════════════════════════════════════

type NativeCallback = dyn Fn(&[HostValue]) -> Result<HostValue, HostValue>;

/// A host-native callable. `Err` carries the thrown value.
#[derive(Clone)]
pub struct NativeFn {
    pub name: Rc<str>,
    func: Rc<NativeCallback>,
}

impl NativeFn {
    pub fn new(
        name: &str,
        func: impl Fn(&[HostValue]) -> Result<HostValue, HostValue> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    pub fn call(&self, args: &[HostValue]) -> Result<HostValue, HostValue> {
        (self.func)(args)
    }
}

impl From<NativeFn> for HostValue {
    fn from(f: NativeFn) -> Self {
        Self::Function(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canvas {
        width: u32,
    }

    #[test]
    fn clone_shares_object() {
        let v = HostValue::object(Canvas { width: 640 });
        let w = v.clone();
        assert!(v.same_ref(&w));
        assert_eq!(w.downcast_ref::<Canvas>().map(|c| c.width), Some(640));
    }

    #[test]
    fn distinct_objects_are_not_same_ref() {
        let a = HostValue::object(Canvas { width: 1 });
        let b = HostValue::object(Canvas { width: 1 });
        assert!(!a.same_ref(&b));
    }

    #[test]
    fn like_none() {
        assert!(HostValue::Undefined.is_like_none());
        assert!(HostValue::Null.is_like_none());
        assert!(!HostValue::Bool(false).is_like_none());
        assert!(!HostValue::Number(0.0).is_like_none());
    }

    #[test]
    fn object_type_name_is_short() {
        let v = HostValue::object(Canvas { width: 1 });
        assert_eq!(v.type_name(), "Canvas");
    }

    #[test]
    fn debug_strings() {
        assert_eq!(HostValue::Number(3.0).debug_string(), "3");
        assert_eq!(HostValue::Number(1.5).debug_string(), "1.5");
        assert_eq!(HostValue::from("hi").debug_string(), "\"hi\"");
        assert_eq!(HostValue::error("TypeError", "bad").debug_string(), "TypeError: bad");
        let f = NativeFn::new("noop", |_| Ok(HostValue::Undefined));
        assert_eq!(HostValue::from(f).debug_string(), "Function(noop)");
    }

    #[test]
    fn native_fn_propagates_throw() {
        let f = NativeFn::new("boom", |_| Err(HostValue::error("Error", "boom")));
        let thrown = f.call(&[]).unwrap_err();
        assert_eq!(thrown.type_name(), "error");
    }
}

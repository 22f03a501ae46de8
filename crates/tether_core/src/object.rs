//! Object and function handle protocol
//!
//! The marshaling layer never special-cases who provides a handle: native
//! types and script-side wrappers implement the same two traits. Handles
//! are shared through `Arc`, which is the reference-counting contract the
//! bridge relies on (atomic counts, release on last drop).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::value::Value;

/// Capability sentinel an object advertises to opt into promise interop.
/// Detection is an exact match on this marker, nothing structural.
pub const PROMISE_CAPABILITY: &str = "tether.promise";

/// Named/indexed property access plus method invocation.
pub trait Object: Send + Sync {
    fn get(&self, name: &str) -> Result<Value>;

    fn set(&self, name: &str, value: Value) -> Result<()>;

    fn get_index(&self, _index: u32) -> Result<Value> {
        Err(Error::Unsupported("get_index"))
    }

    fn set_index(&self, _index: u32, _value: Value) -> Result<()> {
        Err(Error::Unsupported("set_index"))
    }

    /// Enumeration is optional; implementors without a stable notion of
    /// keys report `Unsupported`.
    fn keys(&self) -> Result<Vec<String>> {
        Err(Error::Unsupported("keys"))
    }

    /// Invoke a named method. The default route looks the name up as a
    /// function-valued property and sends it.
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value> {
        match self.get(method)?.to_function() {
            Some(f) => f.send(args),
            None => Err(Error::TypeMismatch("function")),
        }
    }

    /// Capability descriptor, `None` unless the object advertises a
    /// contract such as [`PROMISE_CAPABILITY`].
    fn capability(&self) -> Option<&str> {
        None
    }
}

/// A single positional-argument invocation.
pub trait Function: Send + Sync {
    fn send(&self, args: &[Value]) -> Result<Value>;
}

pub type ObjectRef = Arc<dyn Object>;
pub type FunctionRef = Arc<dyn Function>;

/// Mutex-guarded name→value map object, the plainest native `Object`.
#[derive(Default)]
pub struct PropertyBag {
    props: Mutex<HashMap<String, Value>>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion for setup code.
    pub fn with(self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&self, name: &str, value: impl Into<Value>) {
        self.props
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.into());
    }
}

impl Object for PropertyBag {
    fn get(&self, name: &str) -> Result<Value> {
        self.props
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    fn set(&self, name: &str, value: Value) -> Result<()> {
        self.insert(name, value);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .props
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Indexable value sequence exposing `length`, for array-shaped natives.
#[derive(Default)]
pub struct ArrayObject {
    items: Mutex<Vec<Value>>,
}

impl ArrayObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(items: Vec<Value>) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value.into());
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Object for ArrayObject {
    fn get(&self, name: &str) -> Result<Value> {
        match name {
            "length" => Ok(Value::UInt32(self.len() as u32)),
            _ => Err(Error::NotFound(name.to_string())),
        }
    }

    fn set(&self, name: &str, _value: Value) -> Result<()> {
        Err(Error::NotFound(name.to_string()))
    }

    fn get_index(&self, index: u32) -> Result<Value> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("[{index}]")))
    }

    fn set_index(&self, index: u32, value: Value) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let index = index as usize;
        if index >= items.len() {
            items.resize_with(index + 1, Value::default);
        }
        items[index] = value;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok((0..self.len()).map(|i| i.to_string()).collect())
    }
}

/// Closure-backed native function; `send` runs synchronously on the
/// calling thread.
pub struct NativeFunction {
    body: Box<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>,
}

impl NativeFunction {
    pub fn new(body: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static) -> FunctionRef {
        Arc::new(Self {
            body: Box::new(body),
        })
    }
}

impl Function for NativeFunction {
    fn send(&self, args: &[Value]) -> Result<Value> {
        (self.body)(args)
    }
}

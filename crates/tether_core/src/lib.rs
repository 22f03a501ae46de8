//! Tether Core
//!
//! The engine-independent half of the scripting bridge:
//! - `Value`: the variant type carrying primitives and handles
//! - `Object`/`Function`: the capability traits the marshaling layer
//!   speaks, implemented by native types and by script-side wrappers
//! - A small library of native implementations (property bags, arrays,
//!   closures, promises)
//! - JSON interop for feeding structured data through the same variant

pub mod error;
pub mod json;
pub mod object;
pub mod promise;
pub mod value;

pub use error::{Error, Result};
pub use object::{
    ArrayObject, Function, FunctionRef, NativeFunction, Object, ObjectRef, PropertyBag,
    PROMISE_CAPABILITY,
};
pub use promise::NativePromise;
pub use value::{OpaquePtr, Value};

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Tether Scripting Bridge
//!
//! JavaScript execution via QuickJS, bridged to native handles
//!
//! ## Architecture
//!
//! - **Conversion:** every value crossing the boundary goes through the
//!   total marshaling layer in [`convert`]
//! - **Dispatch:** non-owning threads reach the engine only through the
//!   [`DispatchQueue`]; the engine drains it on its own thread
//! - **Promises:** promise-capable native objects surface as real script
//!   promises with settlement marshaled through the queue

pub mod convert;
pub(crate) mod prelude;
pub(crate) mod promise;
pub mod queue;
pub mod runtime;

pub use convert::ScriptObject;
pub use queue::{Disposition, DispatchQueue, InvocationRecord, ScriptFunction};
pub use runtime::{ScriptConfig, ScriptEngine};

pub use rquickjs;

//! Native promise-like object
//!
//! `NativePromise` is the object shape the interop adapter detects: it
//! advertises [`PROMISE_CAPABILITY`] and honors a `then(resolve, reject)`
//! registration. Settlement may come from any thread; the registered
//! handles are ordinary `Function` handles, so a script-owning-thread hop
//! happens inside their `send` when one is needed.

use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::object::{FunctionRef, Object, PROMISE_CAPABILITY};
use crate::value::Value;

enum State {
    Pending(Vec<Registration>),
    Resolved(Value),
    Rejected(Value),
}

struct Registration {
    resolve: Option<FunctionRef>,
    reject: Option<FunctionRef>,
}

pub struct NativePromise {
    state: Mutex<State>,
}

impl Default for NativePromise {
    fn default() -> Self {
        Self::new()
    }
}

impl NativePromise {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending(Vec::new())),
        }
    }

    /// Settle with a value. The first settlement wins; later calls are
    /// accepted and ignored.
    pub fn resolve(&self, value: Value) {
        self.settle(true, value);
    }

    pub fn reject(&self, value: Value) {
        self.settle(false, value);
    }

    pub fn is_settled(&self) -> bool {
        !matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            State::Pending(_)
        )
    }

    fn settle(&self, resolved: bool, value: Value) {
        let registrations = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &mut *state {
                State::Pending(regs) => {
                    let regs = std::mem::take(regs);
                    *state = if resolved {
                        State::Resolved(value.clone())
                    } else {
                        State::Rejected(value.clone())
                    };
                    regs
                }
                // already settled, nothing further happens
                _ => return,
            }
        };
        // fire outside the lock; handlers may re-enter
        for reg in registrations {
            let handler = if resolved { reg.resolve } else { reg.reject };
            fire(handler, &value);
        }
    }
}

fn fire(handler: Option<FunctionRef>, value: &Value) {
    if let Some(f) = handler {
        if let Err(err) = f.send(std::slice::from_ref(value)) {
            tracing::warn!(error = %err, "promise handler send failed");
        }
    }
}

impl Object for NativePromise {
    fn get(&self, name: &str) -> Result<Value> {
        Err(Error::NotFound(name.to_string()))
    }

    fn set(&self, _name: &str, _value: Value) -> Result<()> {
        Err(Error::Unsupported("set"))
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value> {
        if method != "then" {
            return Err(Error::NotFound(method.to_string()));
        }
        if args.len() < 2 {
            return Err(Error::NotEnoughArgs);
        }
        let registration = Registration {
            resolve: args[0].to_function(),
            reject: args[1].to_function(),
        };
        let settled = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &mut *state {
                State::Pending(regs) => {
                    regs.push(registration);
                    None
                }
                State::Resolved(v) => Some((registration.resolve, v.clone())),
                State::Rejected(v) => Some((registration.reject, v.clone())),
            }
        };
        // a late `then` still observes the settled value
        if let Some((handler, value)) = settled {
            fire(handler, &value);
        }
        Ok(Value::Empty)
    }

    fn capability(&self) -> Option<&str> {
        Some(PROMISE_CAPABILITY)
    }
}

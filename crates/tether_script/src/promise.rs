//! Promise interop adapter
//!
//! When a native call's result is an object advertising the promise
//! capability, the object is not proxied into script. Instead a real
//! script promise is created, and two native resolver handles are
//! registered with the object's `then`. The resolver handles may be sent
//! from any thread; settlement always hops through the dispatch queue and
//! lands on the script-owning thread.

use std::sync::Arc;

use rquickjs::{Coerced, Ctx, Function as JsFunction, Object as JsObject, Value as JsValue};
use tether_core::{Function, FunctionRef, Object, ObjectRef, Result, Value, PROMISE_CAPABILITY};

use crate::convert;
use crate::prelude;
use crate::queue::{Disposition, DispatchQueue, Message, SlotKeepAlive};

/// Promise detection: an object handle that declares the capability
/// sentinel, nothing else. The value passes through unchanged otherwise.
pub(crate) fn promise_target(value: &Value) -> Option<ObjectRef> {
    let target = value.to_object()?;
    if target.capability() == Some(PROMISE_CAPABILITY) {
        Some(target)
    } else {
        None
    }
}

/// One side of a resolver pair. Both sides share the same engine-heap
/// resolver slot; whichever settlement arrives first wins, the other
/// becomes a no-op when the slot lookup misses.
struct ResolverFunction {
    disposition: Disposition,
    slot: Arc<SlotKeepAlive>,
    queue: DispatchQueue,
}

impl Function for ResolverFunction {
    fn send(&self, args: &[Value]) -> Result<Value> {
        // settlement carries at most one value
        debug_assert!(
            args.len() <= 1,
            "promise resolver called with {} arguments",
            args.len()
        );
        if args.len() > 1 {
            tracing::warn!(
                count = args.len(),
                "promise resolver called with extra arguments; using the first"
            );
        }
        let value = args.first().cloned().unwrap_or_default();
        self.queue.send(Message::Settle {
            slot: self.slot.clone(),
            disposition: self.disposition,
            value,
        })?;
        Ok(Value::Empty)
    }
}

/// Bridge a promise-like native object to a script promise and return the
/// script promise as the call's visible result.
pub(crate) fn bridge_promise<'js>(
    ctx: &Ctx<'js>,
    queue: &DispatchQueue,
    target: ObjectRef,
) -> rquickjs::Result<JsValue<'js>> {
    let make: JsFunction = ctx.globals().get(prelude::MAKE_PROMISE)?;
    let pair: JsObject = make.call(())?;
    let Coerced(id) = pair.get::<_, Coerced<f64>>("id")?;
    let promise: JsValue = pair.get("promise")?;

    let slot = queue.keep_alive(id as u64);
    let resolve: FunctionRef = Arc::new(ResolverFunction {
        disposition: Disposition::Resolve,
        slot: slot.clone(),
        queue: queue.clone(),
    });
    let reject: FunctionRef = Arc::new(ResolverFunction {
        disposition: Disposition::Reject,
        slot,
        queue: queue.clone(),
    });

    if let Err(err) = target.invoke("then", &[Value::Function(resolve), Value::Function(reject)]) {
        tracing::warn!(error = %err, "promise callback registration failed");
        return Err(convert::throw_error(ctx, &err));
    }
    Ok(promise)
}

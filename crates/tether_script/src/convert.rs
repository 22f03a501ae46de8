//! Value ⇄ script-value conversion
//!
//! The boundary layer: every datum crossing between the engine heap and
//! the native side passes through `to_js`/`from_js`. Native handles become
//! proxies/functions whose trap closures own an `Arc` clone of the handle,
//! so the engine GC finalizing the script face is what releases the native
//! reference. Script functions and objects register in the slot table and
//! come back as [`ScriptFunction`]/[`ScriptObject`] handles.

use std::sync::Arc;

use rquickjs::function::Rest;
use rquickjs::{
    Array as JsArray, Coerced, Ctx, Exception, FromJs, Function as JsFunction, IntoJs,
    Value as JsValue,
};
use tether_core::{Error, Function, FunctionRef, Object, ObjectRef, Result, Value};

use crate::prelude;
use crate::promise;
use crate::queue::{Disposition, DispatchQueue, ScriptFunction, SlotKeepAlive};
use crate::runtime;

pub(crate) fn to_js<'js>(
    ctx: &Ctx<'js>,
    queue: &DispatchQueue,
    value: &Value,
) -> rquickjs::Result<JsValue<'js>> {
    match value {
        Value::Empty => Ok(JsValue::new_undefined(ctx.clone())),
        Value::Bool(v) => Ok(JsValue::new_bool(ctx.clone(), *v)),
        Value::Int8(v) => Ok(JsValue::new_int(ctx.clone(), i32::from(*v))),
        Value::UInt8(v) => Ok(JsValue::new_int(ctx.clone(), i32::from(*v))),
        Value::Int32(v) => Ok(JsValue::new_int(ctx.clone(), *v)),
        Value::UInt32(v) => match i32::try_from(*v) {
            Ok(i) => Ok(JsValue::new_int(ctx.clone(), i)),
            Err(_) => Ok(JsValue::new_float(ctx.clone(), f64::from(*v))),
        },
        Value::Int64(v) => Ok(JsValue::new_float(ctx.clone(), *v as f64)),
        Value::UInt64(v) => Ok(JsValue::new_float(ctx.clone(), *v as f64)),
        Value::Float(v) => Ok(JsValue::new_float(ctx.clone(), f64::from(*v))),
        Value::Double(v) => Ok(JsValue::new_float(ctx.clone(), *v)),
        Value::String(s) => s.as_str().into_js(ctx),
        Value::Ptr(_) => {
            tracing::warn!("opaque pointer has no script form; passing null");
            Ok(JsValue::new_null(ctx.clone()))
        }
        Value::Object(o) => wrap_object(ctx, queue, o.clone()),
        Value::Function(f) => wrap_function(ctx, queue, f.clone())?.into_js(ctx),
    }
}

/// Give a native function handle a script face. Arguments convert on the
/// way in, the result on the way out; a promise-shaped result is bridged
/// instead of proxied.
pub(crate) fn wrap_function<'js>(
    ctx: &Ctx<'js>,
    queue: &DispatchQueue,
    handle: FunctionRef,
) -> rquickjs::Result<JsFunction<'js>> {
    let queue = queue.clone();
    JsFunction::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<JsValue<'js>>| -> rquickjs::Result<JsValue<'js>> {
            let native_args: Vec<Value> = args
                .0
                .into_iter()
                .map(|a| from_js(&ctx, &queue, a))
                .collect();
            match handle.send(&native_args) {
                Ok(result) => {
                    if let Some(target) = promise::promise_target(&result) {
                        return promise::bridge_promise(&ctx, &queue, target);
                    }
                    to_js(&ctx, &queue, &result)
                }
                Err(err) => Err(throw_error(&ctx, &err)),
            }
        },
    )
}

/// Give a native object handle a script face: a proxy whose traps forward
/// into the handle. Numeric keys route to indexed access; trap failures
/// recover to `undefined` with a trace diagnostic.
pub(crate) fn wrap_object<'js>(
    ctx: &Ctx<'js>,
    queue: &DispatchQueue,
    handle: ObjectRef,
) -> rquickjs::Result<JsValue<'js>> {
    let getter = {
        let handle = handle.clone();
        let queue = queue.clone();
        JsFunction::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, key: String| -> rquickjs::Result<JsValue<'js>> {
                let result = match key.parse::<u32>() {
                    Ok(index) => handle.get_index(index),
                    Err(_) => handle.get(&key),
                };
                match result {
                    Ok(v) => to_js(&ctx, &queue, &v),
                    Err(Error::NotFound(_)) => Ok(JsValue::new_undefined(ctx.clone())),
                    Err(err) => {
                        tracing::trace!(key = %key, error = %err, "property get failed");
                        Ok(JsValue::new_undefined(ctx.clone()))
                    }
                }
            },
        )?
    };
    let setter = {
        let handle = handle.clone();
        let queue = queue.clone();
        JsFunction::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, key: String, value: JsValue<'js>| -> rquickjs::Result<()> {
                let value = from_js(&ctx, &queue, value);
                let result = match key.parse::<u32>() {
                    Ok(index) => handle.set_index(index, value),
                    Err(_) => handle.set(&key, value),
                };
                if let Err(err) = result {
                    tracing::trace!(key = %key, error = %err, "property set failed");
                }
                Ok(())
            },
        )?
    };
    let keys = {
        let handle = handle.clone();
        JsFunction::new(ctx.clone(), move || -> rquickjs::Result<Vec<String>> {
            Ok(handle.keys().unwrap_or_default())
        })?
    };
    let proxy: JsFunction = ctx.globals().get(prelude::PROXY)?;
    proxy.call((getter, setter, keys))
}

/// Script value → Value. Total like the conversion matrix: anything the
/// bridge cannot represent degrades to `Empty` with a diagnostic.
pub(crate) fn from_js<'js>(ctx: &Ctx<'js>, queue: &DispatchQueue, value: JsValue<'js>) -> Value {
    if value.is_undefined() || value.is_null() {
        return Value::Empty;
    }
    if let Some(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Some(i) = value.as_int() {
        return Value::Int32(i);
    }
    if let Some(f) = value.as_float() {
        return Value::Double(f);
    }
    if let Some(s) = value.as_string() {
        return match s.to_string() {
            Ok(s) => Value::String(s),
            Err(err) => {
                tracing::warn!(error = %err, "script string not convertible; using empty");
                Value::Empty
            }
        };
    }
    // functions are objects too, so check them first
    if value.is_function() {
        return match register_slot(ctx, queue, value) {
            Ok(slot) => Value::Function(Arc::new(ScriptFunction::new(slot, queue.clone()))),
            Err(err) => {
                tracing::warn!(error = %err, "script function registration failed");
                Value::Empty
            }
        };
    }
    if value.is_object() {
        return match register_slot(ctx, queue, value) {
            Ok(slot) => Value::Object(Arc::new(ScriptObject::new(slot, queue.clone()))),
            Err(err) => {
                tracing::warn!(error = %err, "script object registration failed");
                Value::Empty
            }
        };
    }
    tracing::warn!(kind = ?value.type_of(), "unsupported script value; using empty");
    Value::Empty
}

pub(crate) fn register_slot<'js>(
    ctx: &Ctx<'js>,
    queue: &DispatchQueue,
    target: JsValue<'js>,
) -> rquickjs::Result<Arc<SlotKeepAlive>> {
    let register: JsFunction = ctx.globals().get(prelude::REGISTER)?;
    let Coerced(id) = register.call::<_, Coerced<f64>>((target,))?;
    Ok(queue.keep_alive(id as u64))
}

pub(crate) fn args_array<'js>(
    ctx: &Ctx<'js>,
    queue: &DispatchQueue,
    args: &[Value],
) -> rquickjs::Result<JsArray<'js>> {
    let arr = JsArray::new(ctx.clone())?;
    for (i, a) in args.iter().enumerate() {
        arr.set(i, to_js(ctx, queue, a)?)?;
    }
    Ok(arr)
}

pub(crate) fn throw_error(ctx: &Ctx<'_>, err: &Error) -> rquickjs::Error {
    Exception::throw_message(ctx, &err.to_string())
}

pub(crate) fn map_js_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> Error {
    match err {
        rquickjs::Error::Exception => Error::Exception(format_exception(ctx, ctx.catch())),
        other => Error::Engine(other.to_string()),
    }
}

/// Message plus stack when the thrown value is an Error object, otherwise
/// a best-effort stringification.
pub(crate) fn format_exception<'js>(ctx: &Ctx<'js>, caught: JsValue<'js>) -> String {
    if let Some(obj) = caught.as_object() {
        if let Some(exception) = Exception::from_object(obj.clone()) {
            return match (exception.message(), exception.stack()) {
                (Some(message), Some(stack)) => format!("{message}\n{stack}"),
                (Some(message), None) => message,
                (None, Some(stack)) => stack,
                (None, None) => "unknown exception".to_string(),
            };
        }
    }
    match Coerced::<String>::from_js(ctx, caught) {
        Ok(text) => text.0,
        Err(err) => format!("(unprintable exception: {err})"),
    }
}

/// Script-backed object handle. Property access runs directly against the
/// engine heap and is therefore only legal on the script-owning thread;
/// any other thread gets `WrongThread`. Cross-thread work goes through a
/// script-backed *function* and the dispatch queue instead.
pub struct ScriptObject {
    slot: Arc<SlotKeepAlive>,
    queue: DispatchQueue,
}

impl ScriptObject {
    pub(crate) fn new(slot: Arc<SlotKeepAlive>, queue: DispatchQueue) -> Self {
        Self { slot, queue }
    }

    fn on_engine<R>(&self, f: impl for<'js> FnOnce(&Ctx<'js>) -> Result<R>) -> Result<R> {
        if !self.queue.is_owner_thread() {
            return Err(Error::WrongThread);
        }
        runtime::with_active_context(&self.queue, f)
    }

    fn id(&self) -> f64 {
        self.slot.id() as f64
    }
}

impl Object for ScriptObject {
    fn get(&self, name: &str) -> Result<Value> {
        self.on_engine(|ctx| {
            let get: JsFunction = ctx
                .globals()
                .get(prelude::SLOT_GET)
                .map_err(|e| map_js_error(ctx, e))?;
            let v: JsValue = get
                .call((self.id(), name))
                .map_err(|e| map_js_error(ctx, e))?;
            Ok(from_js(ctx, &self.queue, v))
        })
    }

    fn set(&self, name: &str, value: Value) -> Result<()> {
        self.on_engine(|ctx| {
            let set: JsFunction = ctx
                .globals()
                .get(prelude::SLOT_SET)
                .map_err(|e| map_js_error(ctx, e))?;
            let js = to_js(ctx, &self.queue, &value).map_err(|e| map_js_error(ctx, e))?;
            set.call::<_, ()>((self.id(), name, js))
                .map_err(|e| map_js_error(ctx, e))
        })
    }

    fn get_index(&self, index: u32) -> Result<Value> {
        self.on_engine(|ctx| {
            let get: JsFunction = ctx
                .globals()
                .get(prelude::SLOT_GET)
                .map_err(|e| map_js_error(ctx, e))?;
            let v: JsValue = get
                .call((self.id(), index))
                .map_err(|e| map_js_error(ctx, e))?;
            Ok(from_js(ctx, &self.queue, v))
        })
    }

    fn set_index(&self, index: u32, value: Value) -> Result<()> {
        self.on_engine(|ctx| {
            let set: JsFunction = ctx
                .globals()
                .get(prelude::SLOT_SET)
                .map_err(|e| map_js_error(ctx, e))?;
            let js = to_js(ctx, &self.queue, &value).map_err(|e| map_js_error(ctx, e))?;
            set.call::<_, ()>((self.id(), index, js))
                .map_err(|e| map_js_error(ctx, e))
        })
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.on_engine(|ctx| {
            let keys: JsFunction = ctx
                .globals()
                .get(prelude::SLOT_KEYS)
                .map_err(|e| map_js_error(ctx, e))?;
            keys.call((self.id(),)).map_err(|e| map_js_error(ctx, e))
        })
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value> {
        self.on_engine(|ctx| {
            let invoke: JsFunction = ctx
                .globals()
                .get(prelude::SLOT_INVOKE)
                .map_err(|e| map_js_error(ctx, e))?;
            let arr = args_array(ctx, &self.queue, args).map_err(|e| map_js_error(ctx, e))?;
            let v: JsValue = invoke
                .call((self.id(), method, arr))
                .map_err(|e| map_js_error(ctx, e))?;
            Ok(from_js(ctx, &self.queue, v))
        })
    }
}

/// Deliver a queued settlement to the engine-heap resolver. Exceptions are
/// caught and logged here; settlement never propagates a failure.
pub(crate) fn apply_settle<'js>(
    ctx: &Ctx<'js>,
    queue: &DispatchQueue,
    slot: &SlotKeepAlive,
    disposition: Disposition,
    value: &Value,
) {
    let result: rquickjs::Result<()> = (|| {
        let settle: JsFunction = ctx.globals().get(prelude::SETTLE)?;
        let js = to_js(ctx, queue, value)?;
        settle.call::<_, ()>((slot.id() as f64, disposition == Disposition::Resolve, js))
    })();
    if let Err(err) = result {
        tracing::warn!(
            error = %map_js_error(ctx, err),
            "promise settlement raised"
        );
    }
}

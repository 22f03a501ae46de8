//! Script engine management
//!
//! Owns the QuickJS runtime/context pair, the consumer half of the
//! dispatch queue, and the engine-heap slot table installed by the
//! prelude. Only the thread that constructed the engine ever executes
//! script code; everything arriving from other threads comes in through
//! the queue and is drained here.

use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use rquickjs::{Array as JsArray, Context, Ctx, Function as JsFunction, Runtime, Value as JsValue};
use serde::{Deserialize, Serialize};
use tether_core::{Error, FunctionRef, Result, Value};

use crate::convert;
use crate::prelude;
use crate::queue::{DispatchQueue, InvocationRecord, Message, MessageReceiver, SlotId};

static ENGINE_SEQ: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // engines live on the thread that built them; script-backed object
    // access looks the context up here
    static ACTIVE: RefCell<Vec<(u64, Context)>> = const { RefCell::new(Vec::new()) };
}

/// Run a closure against the context of the engine backing `queue`, if
/// that engine lives on the current thread and is still alive.
pub(crate) fn with_active_context<R>(
    queue: &DispatchQueue,
    f: impl for<'js> FnOnce(&Ctx<'js>) -> Result<R>,
) -> Result<R> {
    let context = ACTIVE.with(|active| {
        active
            .borrow()
            .iter()
            .find(|(id, _)| *id == queue.engine_id())
            .map(|(_, context)| context.clone())
    });
    match context {
        Some(context) => context.with(|ctx| f(&ctx)),
        None => Err(Error::WrongThread),
    }
}

/// Engine limits, deserializable from application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// QuickJS heap ceiling in bytes; unlimited when absent.
    pub memory_limit: Option<usize>,
    /// Script stack ceiling in bytes; engine default when absent.
    pub max_stack_size: Option<usize>,
    /// Cap on microtask jobs run per drain pass; to-fixpoint when absent.
    pub job_budget: Option<usize>,
}

/// Script execution context plus the bridge plumbing around it.
pub struct ScriptEngine {
    runtime: Runtime,
    context: Context,
    queue: DispatchQueue,
    rx: MessageReceiver,
    engine_id: u64,
    job_budget: Option<usize>,
}

impl ScriptEngine {
    pub fn new() -> Result<Self> {
        Self::with_config(ScriptConfig::default())
    }

    pub fn with_config(config: ScriptConfig) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| Error::Engine(e.to_string()))?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        let context = Context::full(&runtime).map_err(|e| Error::Engine(e.to_string()))?;

        let engine_id = ENGINE_SEQ.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        let queue = DispatchQueue::new(tx, engine_id);

        context.with(|ctx| {
            ctx.eval::<(), _>(prelude::PRELUDE)
                .map_err(|e| convert::map_js_error(&ctx, e))
        })?;
        ACTIVE.with(|active| active.borrow_mut().push((engine_id, context.clone())));

        Ok(Self {
            runtime,
            context,
            queue,
            rx,
            engine_id,
            job_budget: config.job_budget,
        })
    }

    /// Producer handle for the dispatch queue; clonable and sendable to
    /// worker threads.
    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    pub fn execute(&self, source: &str) -> Result<()> {
        self.context.with(|ctx| {
            ctx.eval::<(), _>(source)
                .map_err(|e| convert::map_js_error(&ctx, e))
        })
    }

    pub fn execute_file(&self, path: &Path) -> Result<()> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Engine(format!("{}: {e}", path.display())))?;
        self.execute(&source)
    }

    /// Evaluate and convert the result out of the engine heap.
    pub fn eval(&self, source: &str) -> Result<Value> {
        self.context.with(|ctx| {
            let v = ctx
                .eval::<JsValue, _>(source)
                .map_err(|e| convert::map_js_error(&ctx, e))?;
            Ok(convert::from_js(&ctx, &self.queue, v))
        })
    }

    /// Call a global script function by name with converted arguments.
    pub fn call_function(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.context.with(|ctx| {
            let result: rquickjs::Result<JsValue> = (|| {
                let func: JsFunction = ctx.globals().get(name)?;
                let apply: JsFunction = ctx.globals().get(prelude::APPLY)?;
                let arr = convert::args_array(&ctx, &self.queue, args)?;
                apply.call((func, arr))
            })();
            match result {
                Ok(v) => Ok(convert::from_js(&ctx, &self.queue, v)),
                Err(e) => Err(convert::map_js_error(&ctx, e)),
            }
        })
    }

    /// Expose a native value to script under a global name. Handles are
    /// wrapped per the marshaling rules; everything else converts.
    pub fn set_global(&self, name: &str, value: Value) -> Result<()> {
        self.context.with(|ctx| {
            let result: rquickjs::Result<()> = (|| {
                let js = convert::to_js(&ctx, &self.queue, &value)?;
                ctx.globals().set(name, js)
            })();
            result.map_err(|e| convert::map_js_error(&ctx, e))
        })
    }

    /// JSON convenience for config-shaped globals.
    pub fn set_global_json(&self, name: &str, json: &serde_json::Value) -> Result<()> {
        self.set_global(name, tether_core::json::from_json(json))
    }

    /// Read a global out of the engine heap and convert it.
    pub fn global(&self, name: &str) -> Result<Value> {
        self.context.with(|ctx| {
            let v: JsValue = ctx
                .globals()
                .get(name)
                .map_err(|e| convert::map_js_error(&ctx, e))?;
            Ok(convert::from_js(&ctx, &self.queue, v))
        })
    }

    /// Wrap the named global as a script-backed function handle, failing
    /// when it is not callable.
    pub fn wrap_script(&self, name: &str) -> Result<FunctionRef> {
        match self.global(name)? {
            Value::Function(f) => Ok(f),
            _ => Err(Error::TypeMismatch("function")),
        }
    }

    /// Like [`wrap_script`](Self::wrap_script), but returns the concrete
    /// handle so callers can build records with a reply channel.
    pub fn script_function(&self, name: &str) -> Result<crate::queue::ScriptFunction> {
        self.context.with(|ctx| {
            let v: JsValue = ctx
                .globals()
                .get(name)
                .map_err(|e| convert::map_js_error(&ctx, e))?;
            if !v.is_function() {
                return Err(Error::TypeMismatch("function"));
            }
            let slot = convert::register_slot(&ctx, &self.queue, v)
                .map_err(|e| convert::map_js_error(&ctx, e))?;
            Ok(crate::queue::ScriptFunction::new(slot, self.queue.clone()))
        })
    }

    /// Execute at most one queued message to completion. Returns whether
    /// anything was dequeued.
    pub fn drain_once(&self) -> bool {
        let message = match self.rx.try_recv() {
            Ok(m) => m,
            Err(_) => return false,
        };
        self.context.with(|ctx| self.dispatch(&ctx, message));
        true
    }

    /// Drain every pending message, running engine jobs (promise
    /// reactions) between messages and once more at the end. Returns the
    /// number of messages executed.
    pub fn pump(&self) -> usize {
        let mut executed = 0;
        while self.drain_once() {
            executed += 1;
            self.run_jobs();
        }
        self.run_jobs();
        executed
    }

    fn dispatch<'js>(&self, ctx: &Ctx<'js>, message: Message) {
        match message {
            Message::Invoke(record) => self.apply_invoke(ctx, record),
            Message::Settle {
                slot,
                disposition,
                value,
            } => convert::apply_settle(ctx, &self.queue, &slot, disposition, &value),
            Message::Release(id) => self.apply_release(ctx, id),
        }
    }

    fn apply_invoke<'js>(&self, ctx: &Ctx<'js>, record: InvocationRecord) {
        let InvocationRecord {
            target,
            args,
            reply,
        } = record;
        let result: rquickjs::Result<JsValue> = (|| {
            let invoke: JsFunction = ctx.globals().get(prelude::INVOKE)?;
            let arr: JsArray = convert::args_array(ctx, &self.queue, &args)?;
            invoke.call((target.id() as f64, arr))
        })();
        match result {
            Ok(v) => {
                if let Some(reply) = reply {
                    let _ = reply.send(convert::from_js(ctx, &self.queue, v));
                }
            }
            Err(err) => {
                // caught at the drain boundary; the caller already returned
                tracing::warn!(
                    error = %convert::map_js_error(ctx, err),
                    "queued invocation raised"
                );
                if let Some(reply) = reply {
                    let _ = reply.send(Value::Empty);
                }
            }
        }
    }

    fn apply_release<'js>(&self, ctx: &Ctx<'js>, id: SlotId) {
        let result: rquickjs::Result<()> = (|| {
            let release: JsFunction = ctx.globals().get(prelude::RELEASE)?;
            release.call::<_, ()>((id as f64,))
        })();
        if let Err(err) = result {
            tracing::warn!(error = %convert::map_js_error(ctx, err), "slot release failed");
        }
    }

    fn run_jobs(&self) {
        let mut budget = self.job_budget;
        loop {
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    break;
                }
                *remaining -= 1;
            }
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    // the faulty job is consumed; keep draining the rest
                    tracing::warn!("pending engine job raised");
                }
            }
        }
    }
}

impl Drop for ScriptEngine {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active
                .borrow_mut()
                .retain(|(id, _)| *id != self.engine_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    use tether_core::{
        ArrayObject, Error, Function, NativeFunction, NativePromise, Object, ObjectRef,
        PropertyBag, Value,
    };

    use super::*;

    #[test]
    fn test_eval_primitives() {
        let engine = ScriptEngine::new().unwrap();
        assert_eq!(engine.eval("1 + 2").unwrap().get_i32(), 3);
        assert_eq!(engine.eval("'a' + 'b'").unwrap().get_string(), "ab");
        assert!(engine.eval("1 < 2").unwrap().get_bool());
        assert!(matches!(engine.eval("undefined").unwrap(), Value::Empty));
        assert!(matches!(engine.eval("null").unwrap(), Value::Empty));
        assert_eq!(engine.eval("0.5").unwrap().get_f64(), 0.5);
    }

    #[test]
    fn test_execute_error_carries_message() {
        let engine = ScriptEngine::new().unwrap();
        let err = engine.execute("throw new Error('boom')").unwrap_err();
        match err {
            Error::Exception(text) => assert!(text.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_native_function_receives_args_in_order() {
        let engine = ScriptEngine::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine
            .set_global(
                "record",
                Value::Function(NativeFunction::new(move |args| {
                    sink.lock().unwrap().push(
                        args.iter().map(Value::get_string).collect::<Vec<_>>(),
                    );
                    Ok(Value::Empty)
                })),
            )
            .unwrap();
        engine.execute("record('first', 2, true)").unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec!["first", "2", "true"]);
    }

    #[test]
    fn test_native_function_result_flows_back() {
        let engine = ScriptEngine::new().unwrap();
        engine
            .set_global(
                "double",
                Value::Function(NativeFunction::new(|args| {
                    Ok(Value::Int32(args.first().map_or(0, Value::get_i32) * 2))
                })),
            )
            .unwrap();
        assert_eq!(engine.eval("double(21)").unwrap().get_i32(), 42);
    }

    #[test]
    fn test_native_function_error_becomes_exception() {
        let engine = ScriptEngine::new().unwrap();
        engine
            .set_global(
                "fail",
                Value::Function(NativeFunction::new(|_| {
                    Err(Error::Invocation("no dice".into()))
                })),
            )
            .unwrap();
        let caught = engine
            .eval("(function(){ try { fail(); return 'ran'; } catch (e) { return String(e); } })()")
            .unwrap()
            .get_string();
        assert!(caught.contains("no dice"));
    }

    #[test]
    fn test_call_function_with_args() {
        let engine = ScriptEngine::new().unwrap();
        engine
            .execute("function add(a, b) { return a + b; }")
            .unwrap();
        let result = engine
            .call_function("add", &[Value::Int32(40), Value::Int32(2)])
            .unwrap();
        assert_eq!(result.get_i32(), 42);
    }

    #[test]
    fn test_wrap_script_rejects_non_function() {
        let engine = ScriptEngine::new().unwrap();
        engine.execute("var notFn = 5;").unwrap();
        assert!(matches!(
            engine.wrap_script("notFn"),
            Err(Error::TypeMismatch(_))
        ));
        engine.execute("function yes() {}").unwrap();
        assert!(engine.wrap_script("yes").is_ok());
    }

    #[test]
    fn test_script_function_deferred_from_worker_thread() {
        let engine = ScriptEngine::new().unwrap();
        engine
            .execute("var calls = []; function tag(v) { calls.push(v); return 'real'; }")
            .unwrap();
        let tag = engine.wrap_script("tag").unwrap();

        let handle = std::thread::spawn(move || tag.send(&[Value::Int32(7)]));
        let disposition = handle.join().unwrap().unwrap();
        // the send disposition is fixed; the callee has not run yet
        assert!(matches!(disposition, Value::Bool(true)));
        assert_eq!(engine.eval("calls.length").unwrap().get_i32(), 0);

        assert!(engine.pump() >= 1);
        assert_eq!(engine.eval("calls.length").unwrap().get_i32(), 1);
        assert_eq!(engine.eval("calls[0]").unwrap().get_i32(), 7);
    }

    #[test]
    fn test_deferred_calls_run_in_enqueue_order() {
        let engine = ScriptEngine::new().unwrap();
        engine
            .execute("var order = []; function tag(v) { order.push(v); }")
            .unwrap();
        let tag = engine.wrap_script("tag").unwrap();

        let handle = std::thread::spawn(move || {
            for i in 0..10 {
                tag.send(&[Value::Int32(i)]).unwrap();
            }
        });
        handle.join().unwrap();
        engine.pump();
        assert_eq!(engine.eval("order.join(',')").unwrap().get_string(), "0,1,2,3,4,5,6,7,8,9");
    }

    #[test]
    fn test_reply_channel_carries_real_result() {
        let engine = ScriptEngine::new().unwrap();
        engine
            .execute("function shout(s) { return s.toUpperCase(); }")
            .unwrap();
        let shout = engine.script_function("shout").unwrap();
        let (reply_tx, reply_rx) = mpsc::channel();
        let queue = engine.queue();
        let handle = std::thread::spawn(move || {
            let record = shout.record(&[Value::from("abc")], Some(reply_tx));
            queue.enqueue(record).unwrap();
        });
        handle.join().unwrap();
        engine.pump();
        assert_eq!(reply_rx.recv().unwrap().get_string(), "ABC");
    }

    #[test]
    fn test_queued_exception_is_contained() {
        let engine = ScriptEngine::new().unwrap();
        engine
            .execute("var ran = false; function bad() { throw new Error('late'); } function good() { ran = true; }")
            .unwrap();
        let bad = engine.wrap_script("bad").unwrap();
        let good = engine.wrap_script("good").unwrap();
        bad.send(&[]).unwrap();
        good.send(&[]).unwrap();
        // the failing record is consumed and the next one still runs
        assert_eq!(engine.pump(), 2);
        assert!(engine.eval("ran").unwrap().get_bool());
    }

    #[test]
    fn test_queue_closed_after_engine_drop() {
        let engine = ScriptEngine::new().unwrap();
        engine.execute("function f() {}").unwrap();
        let f = engine.wrap_script("f").unwrap();
        drop(engine);
        assert!(matches!(f.send(&[]), Err(Error::QueueClosed)));
    }

    #[test]
    fn test_property_bag_proxy_get_set() {
        let engine = ScriptEngine::new().unwrap();
        let bag = Arc::new(PropertyBag::new().with("width", 640).with("label", "main"));
        engine
            .set_global("cfg", Value::Object(bag.clone()))
            .unwrap();
        assert_eq!(engine.eval("cfg.width").unwrap().get_i32(), 640);
        assert_eq!(engine.eval("cfg.label").unwrap().get_string(), "main");
        assert!(matches!(engine.eval("cfg.missing").unwrap(), Value::Empty));

        engine.execute("cfg.width = 800; cfg.fresh = 'new';").unwrap();
        assert_eq!(bag.get("width").unwrap().get_i32(), 800);
        assert_eq!(bag.get("fresh").unwrap().get_string(), "new");
    }

    #[test]
    fn test_array_proxy_routes_numeric_keys() {
        let engine = ScriptEngine::new().unwrap();
        let arr = Arc::new(ArrayObject::from_values(vec![
            Value::Int32(10),
            Value::Int32(20),
        ]));
        engine
            .set_global("items", Value::Object(arr.clone()))
            .unwrap();
        assert_eq!(engine.eval("items[0]").unwrap().get_i32(), 10);
        assert_eq!(engine.eval("items.length").unwrap().get_i32(), 2);
        engine.execute("items[1] = 99;").unwrap();
        assert_eq!(arr.get_index(1).unwrap().get_i32(), 99);
    }

    #[test]
    fn test_script_object_handle_round_trip() {
        let engine = ScriptEngine::new().unwrap();
        let value = engine.eval("({ name: 'box', size: 3 })").unwrap();
        let Value::Object(obj) = value else {
            panic!("expected an object handle");
        };
        assert_eq!(obj.get("name").unwrap().get_string(), "box");
        assert_eq!(obj.get("size").unwrap().get_i32(), 3);
        obj.set("size", Value::Int32(4)).unwrap();
        assert_eq!(obj.get("size").unwrap().get_i32(), 4);
        let mut keys = obj.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["name", "size"]);
    }

    #[test]
    fn test_script_object_direct_access_requires_owner_thread() {
        let engine = ScriptEngine::new().unwrap();
        let Value::Object(obj) = engine.eval("({ a: 1 })").unwrap() else {
            panic!("expected an object handle");
        };
        let handle = std::thread::spawn(move || obj.get("a"));
        assert!(matches!(
            handle.join().unwrap(),
            Err(Error::WrongThread)
        ));
    }

    #[test]
    fn test_promise_resolved_from_worker_thread() {
        let engine = ScriptEngine::new().unwrap();
        let promise = Arc::new(NativePromise::new());
        let source: ObjectRef = promise.clone();
        engine
            .set_global(
                "fetchValue",
                Value::Function(NativeFunction::new(move |_| {
                    Ok(Value::Object(source.clone()))
                })),
            )
            .unwrap();
        engine
            .execute(
                "var outcome = null; fetchValue().then(function (v) { outcome = 'ok:' + v; }, function (e) { outcome = 'err:' + e; });",
            )
            .unwrap();
        assert!(matches!(engine.eval("outcome").unwrap(), Value::Empty));

        let resolver = promise.clone();
        std::thread::spawn(move || resolver.resolve(Value::Int32(5)))
            .join()
            .unwrap();
        engine.pump();
        assert_eq!(engine.eval("outcome").unwrap().get_string(), "ok:5");

        // first settlement won; a later reject is a no-op
        promise.reject(Value::from("too late"));
        engine.pump();
        assert_eq!(engine.eval("outcome").unwrap().get_string(), "ok:5");
    }

    #[test]
    fn test_promise_rejection_reaches_script() {
        let engine = ScriptEngine::new().unwrap();
        let promise = Arc::new(NativePromise::new());
        let source: ObjectRef = promise.clone();
        engine
            .set_global(
                "task",
                Value::Function(NativeFunction::new(move |_| {
                    Ok(Value::Object(source.clone()))
                })),
            )
            .unwrap();
        engine
            .execute("var failure = null; task().catch(function (e) { failure = String(e); });")
            .unwrap();
        promise.reject(Value::from("denied"));
        engine.pump();
        assert_eq!(engine.eval("failure").unwrap().get_string(), "denied");
    }

    #[test]
    fn test_plain_object_is_not_promise_bridged() {
        let engine = ScriptEngine::new().unwrap();
        let bag = Arc::new(PropertyBag::new().with("then", "not a method"));
        engine
            .set_global(
                "give",
                Value::Function(NativeFunction::new(move |_| {
                    Ok(Value::Object(bag.clone()))
                })),
            )
            .unwrap();
        // a `then` property alone does not make it a promise
        assert_eq!(
            engine.eval("give().then").unwrap().get_string(),
            "not a method"
        );
    }

    #[test]
    fn test_set_global_json() {
        let engine = ScriptEngine::new().unwrap();
        let settings: serde_json::Value = serde_json::json!({
            "name": "tether",
            "retries": 3,
            "tags": ["a", "b"]
        });
        engine.set_global_json("settings", &settings).unwrap();
        assert_eq!(engine.eval("settings.name").unwrap().get_string(), "tether");
        assert_eq!(engine.eval("settings.retries").unwrap().get_i32(), 3);
        assert_eq!(engine.eval("settings.tags[1]").unwrap().get_string(), "b");
    }

    #[test]
    fn test_memory_limit_is_enforced() {
        let engine = ScriptEngine::with_config(ScriptConfig {
            memory_limit: Some(4 * 1024 * 1024),
            ..ScriptConfig::default()
        })
        .unwrap();
        let result = engine.execute(
            "var hog = []; for (var i = 0; i < 1e7; i++) hog.push('block-' + i);",
        );
        assert!(result.is_err());
    }
}

//! Tether Bridge Runtime
//!
//! Minimal binary that links the bridge crates and runs a script, either
//! from a path given on the command line or a built-in demo.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tether_core::{NativeFunction, NativePromise, Object, ObjectRef, PropertyBag, Value};
use tether_script::ScriptEngine;

const DEMO: &str = r#"
log('host.name = ' + host.name);
log('settings.retries = ' + settings.retries);
host.visits = host.visits + 1;

fetchAnswer().then(function (answer) {
    log('answer arrived: ' + answer);
}, function (err) {
    log('answer failed: ' + err);
});
"#;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Tether Bridge v{}", tether_core::VERSION);

    let engine = ScriptEngine::new()?;

    engine.set_global(
        "log",
        Value::Function(NativeFunction::new(|args| {
            let line: Vec<String> = args.iter().map(Value::get_string).collect();
            tracing::info!(target: "script", "{}", line.join(" "));
            Ok(Value::Empty)
        })),
    )?;

    let host = Arc::new(PropertyBag::new().with("name", "tether").with("visits", 0));
    engine.set_global("host", Value::Object(host.clone()))?;

    engine.set_global_json(
        "settings",
        &serde_json::json!({ "retries": 3, "verbose": true }),
    )?;

    // a native async source: the promise settles from a worker thread and
    // the settlement is marshaled back through the dispatch queue
    let answer = Arc::new(NativePromise::new());
    let source: ObjectRef = answer.clone();
    engine.set_global(
        "fetchAnswer",
        Value::Function(NativeFunction::new(move |_| {
            Ok(Value::Object(source.clone()))
        })),
    )?;

    let worker = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        answer.resolve(Value::Int32(42));
    });

    match std::env::args().nth(1) {
        Some(path) => engine.execute_file(Path::new(&path))?,
        None => engine.execute(DEMO)?,
    }

    worker.join().ok();
    let executed = engine.pump();
    tracing::info!(executed, "queue drained");

    tracing::info!(
        visits = host.get("visits").map(|v| v.get_i32()).unwrap_or(0),
        "script finished"
    );
    Ok(())
}

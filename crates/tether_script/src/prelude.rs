//! Script-side half of the bridge
//!
//! Installed once per engine. Script-backed targets (functions, objects,
//! promise resolvers) live in an engine-heap slot table keyed by integer
//! id; the native side only ever holds ids, so nothing engine-owned
//! crosses a thread boundary. The proxy factory builds the script face of
//! a native object around a pair of trap closures.

pub(crate) const REGISTER: &str = "__tether_register";
pub(crate) const RELEASE: &str = "__tether_release";
pub(crate) const INVOKE: &str = "__tether_invoke";
pub(crate) const APPLY: &str = "__tether_apply";
pub(crate) const SLOT_GET: &str = "__tether_slot_get";
pub(crate) const SLOT_SET: &str = "__tether_slot_set";
pub(crate) const SLOT_KEYS: &str = "__tether_slot_keys";
pub(crate) const SLOT_INVOKE: &str = "__tether_slot_invoke";
pub(crate) const MAKE_PROMISE: &str = "__tether_make_promise";
pub(crate) const SETTLE: &str = "__tether_settle";
pub(crate) const PROXY: &str = "__tether_proxy";

pub(crate) const PRELUDE: &str = r#"
(function (g) {
    'use strict';
    var slots = new Map();
    var nextId = 1;
    g.__tether_register = function (target) {
        var id = nextId++;
        slots.set(id, target);
        return id;
    };
    g.__tether_release = function (id) {
        slots.delete(id);
    };
    g.__tether_invoke = function (id, args) {
        var target = slots.get(id);
        if (target === undefined) return undefined;
        return target.apply(undefined, args);
    };
    g.__tether_apply = function (target, args) {
        return target.apply(undefined, args);
    };
    g.__tether_slot_get = function (id, key) {
        var target = slots.get(id);
        return target === undefined ? undefined : target[key];
    };
    g.__tether_slot_set = function (id, key, value) {
        var target = slots.get(id);
        if (target !== undefined) target[key] = value;
    };
    g.__tether_slot_keys = function (id) {
        var target = slots.get(id);
        return target === undefined ? [] : Object.keys(target);
    };
    g.__tether_slot_invoke = function (id, key, args) {
        var target = slots.get(id);
        if (target === undefined) return undefined;
        return target[key].apply(target, args);
    };
    g.__tether_make_promise = function () {
        var state = {};
        var id = nextId++;
        state.promise = new Promise(function (resolve, reject) {
            state.resolve = resolve;
            state.reject = reject;
        });
        slots.set(id, state);
        return { id: id, promise: state.promise };
    };
    g.__tether_settle = function (id, resolved, value) {
        var state = slots.get(id);
        if (state === undefined) return;
        slots.delete(id);
        if (resolved) state.resolve(value);
        else state.reject(value);
    };
    g.__tether_proxy = function (get, set, keys) {
        return new Proxy({}, {
            get: function (t, key) { return get(String(key)); },
            set: function (t, key, value) { set(String(key), value); return true; },
            has: function (t, key) { return get(String(key)) !== undefined; },
            ownKeys: function () { return keys(); },
            getOwnPropertyDescriptor: function (t, key) {
                return { enumerable: true, configurable: true, value: get(String(key)) };
            }
        });
    };
})(globalThis);
"#;

//! JSON ⇄ Value interop
//!
//! Structured data (config blobs, network payloads) enters the bridge as
//! `serde_json::Value` and is repacked into the variant type: JSON objects
//! become [`PropertyBag`]s, JSON arrays become [`ArrayObject`]s. The
//! reverse direction walks the handle protocol, so it works for any
//! enumerable object, not just the two library types.

use crate::error::Error;
use crate::object::{ArrayObject, Object, PropertyBag};
use crate::value::Value;

pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Empty,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if let Ok(i) = i32::try_from(i) {
                    Value::Int32(i)
                } else {
                    Value::Int64(i)
                }
            } else {
                Value::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::object(ArrayObject::from_values(items.iter().map(from_json).collect()))
        }
        serde_json::Value::Object(map) => {
            let bag = PropertyBag::new();
            for (k, v) in map {
                bag.insert(k, from_json(v));
            }
            Value::object(bag)
        }
    }
}

pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Empty => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int8(v) => serde_json::json!(*v),
        Value::UInt8(v) => serde_json::json!(*v),
        Value::Int32(v) => serde_json::json!(*v),
        Value::UInt32(v) => serde_json::json!(*v),
        Value::Int64(v) => serde_json::json!(*v),
        Value::UInt64(v) => serde_json::json!(*v),
        Value::Float(v) => serde_json::json!(*v),
        Value::Double(v) => serde_json::json!(*v),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Ptr(_) | Value::Function(_) => {
            tracing::trace!(kind = value.type_name(), "no JSON form; emitting null");
            serde_json::Value::Null
        }
        Value::Object(obj) => object_to_json(obj.as_ref()),
    }
}

fn object_to_json(obj: &dyn Object) -> serde_json::Value {
    // array-shaped objects expose `length` AND support indexed access; a
    // map that merely carries a `length` property stays an object
    if let Ok(length) = obj.get("length") {
        let supports_index = !matches!(obj.get_index(0), Err(Error::Unsupported(_)));
        if supports_index {
            let length = length.get_u32();
            let items = (0..length)
                .map(|i| obj.get_index(i).map(|v| to_json(&v)).unwrap_or(serde_json::Value::Null))
                .collect();
            return serde_json::Value::Array(items);
        }
    }
    match obj.keys() {
        Ok(keys) => {
            let mut map = serde_json::Map::new();
            for key in keys {
                if let Ok(v) = obj.get(&key) {
                    map.insert(key, to_json(&v));
                }
            }
            serde_json::Value::Object(map)
        }
        Err(_) => serde_json::Value::Null,
    }
}

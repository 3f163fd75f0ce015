//! Wires the datastore channels to the storage engine.
//!
//! Collection registration is the one synchronous handler: the initiator
//! blocks on it at collection construction time, before its first query.
//! Everything else runs on the async path, where a handler failure is
//! marshaled into an error envelope by the responder.

use crate::engine::Engine;
use cadenza_core::ipc::channels;
use cadenza_core::store::IndexSpec;
use cadenza_core::{RemoteError, Responder};
use serde_json::{json, Value};
use std::sync::Arc;

fn str_arg(args: &[Value], index: usize, name: &str) -> std::result::Result<String, RemoteError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            RemoteError::new(
                "InvalidArgumentError",
                format!("missing string argument {name:?} at position {index}"),
            )
        })
}

fn value_arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

/// Filters default to match-everything when omitted.
fn filter_arg(args: &[Value], index: usize) -> Value {
    match value_arg(args, index) {
        Value::Null => json!({}),
        filter => filter,
    }
}

/// Register every datastore channel handler on the responder.
pub fn register(responder: &mut Responder, engine: Arc<Engine>) {
    let e = engine.clone();
    responder.register_sync_handler(channels::STORE_REGISTER, move |args| {
        let name = str_arg(&args, 0, "collection")?;
        let indexes_value = match value_arg(&args, 1) {
            Value::Null => json!([]),
            value => value,
        };
        let indexes: Vec<IndexSpec> = serde_json::from_value(indexes_value).map_err(|err| {
            RemoteError::new("InvalidArgumentError", format!("bad index list: {err}"))
        })?;
        e.register(&name, indexes);
        Ok(Value::Null)
    });

    let e = engine.clone();
    responder.register_async_handler(channels::STORE_COUNT, move |args| {
        let e = e.clone();
        async move {
            let name = str_arg(&args, 0, "collection")?;
            let count = e.count(&name)?;
            Ok(json!(count))
        }
    });

    let e = engine.clone();
    responder.register_async_handler(channels::STORE_FIND, move |args| {
        let e = e.clone();
        async move {
            let name = str_arg(&args, 0, "collection")?;
            let records = e.find(&name, &filter_arg(&args, 1), &filter_arg(&args, 2))?;
            Ok(Value::Array(records))
        }
    });

    let e = engine.clone();
    responder.register_async_handler(channels::STORE_FIND_ONE, move |args| {
        let e = e.clone();
        async move {
            let name = str_arg(&args, 0, "collection")?;
            Ok(e.find_one(&name, &filter_arg(&args, 1))?)
        }
    });

    let e = engine.clone();
    responder.register_async_handler(channels::STORE_INSERT_ONE, move |args| {
        let e = e.clone();
        async move {
            let name = str_arg(&args, 0, "collection")?;
            Ok(e.insert_one(&name, value_arg(&args, 1))?)
        }
    });

    let e = engine.clone();
    responder.register_async_handler(channels::STORE_UPDATE_ONE, move |args| {
        let e = e.clone();
        async move {
            let name = str_arg(&args, 0, "collection")?;
            let id = str_arg(&args, 1, "id")?;
            Ok(e.update_one(&name, &id, &value_arg(&args, 2))?)
        }
    });

    let e = engine.clone();
    responder.register_async_handler(channels::STORE_UPSERT_ONE, move |args| {
        let e = e.clone();
        async move {
            let name = str_arg(&args, 0, "collection")?;
            Ok(e.upsert_one(&name, &filter_arg(&args, 1), &value_arg(&args, 2))?)
        }
    });

    let e = engine.clone();
    responder.register_async_handler(channels::STORE_REMOVE_ONE, move |args| {
        let e = e.clone();
        async move {
            let name = str_arg(&args, 0, "collection")?;
            e.remove_one(&name, &filter_arg(&args, 1))?;
            Ok(Value::Null)
        }
    });

    let e = engine;
    responder.register_async_handler(channels::STORE_REMOVE, move |args| {
        let e = e.clone();
        async move {
            let name = str_arg(&args, 0, "collection")?;
            e.remove(&name, &filter_arg(&args, 1))?;
            Ok(Value::Null)
        }
    });
}

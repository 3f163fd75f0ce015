//! Datastore client: typed per-collection CRUD over the transport.
//!
//! Every method is a pure pass-through to an async transport call with
//! the collection name as first argument; the only synchronous call is
//! the registration issued at construction time, which must happen
//! before the collection's first query. A [`Collection`] holds no state
//! beyond its name and transport handle and may be shared freely.
//!
//! Filters and update documents are opaque payloads here; their
//! semantics belong to the responder's storage engine.

use crate::error::{CoreError, Result};
use crate::ipc::channels;
use crate::ipc::Transport;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// One declared index on a collection field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(field: impl Into<String>, unique: bool) -> Self {
        Self {
            field: field.into(),
            unique,
        }
    }
}

/// Descriptor registered once per collection name before first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, indexes: Vec<IndexSpec>) -> Self {
        Self {
            name: name.into(),
            indexes,
        }
    }
}

/// Client handle for one named collection.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    transport: Arc<Transport>,
}

impl Collection {
    /// Register the collection with the responder and return a handle.
    ///
    /// Registration is synchronous: it blocks the calling thread until
    /// the responder has acknowledged, so it must not run on an async
    /// worker (call it from startup code or `spawn_blocking`).
    /// Re-registering the same name is idempotent; re-registering with
    /// conflicting indexes is responder-defined.
    pub fn open(transport: Arc<Transport>, spec: CollectionSpec) -> Result<Self> {
        transport.send_sync(
            channels::STORE_REGISTER,
            vec![json!(spec.name), serde_json::to_value(&spec.indexes)?],
        )?;
        Ok(Self {
            name: spec.name,
            transport,
        })
    }

    /// The registered collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of records in the collection.
    pub async fn count(&self) -> Result<u64> {
        let value = self
            .transport
            .send_async(channels::STORE_COUNT, vec![json!(self.name)])
            .await?;
        value.as_u64().ok_or_else(|| {
            CoreError::Other(format!(
                "count reply for {:?} is not an unsigned integer: {value}",
                self.name
            ))
        })
    }

    /// All records matching `filter`, shaped by `options`
    /// (sort/skip/limit, opaque to this layer).
    pub async fn find(&self, filter: Value, options: Value) -> Result<Vec<Value>> {
        let value = self
            .transport
            .send_async(
                channels::STORE_FIND,
                vec![json!(self.name), filter, options],
            )
            .await?;
        match value {
            Value::Array(records) => Ok(records),
            other => Err(CoreError::Other(format!(
                "find reply for {:?} is not an array: {other}",
                self.name
            ))),
        }
    }

    /// First record matching `filter`, or `None`.
    pub async fn find_one(&self, filter: Value) -> Result<Option<Value>> {
        let value = self
            .transport
            .send_async(channels::STORE_FIND_ONE, vec![json!(self.name), filter])
            .await?;
        Ok(match value {
            Value::Null => None,
            record => Some(record),
        })
    }

    /// Insert a record, returning it with its assigned id.
    ///
    /// Fails with a `UniqueViolationError` remote error when a unique
    /// index is violated.
    pub async fn insert_one(&self, input: Value) -> Result<Value> {
        self.transport
            .send_async(channels::STORE_INSERT_ONE, vec![json!(self.name), input])
            .await
    }

    /// Update the record with the given id, returning the updated record.
    ///
    /// A plain patch is wrapped as `{ "$set": patch }`; a patch whose
    /// keys are update operators (`$set`, `$push`, `$pull`, ...) is sent
    /// through unchanged. Fails with a `NotFoundError` remote error when
    /// no record has that id.
    pub async fn update_one(&self, id: &str, patch: Value) -> Result<Value> {
        let update = as_update_document(patch);
        self.transport
            .send_async(
                channels::STORE_UPDATE_ONE,
                vec![json!(self.name), json!(id), update],
            )
            .await
    }

    /// Update the first record matching `filter`, inserting the patch as
    /// a new record when nothing matches.
    pub async fn upsert_one(&self, filter: Value, patch: Value) -> Result<Value> {
        let update = as_update_document(patch);
        self.transport
            .send_async(
                channels::STORE_UPSERT_ONE,
                vec![json!(self.name), filter, update],
            )
            .await
    }

    /// Remove the first record matching `filter`. Removing zero records
    /// is not an error.
    pub async fn remove_one(&self, filter: Value) -> Result<()> {
        self.transport
            .send_async(channels::STORE_REMOVE_ONE, vec![json!(self.name), filter])
            .await?;
        Ok(())
    }

    /// Remove every record matching `filter`. Removing zero records is
    /// not an error.
    pub async fn remove(&self, filter: Value) -> Result<()> {
        self.transport
            .send_async(channels::STORE_REMOVE, vec![json!(self.name), filter])
            .await?;
        Ok(())
    }
}

/// Wrap a plain patch as a `$set`, passing raw operator documents through.
fn as_update_document(patch: Value) -> Value {
    let is_operator_doc = patch
        .as_object()
        .is_some_and(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')));
    if is_operator_doc {
        patch
    } else {
        json!({ "$set": patch })
    }
}

//! In-memory collection engine backing the datastore channels.
//!
//! Owns the persisted-state vocabulary the initiator's datastore client
//! speaks: named collections with declared indexes, filter matching
//! (literal equality and `$in`), and update operators (`$set`, `$push`
//! with `$each`, `$pull` with a nested filter). Records are JSON objects
//! keyed by a string `_id`, generated on insert when absent.
//!
//! The engine is shared across connection tasks behind one mutex; every
//! operation locks, works on plain maps, and returns before any await
//! point, so callers never observe partial mutations.

use cadenza_core::store::IndexSpec;
use cadenza_core::RemoteError;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Failures raised by engine operations.
///
/// Each variant maps to a stable remote-error name so it survives the
/// process boundary with its data fields intact.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("collection not registered: {name}")]
    UnknownCollection { name: String },

    #[error("no record with id {id:?} in {collection}")]
    NotFound { collection: String, id: String },

    #[error("unique index {field:?} violated in {collection}")]
    UniqueViolation { collection: String, field: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl From<EngineError> for RemoteError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::UnknownCollection { name } => {
                RemoteError::new("UnknownCollectionError", message)
                    .with_field("collection", json!(name))
            }
            EngineError::NotFound { collection, id } => RemoteError::new("NotFoundError", message)
                .with_field("collection", json!(collection))
                .with_field("id", json!(id)),
            EngineError::UniqueViolation { collection, field } => {
                RemoteError::new("UniqueViolationError", message)
                    .with_field("collection", json!(collection))
                    .with_field("field", json!(field))
            }
            EngineError::InvalidArgument { .. } => {
                RemoteError::new("InvalidArgumentError", message)
            }
        }
    }
}

type Result<T> = std::result::Result<T, EngineError>;
type Record = Map<String, Value>;

struct StoredCollection {
    indexes: Vec<IndexSpec>,
    records: Vec<Record>,
}

/// The responder-owned storage engine.
#[derive(Default)]
pub struct Engine {
    collections: Mutex<HashMap<String, StoredCollection>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a collection and its indexes.
    ///
    /// Idempotent per name. A second registration with different index
    /// definitions keeps the first definition and logs a warning.
    pub fn register(&self, name: &str, indexes: Vec<IndexSpec>) {
        let mut collections = self.lock();
        match collections.get(name) {
            Some(existing) => {
                let same = existing.indexes.len() == indexes.len()
                    && existing
                        .indexes
                        .iter()
                        .zip(&indexes)
                        .all(|(a, b)| a.field == b.field && a.unique == b.unique);
                if !same {
                    warn!(
                        collection = name,
                        "re-registration with conflicting indexes ignored"
                    );
                }
            }
            None => {
                debug!(collection = name, indexes = indexes.len(), "registered");
                collections.insert(
                    name.to_string(),
                    StoredCollection {
                        indexes,
                        records: Vec::new(),
                    },
                );
            }
        }
    }

    pub fn count(&self, name: &str) -> Result<u64> {
        let collections = self.lock();
        let collection = get(&collections, name)?;
        Ok(collection.records.len() as u64)
    }

    pub fn find(&self, name: &str, filter: &Value, options: &Value) -> Result<Vec<Value>> {
        let collections = self.lock();
        let collection = get(&collections, name)?;

        let mut matched: Vec<&Record> = collection
            .records
            .iter()
            .filter(|record| matches_filter(record, filter))
            .collect();

        if let Some(sort) = options.get("sort").and_then(Value::as_object) {
            if let Some((field, direction)) = sort.iter().next() {
                let descending = direction.as_i64() == Some(-1);
                matched.sort_by(|a, b| {
                    let ordering = compare_values(
                        a.get(field).unwrap_or(&Value::Null),
                        b.get(field).unwrap_or(&Value::Null),
                    );
                    if descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                });
            }
        }

        let skip = options.get("skip").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = options
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(usize::MAX);

        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|record| Value::Object(record.clone()))
            .collect())
    }

    /// First matching record, or `Null`.
    pub fn find_one(&self, name: &str, filter: &Value) -> Result<Value> {
        let collections = self.lock();
        let collection = get(&collections, name)?;
        Ok(collection
            .records
            .iter()
            .find(|record| matches_filter(record, filter))
            .map(|record| Value::Object(record.clone()))
            .unwrap_or(Value::Null))
    }

    /// Insert a record, assigning a fresh `_id` when absent.
    pub fn insert_one(&self, name: &str, input: Value) -> Result<Value> {
        let mut record = match input {
            Value::Object(map) => map,
            other => {
                return Err(EngineError::InvalidArgument {
                    message: format!("record must be an object, got {other}"),
                })
            }
        };

        if !record.contains_key("_id") {
            record.insert("_id".to_string(), json!(Uuid::new_v4().to_string()));
        }

        let mut collections = self.lock();
        let collection = get_mut(&mut collections, name)?;
        check_unique(name, collection, &record, None)?;
        collection.records.push(record.clone());

        Ok(Value::Object(record))
    }

    /// Apply an update document to the record with the given id.
    pub fn update_one(&self, name: &str, id: &str, update: &Value) -> Result<Value> {
        let mut collections = self.lock();
        let collection = get_mut(&mut collections, name)?;

        let position = collection
            .records
            .iter()
            .position(|record| record.get("_id").and_then(Value::as_str) == Some(id))
            .ok_or_else(|| EngineError::NotFound {
                collection: name.to_string(),
                id: id.to_string(),
            })?;

        let mut updated = collection.records[position].clone();
        apply_update(&mut updated, update)?;
        check_unique(name, collection, &updated, Some(position))?;

        collection.records[position] = updated.clone();
        Ok(Value::Object(updated))
    }

    /// Update the first record matching `filter`, or insert a new record
    /// built from the filter's literal fields plus the update document.
    pub fn upsert_one(&self, name: &str, filter: &Value, update: &Value) -> Result<Value> {
        let existing_id = {
            let collections = self.lock();
            let collection = get(&collections, name)?;
            collection
                .records
                .iter()
                .find(|record| matches_filter(record, filter))
                .and_then(|record| record.get("_id").and_then(Value::as_str))
                .map(str::to_string)
        };

        match existing_id {
            Some(id) => self.update_one(name, &id, update),
            None => {
                let mut seed = Map::new();
                if let Some(conds) = filter.as_object() {
                    for (field, cond) in conds {
                        if !is_operator_condition(cond) {
                            seed.insert(field.clone(), cond.clone());
                        }
                    }
                }
                apply_update(&mut seed, update)?;
                self.insert_one(name, Value::Object(seed))
            }
        }
    }

    /// Remove the first matching record. Returns the number removed.
    pub fn remove_one(&self, name: &str, filter: &Value) -> Result<u64> {
        let mut collections = self.lock();
        let collection = get_mut(&mut collections, name)?;

        match collection
            .records
            .iter()
            .position(|record| matches_filter(record, filter))
        {
            Some(position) => {
                collection.records.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// Remove every matching record. Returns the number removed.
    pub fn remove(&self, name: &str, filter: &Value) -> Result<u64> {
        let mut collections = self.lock();
        let collection = get_mut(&mut collections, name)?;

        let before = collection.records.len();
        collection
            .records
            .retain(|record| !matches_filter(record, filter));
        Ok((before - collection.records.len()) as u64)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredCollection>> {
        // A handler panicking mid-operation is a wiring defect; poisoned
        // state is unrecoverable either way.
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn get<'a>(
    collections: &'a HashMap<String, StoredCollection>,
    name: &str,
) -> Result<&'a StoredCollection> {
    collections
        .get(name)
        .ok_or_else(|| EngineError::UnknownCollection {
            name: name.to_string(),
        })
}

fn get_mut<'a>(
    collections: &'a mut HashMap<String, StoredCollection>,
    name: &str,
) -> Result<&'a mut StoredCollection> {
    collections
        .get_mut(name)
        .ok_or_else(|| EngineError::UnknownCollection {
            name: name.to_string(),
        })
}

/// Unique-index enforcement over a full scan, `_id` included implicitly.
/// `Null`/absent values are exempt, mirroring the usual sparse-index rule.
fn check_unique(
    name: &str,
    collection: &StoredCollection,
    candidate: &Record,
    skip_position: Option<usize>,
) -> Result<()> {
    let unique_fields = std::iter::once("_id").chain(
        collection
            .indexes
            .iter()
            .filter(|index| index.unique)
            .map(|index| index.field.as_str()),
    );

    for field in unique_fields {
        let Some(value) = candidate.get(field) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        let conflict = collection
            .records
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != skip_position)
            .any(|(_, record)| record.get(field) == Some(value));

        if conflict {
            return Err(EngineError::UniqueViolation {
                collection: name.to_string(),
                field: field.to_string(),
            });
        }
    }

    Ok(())
}

/// Does a record satisfy a filter document?
///
/// A non-object or empty filter matches everything. Each entry is either
/// a literal to compare for equality or a `{ "$in": [...] }` membership
/// test.
fn matches_filter(record: &Record, filter: &Value) -> bool {
    let Some(conds) = filter.as_object() else {
        return true;
    };
    conds.iter().all(|(field, cond)| {
        let actual = record.get(field).unwrap_or(&Value::Null);
        value_matches(actual, cond)
    })
}

fn value_matches(actual: &Value, cond: &Value) -> bool {
    if let Some(set) = cond.get("$in").and_then(Value::as_array) {
        return set.contains(actual);
    }
    // A nested object condition matches object values field-wise, which
    // is what `$pull` relies on to match array elements.
    if let (Some(conds), Some(actual_map)) = (cond.as_object(), actual.as_object()) {
        if !conds.is_empty() && conds.keys().all(|k| !k.starts_with('$')) {
            return conds.iter().all(|(field, nested)| {
                value_matches(actual_map.get(field).unwrap_or(&Value::Null), nested)
            });
        }
    }
    actual == cond
}

/// Total order over the JSON scalars that appear in sortable fields.
/// Mixed types order as null < bool < number < string; arrays and
/// objects compare equal to everything (stable sort keeps their order).
fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn is_operator_condition(cond: &Value) -> bool {
    cond.as_object()
        .is_some_and(|map| map.keys().any(|k| k.starts_with('$')))
}

/// Apply an operator document (`$set` / `$push` / `$pull`) to a record.
fn apply_update(record: &mut Record, update: &Value) -> Result<()> {
    let Some(operators) = update.as_object() else {
        return Err(EngineError::InvalidArgument {
            message: "update must be an object of operators".to_string(),
        });
    };

    for (operator, operand) in operators {
        let Some(fields) = operand.as_object() else {
            return Err(EngineError::InvalidArgument {
                message: format!("operand of {operator} must be an object"),
            });
        };

        match operator.as_str() {
            "$set" => {
                for (field, value) in fields {
                    record.insert(field.clone(), value.clone());
                }
            }
            "$push" => {
                for (field, pushed) in fields {
                    push_values(record, field, pushed)?;
                }
            }
            "$pull" => {
                for (field, cond) in fields {
                    pull_values(record, field, cond)?;
                }
            }
            other => {
                return Err(EngineError::InvalidArgument {
                    message: format!("unsupported update operator {other:?}"),
                });
            }
        }
    }

    Ok(())
}

/// Append to an array field, honoring `$each` and preserving order.
fn push_values(record: &mut Record, field: &str, pushed: &Value) -> Result<()> {
    let target = record
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));

    let Some(array) = target.as_array_mut() else {
        return Err(EngineError::InvalidArgument {
            message: format!("$push target {field:?} is not an array"),
        });
    };

    match pushed.get("$each").and_then(Value::as_array) {
        Some(each) => array.extend(each.iter().cloned()),
        None => array.push(pushed.clone()),
    }
    Ok(())
}

/// Remove array elements matching a nested filter.
fn pull_values(record: &mut Record, field: &str, cond: &Value) -> Result<()> {
    let Some(target) = record.get_mut(field) else {
        return Ok(());
    };
    let Some(array) = target.as_array_mut() else {
        return Err(EngineError::InvalidArgument {
            message: format!("$pull target {field:?} is not an array"),
        });
    };

    array.retain(|element| !value_matches(element, cond));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks_engine() -> Engine {
        let engine = Engine::new();
        engine.register("tracks", vec![IndexSpec::new("path", true)]);
        engine
    }

    #[test]
    fn test_count_empty() {
        let engine = tracks_engine();
        assert_eq!(engine.count("tracks").unwrap(), 0);
    }

    #[test]
    fn test_unknown_collection() {
        let engine = Engine::new();
        let err = engine.count("nope").unwrap_err();
        assert!(matches!(err, EngineError::UnknownCollection { .. }));
    }

    #[test]
    fn test_register_is_idempotent() {
        let engine = tracks_engine();
        engine
            .insert_one("tracks", json!({ "path": "/a.flac" }))
            .unwrap();
        engine.register("tracks", vec![IndexSpec::new("path", true)]);
        assert_eq!(engine.count("tracks").unwrap(), 1);
    }

    #[test]
    fn test_insert_assigns_id() {
        let engine = tracks_engine();
        let record = engine
            .insert_one("tracks", json!({ "path": "/a.flac" }))
            .unwrap();
        assert!(record.get("_id").and_then(Value::as_str).is_some());
        assert_eq!(engine.count("tracks").unwrap(), 1);
    }

    #[test]
    fn test_insert_keeps_provided_id() {
        let engine = tracks_engine();
        let record = engine
            .insert_one("tracks", json!({ "_id": "t1", "path": "/a.flac" }))
            .unwrap();
        assert_eq!(record.get("_id"), Some(&json!("t1")));
    }

    #[test]
    fn test_unique_index_violation() {
        let engine = tracks_engine();
        engine
            .insert_one("tracks", json!({ "path": "/a.flac" }))
            .unwrap();
        let err = engine
            .insert_one("tracks", json!({ "path": "/a.flac" }))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::UniqueViolation { ref field, .. } if field == "path"
        ));
    }

    #[test]
    fn test_non_unique_index_allows_duplicates() {
        let engine = Engine::new();
        engine.register("tracks", vec![IndexSpec::new("artist", false)]);
        engine
            .insert_one("tracks", json!({ "artist": "Holst" }))
            .unwrap();
        engine
            .insert_one("tracks", json!({ "artist": "Holst" }))
            .unwrap();
        assert_eq!(engine.count("tracks").unwrap(), 2);
    }

    #[test]
    fn test_find_with_literal_filter() {
        let engine = tracks_engine();
        engine
            .insert_one("tracks", json!({ "path": "/a.flac", "artist": "Holst" }))
            .unwrap();
        engine
            .insert_one("tracks", json!({ "path": "/b.flac", "artist": "Bizet" }))
            .unwrap();

        let found = engine
            .find("tracks", &json!({ "artist": "Holst" }), &json!({}))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("path"), Some(&json!("/a.flac")));
    }

    #[test]
    fn test_find_with_in_filter() {
        let engine = tracks_engine();
        for path in ["/a.flac", "/b.flac", "/c.flac"] {
            engine.insert_one("tracks", json!({ "path": path })).unwrap();
        }

        let found = engine
            .find(
                "tracks",
                &json!({ "path": { "$in": ["/a.flac", "/c.flac"] } }),
                &json!({}),
            )
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_find_sort_and_limit() {
        let engine = tracks_engine();
        for (path, plays) in [("/a.flac", 3), ("/b.flac", 1), ("/c.flac", 2)] {
            engine
                .insert_one("tracks", json!({ "path": path, "plays": plays }))
                .unwrap();
        }

        let found = engine
            .find(
                "tracks",
                &json!({}),
                &json!({ "sort": { "plays": -1 }, "limit": 2 }),
            )
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].get("plays"), Some(&json!(3)));
        assert_eq!(found[1].get("plays"), Some(&json!(2)));
    }

    #[test]
    fn test_find_one_absent_is_null() {
        let engine = tracks_engine();
        let found = engine
            .find_one("tracks", &json!({ "path": "/zzz.flac" }))
            .unwrap();
        assert!(found.is_null());
    }

    #[test]
    fn test_update_one_set() {
        let engine = tracks_engine();
        let record = engine
            .insert_one("tracks", json!({ "_id": "t1", "path": "/a.flac" }))
            .unwrap();
        assert_eq!(record.get("title"), None);

        let updated = engine
            .update_one("tracks", "t1", &json!({ "$set": { "title": "Jupiter" } }))
            .unwrap();
        assert_eq!(updated.get("title"), Some(&json!("Jupiter")));
        assert_eq!(updated.get("path"), Some(&json!("/a.flac")));
    }

    #[test]
    fn test_update_one_missing_is_not_found() {
        let engine = tracks_engine();
        let err = engine
            .update_one("tracks", "ghost", &json!({ "$set": { "title": "x" } }))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { ref id, .. } if id == "ghost"));
    }

    #[test]
    fn test_push_each_appends_in_order() {
        let engine = Engine::new();
        engine.register("playlists", vec![]);
        engine
            .insert_one("playlists", json!({ "_id": "p1", "tracks": ["t0"] }))
            .unwrap();

        let updated = engine
            .update_one(
                "playlists",
                "p1",
                &json!({ "$push": { "tracks": { "$each": ["t1", "t2"] } } }),
            )
            .unwrap();
        assert_eq!(updated.get("tracks"), Some(&json!(["t0", "t1", "t2"])));
    }

    #[test]
    fn test_push_creates_missing_array() {
        let engine = Engine::new();
        engine.register("playlists", vec![]);
        engine
            .insert_one("playlists", json!({ "_id": "p1" }))
            .unwrap();

        let updated = engine
            .update_one("playlists", "p1", &json!({ "$push": { "tracks": "t1" } }))
            .unwrap();
        assert_eq!(updated.get("tracks"), Some(&json!(["t1"])));
    }

    #[test]
    fn test_pull_with_in_removes_matching_elements() {
        let engine = Engine::new();
        engine.register("playlists", vec![]);
        engine
            .insert_one(
                "playlists",
                json!({
                    "_id": "p1",
                    "tracks": [
                        { "track_id": "t1", "pos": 0 },
                        { "track_id": "t2", "pos": 1 },
                        { "track_id": "t1", "pos": 2 },
                    ]
                }),
            )
            .unwrap();

        let updated = engine
            .update_one(
                "playlists",
                "p1",
                &json!({ "$pull": { "tracks": { "track_id": { "$in": ["t1"] } } } }),
            )
            .unwrap();
        assert_eq!(
            updated.get("tracks"),
            Some(&json!([{ "track_id": "t2", "pos": 1 }]))
        );
    }

    #[test]
    fn test_unsupported_operator_is_invalid() {
        let engine = tracks_engine();
        engine
            .insert_one("tracks", json!({ "_id": "t1", "path": "/a.flac" }))
            .unwrap();
        let err = engine
            .update_one("tracks", "t1", &json!({ "$rename": { "path": "file" } }))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
    }

    #[test]
    fn test_upsert_updates_existing() {
        let engine = tracks_engine();
        engine
            .insert_one("tracks", json!({ "_id": "t1", "path": "/a.flac" }))
            .unwrap();

        let updated = engine
            .upsert_one(
                "tracks",
                &json!({ "path": "/a.flac" }),
                &json!({ "$set": { "plays": 1 } }),
            )
            .unwrap();
        assert_eq!(updated.get("_id"), Some(&json!("t1")));
        assert_eq!(updated.get("plays"), Some(&json!(1)));
        assert_eq!(engine.count("tracks").unwrap(), 1);
    }

    #[test]
    fn test_upsert_inserts_missing() {
        let engine = tracks_engine();
        let inserted = engine
            .upsert_one(
                "tracks",
                &json!({ "path": "/new.flac" }),
                &json!({ "$set": { "plays": 0 } }),
            )
            .unwrap();
        assert_eq!(inserted.get("path"), Some(&json!("/new.flac")));
        assert_eq!(inserted.get("plays"), Some(&json!(0)));
        assert_eq!(engine.count("tracks").unwrap(), 1);
    }

    #[test]
    fn test_remove_one_zero_matches_is_ok() {
        let engine = tracks_engine();
        assert_eq!(
            engine
                .remove_one("tracks", &json!({ "path": "/zzz.flac" }))
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_remove_all_matching() {
        let engine = Engine::new();
        engine.register("tracks", vec![]);
        for artist in ["Holst", "Holst", "Bizet"] {
            engine
                .insert_one("tracks", json!({ "artist": artist }))
                .unwrap();
        }

        assert_eq!(
            engine.remove("tracks", &json!({ "artist": "Holst" })).unwrap(),
            2
        );
        assert_eq!(engine.count("tracks").unwrap(), 1);
    }
}

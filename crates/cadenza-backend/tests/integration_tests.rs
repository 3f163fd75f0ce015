//! End-to-end tests for the datastore path: initiator-side client and
//! transport against a live responder backed by the in-memory engine.

use cadenza_backend::{handlers, Engine};
use cadenza_core::ipc::ResponderHandle;
use cadenza_core::{Collection, CollectionSpec, CoreError, IndexSpec, Responder, Transport};
use serde_json::{json, Value};
use std::sync::Arc;

async fn start_backend() -> ResponderHandle {
    let engine = Arc::new(Engine::new());
    let mut responder = Responder::new();
    handlers::register(&mut responder, engine);
    responder.start().await.expect("responder failed to start")
}

/// Collection registration issues a blocking sync call, so it must run
/// off the async workers.
async fn open_collection(
    transport: Arc<Transport>,
    spec: CollectionSpec,
) -> cadenza_core::Result<Collection> {
    tokio::task::spawn_blocking(move || Collection::open(transport, spec))
        .await
        .expect("open task panicked")
}

fn tracks_spec() -> CollectionSpec {
    CollectionSpec::new("tracks", vec![IndexSpec::new("path", true)])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_insert_find_count_roundtrip() {
    let mut handle = start_backend().await;
    let transport = Arc::new(Transport::connect(handle.addr()).await.unwrap());
    let tracks = open_collection(transport, tracks_spec()).await.unwrap();

    assert_eq!(tracks.count().await.unwrap(), 0);

    let inserted = tracks
        .insert_one(json!({ "path": "/music/jupiter.flac", "artist": "Holst" }))
        .await
        .unwrap();
    let id = inserted.get("_id").and_then(Value::as_str).unwrap().to_string();

    assert_eq!(tracks.count().await.unwrap(), 1);

    let found = tracks
        .find_one(json!({ "artist": "Holst" }))
        .await
        .unwrap()
        .expect("record should be found");
    assert_eq!(found.get("_id"), Some(&json!(id)));

    let all = tracks.find(json!({}), json!({})).await.unwrap();
    assert_eq!(all.len(), 1);

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_find_one_absent_is_none() {
    let mut handle = start_backend().await;
    let transport = Arc::new(Transport::connect(handle.addr()).await.unwrap());
    let tracks = open_collection(transport, tracks_spec()).await.unwrap();

    let found = tracks.find_one(json!({ "path": "/nope.flac" })).await.unwrap();
    assert!(found.is_none());

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unique_violation_crosses_the_boundary() {
    let mut handle = start_backend().await;
    let transport = Arc::new(Transport::connect(handle.addr()).await.unwrap());
    let tracks = open_collection(transport, tracks_spec()).await.unwrap();

    tracks
        .insert_one(json!({ "path": "/music/mars.flac" }))
        .await
        .unwrap();
    let err = tracks
        .insert_one(json!({ "path": "/music/mars.flac" }))
        .await
        .unwrap_err();

    match err {
        CoreError::Remote(remote) => {
            assert_eq!(remote.name, "UniqueViolationError");
            assert_eq!(remote.fields.get("field"), Some(&json!("path")));
            assert_eq!(remote.fields.get("collection"), Some(&json!("tracks")));
        }
        other => panic!("expected remote error, got: {:?}", other),
    }

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_missing_record_is_not_found() {
    let mut handle = start_backend().await;
    let transport = Arc::new(Transport::connect(handle.addr()).await.unwrap());
    let tracks = open_collection(transport, tracks_spec()).await.unwrap();

    let err = tracks
        .update_one("ghost", json!({ "title": "x" }))
        .await
        .unwrap_err();
    assert_eq!(err.remote_name(), Some("NotFoundError"));

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_plain_patch_updates_fields() {
    let mut handle = start_backend().await;
    let transport = Arc::new(Transport::connect(handle.addr()).await.unwrap());
    let tracks = open_collection(transport, tracks_spec()).await.unwrap();

    let inserted = tracks
        .insert_one(json!({ "path": "/music/venus.flac" }))
        .await
        .unwrap();
    let id = inserted.get("_id").and_then(Value::as_str).unwrap();

    let updated = tracks
        .update_one(id, json!({ "title": "Venus", "plays": 3 }))
        .await
        .unwrap();
    assert_eq!(updated.get("title"), Some(&json!("Venus")));
    assert_eq!(updated.get("plays"), Some(&json!(3)));
    assert_eq!(updated.get("path"), Some(&json!("/music/venus.flac")));

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_playlist_push_and_pull_operators() {
    let mut handle = start_backend().await;
    let transport = Arc::new(Transport::connect(handle.addr()).await.unwrap());
    let playlists = open_collection(
        transport,
        CollectionSpec::new("playlists", vec![IndexSpec::new("name", true)]),
    )
    .await
    .unwrap();

    let inserted = playlists
        .insert_one(json!({ "name": "Favorites", "tracks": [] }))
        .await
        .unwrap();
    let id = inserted.get("_id").and_then(Value::as_str).unwrap();

    // Append two entries in order.
    let updated = playlists
        .update_one(
            id,
            json!({ "$push": { "tracks": { "$each": [
                { "track_id": "t1" },
                { "track_id": "t2" },
            ] } } }),
        )
        .await
        .unwrap();
    assert_eq!(
        updated.get("tracks"),
        Some(&json!([{ "track_id": "t1" }, { "track_id": "t2" }]))
    );

    // Pull exactly the entries whose track_id is in the given set.
    let updated = playlists
        .update_one(
            id,
            json!({ "$pull": { "tracks": { "track_id": { "$in": ["t1"] } } } }),
        )
        .await
        .unwrap();
    assert_eq!(updated.get("tracks"), Some(&json!([{ "track_id": "t2" }])));

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upsert_inserts_then_updates() {
    let mut handle = start_backend().await;
    let transport = Arc::new(Transport::connect(handle.addr()).await.unwrap());
    let settings = open_collection(
        transport,
        CollectionSpec::new("settings", vec![IndexSpec::new("key", true)]),
    )
    .await
    .unwrap();

    let first = settings
        .upsert_one(json!({ "key": "volume" }), json!({ "value": 0.5 }))
        .await
        .unwrap();
    assert_eq!(first.get("value"), Some(&json!(0.5)));

    let second = settings
        .upsert_one(json!({ "key": "volume" }), json!({ "value": 0.8 }))
        .await
        .unwrap();
    assert_eq!(second.get("value"), Some(&json!(0.8)));
    assert_eq!(second.get("_id"), first.get("_id"));
    assert_eq!(settings.count().await.unwrap(), 1);

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remove_and_remove_one() {
    let mut handle = start_backend().await;
    let transport = Arc::new(Transport::connect(handle.addr()).await.unwrap());
    let tracks = open_collection(transport, tracks_spec()).await.unwrap();

    for path in ["/a.flac", "/b.flac", "/c.flac"] {
        tracks
            .insert_one(json!({ "path": path, "artist": "Holst" }))
            .await
            .unwrap();
    }

    tracks.remove_one(json!({ "path": "/a.flac" })).await.unwrap();
    assert_eq!(tracks.count().await.unwrap(), 2);

    // Removing zero matching records is not an error.
    tracks.remove_one(json!({ "path": "/zzz.flac" })).await.unwrap();
    assert_eq!(tracks.count().await.unwrap(), 2);

    tracks.remove(json!({ "artist": "Holst" })).await.unwrap();
    assert_eq!(tracks.count().await.unwrap(), 0);

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registration_is_idempotent_across_clients() {
    let mut handle = start_backend().await;
    let transport = Arc::new(Transport::connect(handle.addr()).await.unwrap());

    let first = open_collection(transport.clone(), tracks_spec()).await.unwrap();
    first
        .insert_one(json!({ "path": "/music/saturn.flac" }))
        .await
        .unwrap();

    // A second handle to the same collection sees the same data.
    let second = open_collection(transport, tracks_spec()).await.unwrap();
    assert_eq!(second.count().await.unwrap(), 1);

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sorted_paginated_find() {
    let mut handle = start_backend().await;
    let transport = Arc::new(Transport::connect(handle.addr()).await.unwrap());
    let tracks = open_collection(transport, tracks_spec()).await.unwrap();

    for (path, plays) in [("/a.flac", 5), ("/b.flac", 9), ("/c.flac", 1)] {
        tracks
            .insert_one(json!({ "path": path, "plays": plays }))
            .await
            .unwrap();
    }

    let top = tracks
        .find(json!({}), json!({ "sort": { "plays": -1 }, "limit": 2 }))
        .await
        .unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].get("plays"), Some(&json!(9)));
    assert_eq!(top[1].get("plays"), Some(&json!(5)));

    handle.shutdown();
}

//! Engine-level download tests against the in-memory store.

use std::sync::Arc;

use bytes::Bytes;
use s3cp::config::EngineOptions;
use s3cp::s3::{MemoryStore, S3Api};
use s3cp::transfer::Engine;

const CONTENT: &[u8] = b"temporary file's content";

fn engine_with(store: &Arc<MemoryStore>, options: EngineOptions) -> Arc<Engine> {
    Engine::new(Arc::clone(store) as Arc<dyn S3Api>, options)
}

#[tokio::test]
async fn download_to_a_file_path() {
    let store = Arc::new(MemoryStore::new());
    store.insert_object("bucket", "tmpfile", Bytes::from_static(CONTENT));

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("tmpfile");
    let engine = engine_with(&store, EngineOptions::default());
    engine
        .run("s3://bucket/tmpfile", &dest.display().to_string())
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), CONTENT);
}

#[tokio::test]
async fn download_into_a_directory_uses_the_key_basename() {
    let store = Arc::new(MemoryStore::new());
    store.insert_object("bucket", "docs/report.pdf", Bytes::from_static(CONTENT));

    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with(&store, EngineOptions::default());
    engine
        .run(
            "s3://bucket/docs/report.pdf",
            &dir.path().display().to_string(),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(dir.path().join("report.pdf")).unwrap(), CONTENT);
}

#[tokio::test]
async fn download_ranges_reassemble_in_order() {
    let store = Arc::new(MemoryStore::new());
    let payload: Vec<u8> = (0u16..2000).map(|v| (v % 251) as u8).collect();
    store.insert_object("bucket", "big", Bytes::from(payload.clone()));

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("big");
    let options = EngineOptions {
        part_size: 64,
        ..EngineOptions::default()
    };
    let engine = engine_with(&store, options);
    engine
        .run("s3://bucket/big", &dest.display().to_string())
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), payload);
}

#[tokio::test]
async fn recursive_download_rebuilds_the_tree() {
    let store = Arc::new(MemoryStore::new());
    let keys = [
        "a.txt",
        "foo.zip",
        "foo/bar/.baz/a",
        "foo/bar/.baz/hooks/bar",
        "z.txt",
    ];
    for key in keys {
        store.insert_object("bucket", key, Bytes::from_static(CONTENT));
    }

    let dir = tempfile::tempdir().unwrap();
    let options = EngineOptions {
        recursive: true,
        ..EngineOptions::default()
    };
    let engine = engine_with(&store, options);
    engine
        .run("s3://bucket/", &dir.path().display().to_string())
        .await
        .unwrap();

    for key in keys {
        let path = s3cp::uri::key_to_path(dir.path(), key);
        assert_eq!(std::fs::read(&path).unwrap(), CONTENT, "file for {key}");
    }
}

#[tokio::test]
async fn recursive_download_of_a_prefix_strips_it() {
    let store = Arc::new(MemoryStore::new());
    store.insert_object("bucket", "foo/bar/a", Bytes::from_static(CONTENT));
    store.insert_object("bucket", "foo.zip", Bytes::from_static(CONTENT));

    let dir = tempfile::tempdir().unwrap();
    let options = EngineOptions {
        recursive: true,
        ..EngineOptions::default()
    };
    let engine = engine_with(&store, options);
    engine
        .run("s3://bucket/foo", &dir.path().display().to_string())
        .await
        .unwrap();

    // `foo/bar/a` lands at bar/a; `foo.zip` is outside the prefix
    assert_eq!(std::fs::read(dir.path().join("bar/a")).unwrap(), CONTENT);
    assert!(!dir.path().join("foo.zip").exists());
}

#[tokio::test]
async fn download_of_a_missing_object_fails() {
    let store = Arc::new(MemoryStore::new());
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out");
    let engine = engine_with(&store, EngineOptions::default());
    let result = engine
        .run("s3://bucket/missing", &dest.display().to_string())
        .await;
    assert!(result.is_err());
    assert!(!dest.exists());
}

use serde_json::json;
use tempfile::TempDir;

use kbase_core::types::{CollectionKind, Meta, VectorRecord, DEFAULT_COLLECTIONS};
use kbase_vector::{CollectionRegistry, IndexStorage};

fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
    VectorRecord { id: id.to_string(), vector, text: id.to_string(), metadata: Meta::new() }
}

async fn open_registry(dir: &TempDir) -> CollectionRegistry {
    let registry = CollectionRegistry::new(2, IndexStorage::Snapshots(dir.path().join("vectors")));
    registry.open().await.expect("open registry");
    registry
}

#[tokio::test]
async fn defaults_exist_after_open() {
    let registry = CollectionRegistry::new(2, IndexStorage::Ephemeral);
    registry.open().await.unwrap();
    let names: Vec<String> = registry.list().await.unwrap().into_iter().map(|c| c.name).collect();
    for name in DEFAULT_COLLECTIONS {
        assert!(names.iter().any(|n| n == name), "missing default {name}");
    }
    let personal = registry.get("personal").await.unwrap();
    assert_eq!(personal.metadata()["description"], json!("Default personal collection"));
}

#[tokio::test]
async fn create_rejects_duplicates_defaults_and_bad_names() {
    let registry = CollectionRegistry::new(2, IndexStorage::Ephemeral);
    registry.open().await.unwrap();

    registry.create_collection("recipes", Meta::new()).await.unwrap();
    assert!(registry.create_collection("recipes", Meta::new()).await.unwrap_err().is_validation());
    assert!(registry.create_collection("work", Meta::new()).await.unwrap_err().is_validation());
    assert!(registry.create_collection("bad name", Meta::new()).await.unwrap_err().is_validation());
    assert!(registry.create_collection("session_x", Meta::new()).await.unwrap_err().is_validation());

    let same = registry.get_or_create("recipes", Meta::new()).await.unwrap();
    assert_eq!(same.name(), "recipes");
}

#[tokio::test]
async fn unknown_collection_is_not_found_but_empty_is_ok() {
    let registry = CollectionRegistry::new(2, IndexStorage::Ephemeral);
    registry.open().await.unwrap();
    assert!(registry.query("personal", &[1.0, 0.0], 5, None).await.unwrap().is_empty());
    assert!(registry.query("does_not_exist", &[1.0, 0.0], 5, None).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn permanent_collections_survive_reopen_sessions_do_not() {
    let tmp = TempDir::new().unwrap();
    {
        let registry = open_registry(&tmp).await;
        let recipes = registry.create_collection("recipes", Meta::new()).await.unwrap();
        recipes.index().insert(vec![record("r1", vec![1.0, 0.0])]).await.unwrap();
        let session = registry.get_or_create_session("s1").await.unwrap();
        assert_eq!(session.kind(), CollectionKind::Session);
        session.index().insert(vec![record("s", vec![0.0, 1.0])]).await.unwrap();
    }
    assert!(!tmp.path().join("vectors/session_s1.json").exists());

    let registry = open_registry(&tmp).await;
    let recipes = registry.get("recipes").await.unwrap();
    assert_eq!(recipes.kind(), CollectionKind::Permanent);
    assert_eq!(recipes.info().await.unwrap().count, 1);
    assert!(!registry.contains("session_s1").await);
}

#[tokio::test]
async fn delete_removes_persisted_state_and_protects_defaults() {
    let tmp = TempDir::new().unwrap();
    let registry = open_registry(&tmp).await;
    registry.create_collection("scratch", Meta::new()).await.unwrap();
    let file = tmp.path().join("vectors/scratch.json");
    assert!(file.exists());

    registry.delete("scratch").await.unwrap();
    assert!(!file.exists());
    assert!(registry.get("scratch").await.unwrap_err().is_not_found());
    assert!(registry.delete("scratch").await.unwrap_err().is_not_found());
    assert!(registry.delete("personal").await.unwrap_err().is_validation());
}

#[tokio::test]
async fn drop_sessions_keeps_permanent_collections() {
    let registry = CollectionRegistry::new(2, IndexStorage::Ephemeral);
    registry.open().await.unwrap();
    registry.get_or_create_session("a").await.unwrap();
    registry.get_or_create_session("b").await.unwrap();
    assert_eq!(registry.drop_sessions().await, 2);
    assert_eq!(registry.list().await.unwrap().len(), DEFAULT_COLLECTIONS.len());
}

#[tokio::test]
async fn session_ids_are_opaque_but_permanent_names_are_checked() {
    let tmp = TempDir::new().unwrap();
    let registry = open_registry(&tmp).await;
    for id in ["tab:42", "user@example.com", "a.b/c"] {
        let session = registry.get_or_create_session(id).await.unwrap();
        assert_eq!(session.kind(), CollectionKind::Session);
        session.index().insert(vec![record("x", vec![1.0, 0.0])]).await.unwrap();
        assert_eq!(registry.query(&format!("session_{id}"), &[1.0, 0.0], 5, None).await.unwrap().len(), 1);
    }
    assert!(registry.get_or_create("bad:name", Meta::new()).await.unwrap_err().is_validation());
    assert_eq!(registry.drop_sessions().await, 3);
}

use serde_json::json;
use tempfile::TempDir;

use kbase_core::filter::MetadataFilter;
use kbase_core::traits::VectorIndex;
use kbase_core::types::{Meta, VectorRecord};
use kbase_vector::{CollectionHeader, MemoryIndex};

fn record(id: &str, vector: Vec<f32>, source: &str) -> VectorRecord {
    let mut metadata = Meta::new();
    metadata.insert("source".into(), json!(source));
    VectorRecord { id: id.to_string(), vector, text: format!("text of {id}"), metadata }
}

fn index(dim: usize) -> MemoryIndex { MemoryIndex::new("test", CollectionHeader::new(dim, Meta::new())) }

#[tokio::test]
async fn wrong_dimension_rejects_whole_batch() {
    let idx = index(3);
    idx.insert(vec![record("a", vec![1.0, 0.0, 0.0], "manual")]).await.unwrap();
    let err = idx
        .insert(vec![record("b", vec![0.0, 1.0, 0.0], "manual"), record("c", vec![1.0, 0.0], "manual")])
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(idx.stats().await.unwrap().count, 1, "count unchanged");
    assert!(idx.query(&[1.0, 0.0], 5, None).await.unwrap_err().is_validation());
}

#[tokio::test]
async fn insert_overwrites_existing_id_in_place() {
    let idx = index(2);
    idx.insert(vec![record("a", vec![1.0, 0.0], "manual"), record("b", vec![0.0, 1.0], "manual")]).await.unwrap();
    idx.insert(vec![record("a", vec![0.0, 1.0], "webpage")]).await.unwrap();
    assert_eq!(idx.stats().await.unwrap().count, 2);
    assert_eq!(idx.ids().await.unwrap(), vec!["a", "b"]);
    let got = idx.get(&["a".to_string()]).await.unwrap();
    assert_eq!(got[0].metadata["source"], json!("webpage"));
}

#[tokio::test]
async fn delete_ignores_missing_ids_and_is_repeatable() {
    let idx = index(2);
    idx.insert(vec![record("a", vec![1.0, 0.0], "manual"), record("b", vec![0.0, 1.0], "manual")]).await.unwrap();
    let ids = vec!["a".to_string(), "zzz".to_string()];
    assert_eq!(idx.delete(&ids).await.unwrap(), 1);
    assert_eq!(idx.delete(&ids).await.unwrap(), 0);
    assert_eq!(idx.ids().await.unwrap(), vec!["b"]);
}

#[tokio::test]
async fn query_ranks_by_cosine_with_stable_ties() {
    let idx = index(2);
    idx.insert(vec![
        record("first", vec![1.0, 1.0], "manual"),
        record("best", vec![1.0, 0.0], "manual"),
        record("second", vec![1.0, 1.0], "manual"),
        record("worst", vec![-1.0, 0.0], "manual"),
    ])
    .await
    .unwrap();
    let hits = idx.query(&[1.0, 0.0], 3, None).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["best", "first", "second"]);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(idx.query(&[1.0, 0.0], 0, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn filter_applies_before_ranking() {
    let idx = index(2);
    idx.insert(vec![
        record("close", vec![1.0, 0.0], "manual"),
        record("far", vec![0.0, 1.0], "bookmark"),
        record("mid", vec![1.0, 1.0], "webpage"),
    ])
    .await
    .unwrap();
    let filter = MetadataFilter::new().any_of("source", ["bookmark", "webpage"]);
    let hits = idx.query(&[1.0, 0.0], 1, Some(&filter)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "mid");

    let none = MetadataFilter::new().equals("source", "upload");
    assert!(idx.query(&[1.0, 0.0], 5, Some(&none)).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_index_returns_no_hits() {
    assert!(index(4).query(&[0.0, 0.0, 0.0, 1.0], 10, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_round_trips_through_disk() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("vectors/notes.json");
    let mut meta = Meta::new();
    meta.insert("description".into(), json!("notes"));
    {
        let idx = MemoryIndex::create_persistent("notes", CollectionHeader::new(2, meta), path.clone()).await.unwrap();
        assert!(path.exists(), "empty collections are persisted too");
        idx.insert(vec![record("a", vec![1.0, 0.0], "manual"), record("b", vec![0.0, 1.0], "manual")]).await.unwrap();
        idx.delete(&["b".to_string()]).await.unwrap();
    }
    let reloaded = MemoryIndex::load(&path).await.unwrap();
    assert_eq!(reloaded.name(), "notes");
    assert_eq!(reloaded.ids().await.unwrap(), vec!["a"]);
    assert_eq!(reloaded.stats().await.unwrap().metadata["description"], json!("notes"));

    reloaded.destroy().await.unwrap();
    assert!(!path.exists());
    assert_eq!(reloaded.stats().await.unwrap().count, 0);
}

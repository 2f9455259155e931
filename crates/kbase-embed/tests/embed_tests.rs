use kbase_core::config::EmbeddingConfig;
use kbase_core::traits::Embedder;
use kbase_embed::{cosine_similarity, get_default_embedder, truncate_input, HashingEmbedder};

#[tokio::test]
async fn default_embedder_shapes_and_determinism() {
    let embedder = get_default_embedder(&EmbeddingConfig::default());
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_batch(&texts).await.expect("embed_batch");
    let (v1, v2) = (&embs[0], &embs[1]);

    assert_eq!(v1.len(), 384, "embedding dim follows config");

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    for (a, b) in v1.iter().zip(v2.iter()) {
        assert!((a - b).abs() <= 1e-6);
    }
}

#[tokio::test]
async fn batches_larger_than_ten_keep_order() {
    let embedder = HashingEmbedder::new(64, 256);
    let texts: Vec<String> = (0..23).map(|i| format!("item number {i}")).collect();
    let batch = embedder.embed_batch(&texts).await.unwrap();
    assert_eq!(batch.len(), 23);
    let single = embedder.embed(&texts[17]).await.unwrap();
    assert_eq!(batch[17], single);
}

#[tokio::test]
async fn related_texts_score_higher_than_unrelated() {
    let embedder = HashingEmbedder::new(384, 256);
    let doc = embedder.embed("The quick brown fox jumps over the lazy dog.").await.unwrap();
    let query = embedder.embed("fox jumping").await.unwrap();
    let other = embedder.embed("quarterly revenue spreadsheet").await.unwrap();
    let related = cosine_similarity(&doc, &query);
    assert!(related > 0.3, "related={related}");
    assert!(related > cosine_similarity(&doc, &other));
}

#[tokio::test]
async fn empty_text_embeds_to_zero_vector() {
    let embedder = HashingEmbedder::new(16, 8);
    let v = embedder.embed("   ").await.unwrap();
    assert!(v.iter().all(|x| *x == 0.0));
}

#[tokio::test]
async fn initialize_is_lazy_and_reported() {
    let embedder = HashingEmbedder::new(8, 4);
    assert!(!embedder.model_info().initialized);
    embedder.embed("warm up").await.unwrap();
    let info = embedder.model_info();
    assert!(info.initialized);
    assert_eq!((info.dimension, info.max_tokens), (8, 4));
    assert_eq!(embedder.max_len(), 16);
}

#[test]
fn truncation_respects_word_boundaries() {
    assert_eq!(truncate_input("short", 10), "short");
    assert_eq!(truncate_input("alpha beta gamma", 12), "alpha beta");
    assert_eq!(truncate_input("alpha beta gamma", 10), "alpha beta");
    assert_eq!(truncate_input("supercalifragilistic", 5), "super");
}

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{Fixture, MockEmbedder};
use crate::config::SearchConfig;
use crate::semantic::{IndexEntry, IndexStore, Modality, SearchEngine, SearchError};

fn engine(store: Arc<IndexStore>, embedder: Arc<MockEmbedder>) -> SearchEngine {
    SearchEngine::new(store, embedder, SearchConfig::default())
}

fn put(store: &IndexStore, modality: Modality, path: &str, embedding: Vec<f32>) {
    store.upsert(modality, path, IndexEntry::new(embedding, 1.0));
}

#[test]
fn test_search_ranks_both_modalities_with_their_thresholds() {
    let fx = Fixture::new();
    // cosine against [1, 0]: 1.0, 0.6, 0.3, 0.1
    put(&fx.store, Modality::Text, "/docs/exact.txt", vec![1.0, 0.0]);
    put(&fx.store, Modality::Text, "/docs/close.txt", vec![0.6, 0.8]);
    put(&fx.store, Modality::Text, "/docs/weak.txt", vec![0.3, 0.953_939_2]);
    put(&fx.store, Modality::Text, "/docs/noise.txt", vec![0.1, 0.994_987_4]);

    put(&fx.store, Modality::Image, "/img/exact.png", vec![1.0, 0.0]);
    put(&fx.store, Modality::Image, "/img/close.png", vec![0.6, 0.8]);
    put(&fx.store, Modality::Image, "/img/weak.png", vec![0.3, 0.953_939_2]);

    let results = engine(fx.store.clone(), fx.embedder.clone())
        .search("vec:1,0")
        .unwrap();

    let text: Vec<&str> = results.text.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(text, vec!["/docs/exact.txt", "/docs/close.txt", "/docs/weak.txt"]);
    assert!(results.text.iter().all(|r| r.score >= 0.2));

    // 0.3 passes the text threshold but not the image one
    let images: Vec<&str> = results.images.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(images, vec!["/img/exact.png", "/img/close.png"]);
    assert!(results.images.iter().all(|r| r.score >= 0.4));
}

#[test]
fn test_search_uses_the_matching_encoder_per_modality() {
    let fx = Fixture::new();
    put(&fx.store, Modality::Image, "/img/a.png", vec![1.0, 0.0]);

    engine(fx.store.clone(), fx.embedder.clone())
        .search("vec:1,0")
        .unwrap();

    assert_eq!(fx.embedder.text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.embedder.query_image_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.embedder.image_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_search_limits() {
    let fx = Fixture::new();
    for i in 0..15 {
        let tilt = i as f32 * 0.01;
        put(&fx.store, Modality::Text, &format!("/docs/{i:02}.txt"), vec![1.0, tilt]);
        put(&fx.store, Modality::Image, &format!("/img/{i:02}.png"), vec![1.0, tilt]);
    }

    let results = engine(fx.store.clone(), fx.embedder.clone())
        .search("vec:1,0")
        .unwrap();

    assert_eq!(results.text.len(), 10);
    assert_eq!(results.images.len(), 5);
    assert_eq!(results.text[0].path, "/docs/00.txt");
    assert!(results.text.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(
        results.images.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(),
        vec!["/img/00.png", "/img/01.png", "/img/02.png", "/img/03.png", "/img/04.png"]
    );
}

#[test]
fn test_configured_thresholds_and_limits() {
    let fx = Fixture::new();
    put(&fx.store, Modality::Text, "/docs/a.txt", vec![1.0, 0.0]);
    put(&fx.store, Modality::Text, "/docs/b.txt", vec![0.6, 0.8]);

    let config = SearchConfig {
        text_threshold: 0.9,
        text_limit: 1,
        ..SearchConfig::default()
    };
    let engine = SearchEngine::new(fx.store.clone(), fx.embedder.clone(), config);

    let results = engine.search("vec:1,0").unwrap();
    assert_eq!(results.text.len(), 1);
    assert_eq!(results.text[0].path, "/docs/a.txt");
}

#[test]
fn test_short_query_is_rejected_without_service_call() {
    let fx = Fixture::new();
    let engine = engine(fx.store.clone(), fx.embedder.clone());

    for query in ["", "a", "  b  ", "\n"] {
        assert!(matches!(
            engine.search(query),
            Err(SearchError::QueryTooShort { min_chars: 2 })
        ));
    }
    assert_eq!(fx.embedder.total_calls(), 0);

    // two characters is enough, multi-byte ones included
    assert!(engine.search("éé").is_ok());
}

#[test]
fn test_embedding_failure_fails_search_and_keeps_index() {
    let fx = Fixture::new();
    put(&fx.store, Modality::Text, "/docs/a.txt", vec![1.0, 0.0]);
    fx.embedder.set_unavailable(true);

    let err = engine(fx.store.clone(), fx.embedder.clone())
        .search("hello")
        .unwrap_err();

    assert!(matches!(err, SearchError::Embedding(_)));
    assert_eq!(fx.store.len(Modality::Text), 1);
}

#[test]
fn test_entries_of_other_dimensions_never_match() {
    let fx = Fixture::new();
    put(&fx.store, Modality::Text, "/docs/old-model.txt", vec![1.0, 0.0, 0.0]);
    put(&fx.store, Modality::Text, "/docs/zero.txt", vec![0.0, 0.0]);

    let results = engine(fx.store.clone(), fx.embedder.clone())
        .search("vec:1,0")
        .unwrap();

    assert!(results.text.is_empty());
}

#[test]
fn test_search_after_indexing() {
    let fx = Fixture::new();
    fx.file("cats.txt", "vec:1,0,0", 1_000);
    fx.file("dogs.txt", "vec:0,1,0", 1_000);
    fx.file("cat.png", "vec:0.9,0.1,0", 1_000);

    fx.indexer
        .run_pass(
            &crate::semantic::PassPlan::on_demand(vec![fx.docs.clone()]),
            &crate::lock::StopSignal::new(),
        )
        .unwrap();

    let results = engine(fx.store.clone(), fx.embedder.clone())
        .search("vec:1,0,0")
        .unwrap();

    assert_eq!(results.text.len(), 1);
    assert!(results.text[0].path.ends_with("cats.txt"));
    assert_eq!(results.images.len(), 1);
    assert!(results.images[0].path.ends_with("cat.png"));
}

#[test]
fn test_below_threshold_entry_is_dropped() {
    let fx = Fixture::new();
    // cosine against [1, 0]: 0.25 and 0.15
    put(&fx.store, Modality::Text, "/docs/B.txt", vec![0.25, 0.968_245_8]);
    put(&fx.store, Modality::Text, "/docs/C.txt", vec![0.15, 0.988_686]);

    let results = engine(fx.store.clone(), fx.embedder.clone())
        .search("vec:1,0")
        .unwrap();

    assert_eq!(results.text.len(), 1);
    assert_eq!(results.text[0].path, "/docs/B.txt");
    assert!((results.text[0].score - 0.25).abs() < 1e-4);
}

mod common;

use std::sync::Arc;

use clausefind_core::config::RetrievalConfig;
use clausefind_core::error::{Error, ValidationError};
use clausefind_core::traits::{Embedder, Reranker};
use clausefind_embed::{FakeEmbedder, FakeReranker};
use clausefind_search::similarity::top_n;
use clausefind_search::RetrievalEngine;
use proptest::prelude::*;

use common::{contract, paragraph, ConceptEncoder, FlatReranker};

fn retrieval(coarse_width: usize) -> RetrievalConfig {
    RetrievalConfig { coarse_width, default_top_k: 10 }
}

fn concept_engine() -> (Arc<ConceptEncoder>, RetrievalEngine) {
    let enc = Arc::new(ConceptEncoder::default());
    let engine = RetrievalEngine::new(enc.clone(), enc.clone(), &retrieval(20), 4);
    (enc, engine)
}

fn fake_engine(coarse_width: usize, reranker: Arc<dyn Reranker>) -> RetrievalEngine {
    RetrievalEngine::new(Arc::new(FakeEmbedder::new(128)), reranker, &retrieval(coarse_width), 8)
}

#[test]
fn search_before_load_fails() {
    let (_, engine) = concept_engine();
    let err = engine.search("termination", 5).unwrap_err();
    assert!(matches!(err, Error::Validation(ValidationError::NoDocumentLoaded)));
    assert_eq!(err.to_string(), "Invalid request: no document loaded");
}

#[test]
fn empty_document_yields_empty_results() {
    let (_, engine) = concept_engine();
    assert_eq!(engine.load_document(Vec::new()).unwrap(), 0);
    assert!(engine.search("x", 5).unwrap().is_empty());
}

#[test]
fn chinese_query_finds_english_termination_clause() {
    let (_, engine) = concept_engine();
    engine.load_document(contract()).unwrap();
    let results = engine.search("终止合同需要多久提前通知", 3).unwrap();

    assert_eq!(results[0].text, "Termination requires 60 days notice.");
    let payment = results.iter().position(|r| r.text.starts_with("Payment")).unwrap();
    assert!(payment > 0);
    assert!(results[0].score > results[payment].score);
}

#[test]
fn results_carry_provenance() {
    let (_, engine) = concept_engine();
    engine.load_document(contract()).unwrap();
    let top = &engine.search("notice period for termination", 1).unwrap()[0];
    assert_eq!(top.original_index, paragraph(2, "").original_index);
    assert!(top.coarse_score > 0.0);
}

#[test]
fn reload_replaces_previous_document() {
    let (_, engine) = concept_engine();
    engine.load_document(contract()).unwrap();
    engine.load_document(vec![paragraph(0, "Confidential information stays secret.")]).unwrap();

    let results = engine.search("termination notice", 10).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text, "Confidential information stays secret.");
}

#[test]
fn inference_failure_leaves_table_usable() {
    let (enc, engine) = concept_engine();
    engine.load_document(contract()).unwrap();
    enc.fail_next.store(true, std::sync::atomic::Ordering::SeqCst);

    assert!(matches!(engine.search("termination", 2), Err(Error::Inference(_))));
    assert_eq!(engine.search("termination", 2).unwrap().len(), 2);
}

#[test]
fn top_k_larger_than_document_is_clamped() {
    let engine = fake_engine(2, Arc::new(FakeReranker));
    engine.load_document((0..4).map(|i| paragraph(i, &format!("clause {i} governs fees"))).collect()).unwrap();
    assert_eq!(engine.search("fees", 50).unwrap().len(), 4);
}

#[test]
fn equal_rerank_scores_keep_coarse_order() {
    let engine = fake_engine(10, Arc::new(FlatReranker));
    let chunks: Vec<_> = [
        "late fees accrue monthly",
        "governing law is new york",
        "fees are payable in advance fees",
        "notices must be written",
    ]
    .iter()
    .enumerate()
    .map(|(i, t)| paragraph(i, t))
    .collect();
    engine.load_document(chunks).unwrap();

    let results = engine.search("fees", 4).unwrap();
    let coarse: Vec<f32> = results.iter().map(|r| r.coarse_score).collect();
    assert!(coarse.windows(2).all(|w| w[0] >= w[1]), "{coarse:?}");
}

/// Scores candidates from a fixed text-to-score table.
struct TableReranker(Vec<(&'static str, f32)>);

impl Reranker for TableReranker {
    fn score_pairs(&self, _query: &str, candidates: &[&str]) -> clausefind_core::Result<Vec<f32>> {
        Ok(candidates
            .iter()
            .map(|c| self.0.iter().find(|(t, _)| t == c).map_or(0.0, |(_, s)| *s))
            .collect())
    }
}

#[test]
fn nan_rerank_score_ranks_last() {
    let reranker = TableReranker(vec![("alpha fees", 1.0), ("beta fees", f32::NAN), ("gamma fees", 0.8)]);
    let engine = fake_engine(10, Arc::new(reranker));
    engine
        .load_document(vec![paragraph(0, "alpha fees"), paragraph(1, "beta fees"), paragraph(2, "gamma fees")])
        .unwrap();

    let results = engine.search("fees", 3).unwrap();
    let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["alpha fees", "gamma fees", "beta fees"]);
    assert!(results[2].score.is_nan());
}

#[test]
fn concurrent_search_sees_a_whole_table() {
    let (_, engine) = concept_engine();
    let engine = Arc::new(engine);
    let doc_a = contract();
    let doc_b: Vec<_> = (0..6).map(|i| paragraph(i, &format!("Confidential schedule {i}."))).collect();
    engine.load_document(doc_a.clone()).unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || {
            for round in 0..20 {
                let doc = if round % 2 == 0 { doc_b.clone() } else { doc_a.clone() };
                engine.load_document(doc).unwrap();
            }
        })
    };
    for _ in 0..50 {
        let results = engine.search("confidential termination payment", 10).unwrap();
        let all_b = results.iter().all(|r| r.text.starts_with("Confidential schedule"));
        let none_b = results.iter().all(|r| !r.text.starts_with("Confidential schedule"));
        assert!(all_b || none_b);
        assert!(results.len() == 3 || results.len() == 6);
    }
    writer.join().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn result_bounds_and_ordering(
        texts in prop::collection::vec("[a-z]{2,8}( [a-z]{2,8}){0,6}", 1..25),
        query in "[a-z]{2,8}( [a-z]{2,8}){0,3}",
        top_k in 1usize..40,
        coarse_width in 1usize..30,
    ) {
        let engine = fake_engine(coarse_width, Arc::new(FakeReranker));
        let chunks: Vec<_> = texts.iter().enumerate().map(|(i, t)| paragraph(i, t)).collect();
        engine.load_document(chunks).unwrap();
        let results = engine.search(&query, top_k).unwrap();

        prop_assert!(results.len() <= top_k);
        prop_assert!(results.len() <= texts.len());
        prop_assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn coarse_stage_bounded_and_keeps_best_match(
        texts in prop::collection::vec("[a-z]{2,8}( [a-z]{2,8}){0,6}", 1..25),
        query in "[a-z]{2,8}( [a-z]{2,8}){0,3}",
        width in 1usize..30,
    ) {
        let embedder = FakeEmbedder::new(128);
        let rows = embedder.embed_batch(&texts).unwrap();
        let q = embedder.embed_batch(&[query]).unwrap().remove(0);
        let all = top_n(&q, &rows, rows.len());
        let coarse = top_n(&q, &rows, width.min(rows.len()));

        prop_assert!(coarse.len() <= width.min(texts.len()));
        prop_assert_eq!(coarse[0].0, all[0].0);
    }
}

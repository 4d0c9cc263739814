#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use clausefind_core::error::{Error, Result};
use clausefind_core::traits::{Embedder, Reranker};
use clausefind_core::types::{Chunk, OriginalIndex, SourceType};

const CONCEPTS: &[&[&str]] = &[
    &["terminat", "notice", "终止", "解除", "提前", "通知"],
    &["payment", "pay", "付款", "支付", "款"],
    &["confidential", "保密"],
];

/// Maps text onto a few legal concepts shared by English and Chinese.
fn concept_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = CONCEPTS
        .iter()
        .map(|words| words.iter().filter(|w| lower.contains(*w)).count() as f32)
        .collect();
    v.push(0.1);
    v
}

/// Bilingual stand-in for the real models.
#[derive(Default)]
pub struct ConceptEncoder {
    pub fail_next: AtomicBool,
}

impl Embedder for ConceptEncoder {
    fn dim(&self) -> usize {
        CONCEPTS.len() + 1
    }

    fn max_len(&self) -> usize {
        512
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| concept_vector(t)).collect())
    }
}

impl Reranker for ConceptEncoder {
    fn score_pairs(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Inference("reranker crashed".into()));
        }
        let q = concept_vector(query);
        Ok(candidates
            .iter()
            .map(|c| concept_vector(c).iter().zip(&q).map(|(a, b)| a * b).sum())
            .collect())
    }
}

/// [`ConceptEncoder`] with adjustable per-call latency.
#[derive(Default)]
pub struct SlowEncoder {
    inner: ConceptEncoder,
    pub embed_delay_ms: AtomicU64,
    pub rerank_delay_ms: AtomicU64,
}

impl Embedder for SlowEncoder {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn max_len(&self) -> usize {
        self.inner.max_len()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        std::thread::sleep(Duration::from_millis(self.embed_delay_ms.load(Ordering::SeqCst)));
        self.inner.embed_batch(texts)
    }
}

impl Reranker for SlowEncoder {
    fn score_pairs(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>> {
        std::thread::sleep(Duration::from_millis(self.rerank_delay_ms.load(Ordering::SeqCst)));
        self.inner.score_pairs(query, candidates)
    }
}

/// Scores every candidate the same.
pub struct FlatReranker;

impl Reranker for FlatReranker {
    fn score_pairs(&self, _query: &str, candidates: &[&str]) -> Result<Vec<f32>> {
        Ok(vec![1.0; candidates.len()])
    }
}

pub fn paragraph(index: usize, text: &str) -> Chunk {
    Chunk {
        text: text.to_string(),
        original_index: OriginalIndex::Paragraph { index },
        source_type: SourceType::Paragraph,
        metadata: Default::default(),
    }
}

pub fn contract() -> Vec<Chunk> {
    vec![
        paragraph(0, "Payment due within 30 days."),
        paragraph(1, "付款条款如下..."),
        paragraph(2, "Termination requires 60 days notice."),
    ]
}

//! Deterministic stand-ins for the real encoders.
//!
//! Selected with `models.use_fake = true` or `APP_USE_FAKE_EMBEDDINGS=1` for
//! fast tests and development without model weights.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use clausefind_core::error::Result;
use clausefind_core::traits::{Embedder, Reranker};

pub const FAKE_DIM: usize = 1024;

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{3400}'..='\u{4dbf}' | '\u{4e00}'..='\u{9fff}' | '\u{f900}'..='\u{faff}')
}

/// Lowercased alphanumeric words; each CJK ideograph is its own token.
pub fn fake_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            tokens.push(c.to_string());
        } else if c.is_alphanumeric() {
            word.extend(c.to_lowercase());
        } else if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

pub struct FakeEmbedder {
    dim: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self::new(FAKE_DIM)
    }
}

impl Embedder for FakeEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        512
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

impl FakeEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in fake_tokens(text).iter().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

/// Scores a pair by the fraction of query tokens present in the candidate.
#[derive(Default)]
pub struct FakeReranker;

impl Reranker for FakeReranker {
    fn score_pairs(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>> {
        let query: HashSet<String> = fake_tokens(query).into_iter().collect();
        let denom = query.len().max(1) as f32;
        Ok(candidates
            .iter()
            .map(|c| {
                let cand: HashSet<String> = fake_tokens(c).into_iter().collect();
                query.intersection(&cand).count() as f32 / denom
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_split_cjk_per_char() {
        assert_eq!(fake_tokens("终止 Contract-Term"), vec!["终", "止", "contract", "term"]);
    }

    #[test]
    fn reranker_prefers_overlap() {
        let scores = FakeReranker.score_pairs("termination notice", &["payment terms", "termination notice period"]).unwrap();
        assert!(scores[1] > scores[0]);
    }
}

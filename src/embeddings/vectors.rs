//! Text vectorization.
//!
//! Harmonic token projection: every token is read as a base-2^16 integer,
//! reduced modulo a run of primes, and each residue is placed on the unit
//! circle. Token vectors are mean-pooled. Deterministic and training-free,
//! so the "model path" in the configuration is only recorded, never loaded.

use std::f64::consts::TAU;

/// Longest token prefix (in code points) that feeds the integer encoding
const MAX_TOKEN_CHARS: usize = 64;

/// Something that turns text into fixed-width vectors
pub trait Vectors: Send {
    fn dimensions(&self) -> usize;

    fn encode(&self, text: &str) -> Vec<f32>;

    /// Encode one batch; output order follows input order
    fn encode_batch(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }
}

pub struct HarmonicVectors {
    model: String,
    moduli: Vec<u64>,
    normalize: bool,
}

impl HarmonicVectors {
    /// `dimensions` must be even: each modulus yields a (sin, cos) pair
    pub fn new(model: &str, dimensions: usize, normalize: bool) -> Self {
        Self {
            model: model.to_string(),
            moduli: first_primes(dimensions / 2),
            normalize,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn project_token(&self, token: &str, acc: &mut [f64]) {
        let n = token
            .chars()
            .take(MAX_TOKEN_CHARS)
            .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64));

        for (i, &m) in self.moduli.iter().enumerate() {
            let theta = TAU * ((n % m) as f64) / (m as f64);
            acc[2 * i] += theta.sin();
            acc[2 * i + 1] += theta.cos();
        }
    }
}

impl Vectors for HarmonicVectors {
    fn dimensions(&self) -> usize {
        self.moduli.len() * 2
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut acc = vec![0.0f64; self.dimensions()];
        if tokens.is_empty() {
            return vec![0.0; acc.len()];
        }

        for token in &tokens {
            self.project_token(token, &mut acc);
        }
        let count = tokens.len() as f64;
        acc.iter_mut().for_each(|v| *v /= count);

        if self.normalize {
            let norm = acc.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                acc.iter_mut().for_each(|v| *v /= norm);
            }
        }

        acc.into_iter().map(|v| v as f32).collect()
    }
}

/// Lowercased word tokens, split on whitespace and ASCII punctuation
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// First `count` primes, by trial division against the primes found so far
fn first_primes(count: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(count);
    let mut candidate = 2u64;
    while primes.len() < count {
        let is_prime = primes
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0);
        if is_prime {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_primes() {
        assert_eq!(first_primes(8), vec![2, 3, 5, 7, 11, 13, 17, 19]);
        assert_eq!(first_primes(192).last(), Some(&1163));
    }

    #[test]
    fn test_deterministic_and_sized() {
        let a = HarmonicVectors::new("test", 384, true);
        let b = HarmonicVectors::new("test", 384, true);

        let v1 = a.encode("machine learning models");
        let v2 = b.encode("machine learning models");
        assert_eq!(v1, v2);
        assert_eq!(v1.len(), 384);
        assert_ne!(v1, a.encode("cooking recipes"));
    }

    #[test]
    fn test_normalized_length() {
        let model = HarmonicVectors::new("test", 128, true);
        let v = model.encode("한국어 테스트 and English");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_unnormalized_keeps_mean() {
        let model = HarmonicVectors::new("test", 16, false);
        let v = model.encode("alpha");
        // single token: every (sin, cos) pair lies on the unit circle
        let pair = v[0] * v[0] + v[1] * v[1];
        assert!((pair - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero() {
        let model = HarmonicVectors::new("test", 32, true);
        assert!(model.encode("  ... ").iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_shared_tokens_score_higher() {
        let model = HarmonicVectors::new("test", 384, true);
        let query = model.encode("transformer models");
        let related = model.encode("Natural language processing advances with transformer models");
        let unrelated = model.encode("Sourdough bread needs a long proof");
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_encode_batch_order() {
        let model = HarmonicVectors::new("test", 32, true);
        let out = model.encode_batch(&["a", "b", "c"]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], model.encode("c"));
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World! x-y"), vec!["hello", "world", "x", "y"]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}

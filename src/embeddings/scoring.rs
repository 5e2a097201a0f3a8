//! Term scoring helpers for hybrid search.

use std::collections::HashMap;

use super::vectors::tokenize;
use crate::config::HybridWeights;

/// FTS5 MATCH expression OR-ing every query token as a quoted phrase
pub fn fts_query(text: &str) -> String {
    let mut tokens = tokenize(text);
    tokens.sort();
    tokens.dedup();
    tokens
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Divide by the best score so the top term match is 1.0
pub fn normalize(scores: &mut HashMap<String, f32>) {
    let max = scores.values().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        scores.values_mut().for_each(|s| *s /= max);
    }
}

/// Weighted average of a semantic and a term score
pub fn blend(semantic: f32, terms: f32, weights: HybridWeights) -> f32 {
    let total = weights.hybrid + weights.terms;
    if total <= 0.0 {
        return semantic;
    }
    (weights.hybrid * semantic + weights.terms * terms) / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_query() {
        assert_eq!(fts_query("Machine learning, machine!"), r#""learning" OR "machine""#);
        assert_eq!(fts_query("  ?? "), "");
    }

    #[test]
    fn test_normalize() {
        let mut scores = HashMap::from([("a".to_string(), 4.0), ("b".to_string(), 1.0)]);
        normalize(&mut scores);
        assert_eq!(scores["a"], 1.0);
        assert_eq!(scores["b"], 0.25);
    }

    #[test]
    fn test_blend() {
        let weights = HybridWeights { hybrid: 0.7, terms: 0.3 };
        assert!((blend(1.0, 0.0, weights) - 0.7).abs() < 1e-6);
        assert!((blend(0.5, 1.0, weights) - 0.65).abs() < 1e-6);

        let even = HybridWeights { hybrid: 2.0, terms: 2.0 };
        assert!((blend(0.2, 0.6, even) - 0.4).abs() < 1e-6);
    }
}

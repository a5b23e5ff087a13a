//! Sparse string-keyed vectors and cosine similarity.

use std::collections::BTreeMap;

/// A sparse vector keyed by normalized tag or reaction-type strings.
///
/// Repeated additions to the same key accumulate, which is how a tag that
/// appears in both the flat tag list and a category bucket gains weight.
/// Backed by a `BTreeMap` for deterministic iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    entries: BTreeMap<String, f64>,
}

impl SparseVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `weight` to the entry for `key`, creating it if absent.
    pub fn add(&mut self, key: impl Into<String>, weight: f64) {
        *self.entries.entry(key.into()).or_insert(0.0) += weight;
    }

    /// Build a vector from integer counts (reaction distributions).
    pub fn from_counts(counts: &BTreeMap<String, i64>) -> Self {
        let mut v = Self::new();
        for (key, count) in counts {
            if *count > 0 {
                v.add(key.clone(), *count as f64);
            }
        }
        v
    }

    pub fn get(&self, key: &str) -> f64 {
        self.entries.get(key).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn norm(&self) -> f64 {
        self.entries.values().map(|w| w * w).sum::<f64>().sqrt()
    }

    fn dot(&self, other: &Self) -> f64 {
        // Iterate the smaller map
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .entries
            .iter()
            .map(|(k, w)| w * large.get(k))
            .sum()
    }

    /// Cosine similarity in [0, 1] for non-negative weights.
    ///
    /// Returns 0.0 when either vector is empty or has zero norm.
    pub fn cosine_similarity(&self, other: &Self) -> f64 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }
        let denom = self.norm() * other.norm();
        if denom == 0.0 {
            return 0.0;
        }
        self.dot(other) / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_of(pairs: &[(&str, f64)]) -> SparseVector {
        let mut v = SparseVector::new();
        for (k, w) in pairs {
            v.add(*k, *w);
        }
        v
    }

    #[test]
    fn empty_vectors_have_zero_similarity() {
        let empty = SparseVector::new();
        let full = vec_of(&[("katze", 1.0)]);
        assert_eq!(empty.cosine_similarity(&full), 0.0);
        assert_eq!(full.cosine_similarity(&empty), 0.0);
        assert_eq!(empty.cosine_similarity(&empty), 0.0);
    }

    #[test]
    fn identical_vectors_have_similarity_one() {
        let a = vec_of(&[("katze", 0.9), ("hund", 0.5)]);
        let sim = a.cosine_similarity(&a.clone());
        assert!((sim - 1.0).abs() < 1e-12);
    }

    #[test]
    fn disjoint_vectors_have_zero_similarity() {
        let a = vec_of(&[("katze", 1.0)]);
        let b = vec_of(&[("hund", 1.0)]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = vec_of(&[("katze", 0.7), ("wetter", 0.3)]);
        let b = vec_of(&[("katze", 0.2), ("essen", 0.8)]);
        assert!((a.cosine_similarity(&b) - b.cosine_similarity(&a)).abs() < 1e-12);
    }

    #[test]
    fn repeated_add_accumulates() {
        let mut v = SparseVector::new();
        v.add("katze", 0.5);
        v.add("katze", 0.25);
        assert_eq!(v.get("katze"), 0.75);
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn from_counts_skips_nonpositive() {
        let mut counts = BTreeMap::new();
        counts.insert("heart".to_string(), 3);
        counts.insert("laugh".to_string(), 0);
        let v = SparseVector::from_counts(&counts);
        assert_eq!(v.len(), 1);
        assert_eq!(v.get("heart"), 3.0);
    }

    #[test]
    fn zero_weight_vector_has_zero_similarity() {
        let mut a = SparseVector::new();
        a.add("katze", 0.0);
        let b = vec_of(&[("katze", 1.0)]);
        assert_eq!(a.cosine_similarity(&b), 0.0);
    }
}

use uuid::Uuid;
use wizardlab_storage::{cosine_similarity, EmbeddingCandidate, SocialEngageStore, StoreError};

pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.92;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateMatch {
    pub id: Uuid,
    pub similarity: f64,
}

/// Author-scoped near-duplicate detection over stored embeddings.
#[derive(Debug, Clone, Copy)]
pub struct SemanticDedupe {
    threshold: f64,
}

impl Default for SemanticDedupe {
    fn default() -> Self {
        Self::new(DEFAULT_DUPLICATE_THRESHOLD)
    }
}

impl SemanticDedupe {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Highest-similarity candidate at or above the threshold.
    pub fn best_match(&self, embedding: &[f32], candidates: &[EmbeddingCandidate]) -> Option<DuplicateMatch> {
        candidates
            .iter()
            .filter_map(|c| {
                cosine_similarity(embedding, &c.embedding).map(|similarity| DuplicateMatch { id: c.id, similarity })
            })
            .filter(|m| m.similarity >= self.threshold)
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity))
    }

    /// Skipped entirely when the author is unknown.
    pub async fn find_duplicate(
        &self,
        store: &dyn SocialEngageStore,
        platform: &str,
        author_handle: Option<&str>,
        embedding: &[f32],
        exclude_id: Uuid,
    ) -> Result<Option<DuplicateMatch>, StoreError> {
        let Some(author) = author_handle.map(str::trim).filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let candidates = store.semantic_candidates(platform, author, exclude_id).await?;
        Ok(self
            .best_match(embedding, &candidates)
            .filter(|m| m.id != exclude_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(embedding: Vec<f32>) -> EmbeddingCandidate {
        EmbeddingCandidate { id: Uuid::new_v4(), embedding }
    }

    #[test]
    fn best_candidate_wins() {
        let near = candidate(vec![0.96, 0.28]);
        let exact = candidate(vec![2.0, 0.0]);
        let far = candidate(vec![0.0, 1.0]);
        let found = SemanticDedupe::default()
            .best_match(&[1.0, 0.0], &[near.clone(), exact.clone(), far])
            .unwrap();
        assert_eq!(found.id, exact.id);
        assert!((found.similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn below_threshold_is_not_a_duplicate() {
        let dedupe = SemanticDedupe::new(0.99);
        assert!(dedupe.best_match(&[1.0, 0.0], &[candidate(vec![0.96, 0.28])]).is_none());
        assert!(dedupe.best_match(&[1.0, 0.0], &[]).is_none());
    }

    #[test]
    fn mismatched_dimensions_are_ignored() {
        let dedupe = SemanticDedupe::default();
        assert!(dedupe.best_match(&[1.0, 0.0], &[candidate(vec![1.0, 0.0, 0.0])]).is_none());
    }
}

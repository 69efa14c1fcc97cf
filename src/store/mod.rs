//! Vector collection abstraction for paper records.
//!
//! The [`PaperCollection`] trait is the only storage seam the pipelines see.
//! Two backends implement it:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteCollection`] | The real collection, one SQLite table per collection name |
//! | [`InMemoryCollection`] | Tests and library callers that need no database |
//!
//! Both run exact nearest-neighbour search: every stored vector is scored
//! with cosine distance and the top K are returned in ascending distance,
//! ties broken by paper id.

pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::{Paper, ScoredPaper};

pub use memory::InMemoryCollection;
pub use sqlite::SqliteCollection;

/// Result of [`PaperCollection::vector_search`].
#[derive(Debug, Clone, Default)]
pub struct VectorSearchResult {
    /// Number of searchable records, when requested.
    pub total_count: Option<u64>,
    /// Top K papers by ascending cosine distance.
    pub hits: Vec<ScoredPaper>,
}

/// A named collection of [`Paper`] records with a vector index on the
/// abstract embedding.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_collection_if_not_exists`](PaperCollection::create_collection_if_not_exists) | Idempotent schema setup |
/// | [`upsert_batch`](PaperCollection::upsert_batch) | Insert-or-replace records keyed by id |
/// | [`vector_search`](PaperCollection::vector_search) | Top K by cosine distance |
/// | [`get`](PaperCollection::get) | Fetch one record |
/// | [`count`](PaperCollection::count) | Number of stored records |
#[async_trait]
pub trait PaperCollection: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Create the collection if it is missing. Safe to call repeatedly.
    async fn create_collection_if_not_exists(&self) -> Result<()>;

    /// Insert or replace every paper of the batch, keyed by `id`.
    ///
    /// All columns are replaced, so a paper upserted without an embedding
    /// loses any vector stored for it earlier.
    async fn upsert_batch(&self, papers: &[Paper]) -> Result<()>;

    /// Return the `top` closest papers to `query_vec`.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        top: usize,
        include_total_count: bool,
    ) -> Result<VectorSearchResult>;

    async fn get(&self, id: &str) -> Result<Option<Paper>>;

    async fn count(&self) -> Result<u64>;
}

/// Score candidates against the query and keep the `top` closest.
///
/// Candidates whose dimensionality differs from the query are skipped with a
/// warning. Returns the number of scored candidates and the ranked
/// `(id, distance)` pairs.
pub(crate) fn rank_candidates<I>(
    query_vec: &[f32],
    candidates: I,
    top: usize,
) -> Result<(u64, Vec<(String, f64)>)>
where
    I: IntoIterator<Item = (String, Vec<f32>)>,
{
    if query_vec.is_empty() {
        bail!("Query vector is empty");
    }

    let mut scored: Vec<(String, f64)> = Vec::new();
    for (id, vector) in candidates {
        if vector.len() != query_vec.len() {
            tracing::warn!(
                id = %id,
                dims = vector.len(),
                expected = query_vec.len(),
                "skipping paper with mismatched embedding dimensions"
            );
            continue;
        }
        let distance = cosine_distance(query_vec, &vector);
        scored.push((id, distance));
    }

    let total = scored.len() as u64;
    scored.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(top);

    Ok((total, scored))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_orders_by_distance_then_id() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            ("c".to_string(), vec![0.0, 1.0]),
            ("b".to_string(), vec![1.0, 0.0]),
            ("a".to_string(), vec![2.0, 0.0]),
            ("d".to_string(), vec![1.0, 1.0]),
        ];
        let (total, ranked) = rank_candidates(&query, candidates, 3).unwrap();
        assert_eq!(total, 4);
        let ids: Vec<&str> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
        assert!(ranked.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_rank_skips_mismatched_dims() {
        let candidates = vec![
            ("short".to_string(), vec![1.0]),
            ("ok".to_string(), vec![1.0, 0.0]),
        ];
        let (total, ranked) = rank_candidates(&[1.0, 0.0], candidates, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(ranked[0].0, "ok");
    }

    #[test]
    fn test_rank_rejects_empty_query() {
        assert!(rank_candidates(&[], Vec::new(), 3).is_err());
    }

    #[test]
    fn test_rank_top_zero() {
        let candidates = vec![("a".to_string(), vec![1.0])];
        let (total, ranked) = rank_candidates(&[1.0], candidates, 0).unwrap();
        assert_eq!(total, 1);
        assert!(ranked.is_empty());
    }
}

//! In-memory [`PaperCollection`] for tests and database-free callers.
//!
//! Records live in a `BTreeMap` behind `std::sync::RwLock`. Semantics match
//! [`SqliteCollection`](super::SqliteCollection): the collection must be
//! created before upserts, and vector search is brute-force cosine distance.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{Paper, ScoredPaper};

use super::{rank_candidates, PaperCollection, VectorSearchResult};

pub struct InMemoryCollection {
    name: String,
    created: AtomicBool,
    papers: RwLock<BTreeMap<String, Paper>>,
}

impl InMemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created: AtomicBool::new(false),
            papers: RwLock::new(BTreeMap::new()),
        }
    }

    fn ensure_created(&self) -> Result<()> {
        if !self.created.load(Ordering::SeqCst) {
            bail!("Collection '{}' does not exist", self.name);
        }
        Ok(())
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory collection lock poisoned")
}

#[async_trait]
impl PaperCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_collection_if_not_exists(&self) -> Result<()> {
        self.created.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_batch(&self, papers: &[Paper]) -> Result<()> {
        self.ensure_created()?;
        let mut stored = self.papers.write().map_err(poisoned)?;
        for paper in papers {
            stored.insert(paper.id.clone(), paper.clone());
        }
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        top: usize,
        include_total_count: bool,
    ) -> Result<VectorSearchResult> {
        self.ensure_created()?;
        let stored = self.papers.read().map_err(poisoned)?;

        let candidates = stored.values().filter_map(|paper| {
            paper
                .embedding
                .as_ref()
                .map(|vector| (paper.id.clone(), vector.clone()))
        });
        let (total, ranked) = rank_candidates(query_vec, candidates, top)?;

        let hits = ranked
            .into_iter()
            .filter_map(|(id, score)| {
                stored.get(&id).map(|paper| ScoredPaper {
                    paper: paper.clone(),
                    score,
                })
            })
            .collect();

        Ok(VectorSearchResult {
            total_count: include_total_count.then_some(total),
            hits,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Paper>> {
        self.ensure_created()?;
        Ok(self.papers.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn count(&self) -> Result<u64> {
        self.ensure_created()?;
        Ok(self.papers.read().map_err(poisoned)?.len() as u64)
    }
}

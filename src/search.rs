//! Semantic paper search.
//!
//! Embeds the query with the same provider and dimensionality used during
//! ingestion and asks the collection for the closest abstracts. Results are
//! handed out as a lazy stream so callers decide how to consume them.
//!
//! ```text
//! query ──► EmbeddingProvider ──► PaperCollection::vector_search ──► SearchResults
//! ```

use anyhow::{Context, Result};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::io::Write;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, embed_query, EmbeddingProvider};
use crate::models::ScoredPaper;
use crate::store::{PaperCollection, SqliteCollection};

/// Number of results returned when the caller does not ask for a count.
pub const DEFAULT_TOP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub top: usize,
    pub include_total_count: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top: DEFAULT_TOP,
            include_total_count: false,
        }
    }
}

/// Search output: an optional total plus the ranked hits, closest first.
pub struct SearchResults {
    pub total_count: Option<u64>,
    pub results: BoxStream<'static, ScoredPaper>,
}

/// Vector search over a paper collection.
#[derive(Clone)]
pub struct PaperSearch {
    collection: Arc<dyn PaperCollection>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl PaperSearch {
    pub fn new(collection: Arc<dyn PaperCollection>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            collection,
            embedder,
        }
    }

    /// Find the `options.top` papers whose abstracts are closest to `query`.
    ///
    /// Read-only: the collection is never modified.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResults> {
        let vector = embed_query(self.embedder.as_ref(), query)
            .await
            .context("Failed to embed search query")?;

        let found = self
            .collection
            .vector_search(&vector, options.top, options.include_total_count)
            .await
            .with_context(|| format!("Failed to search collection '{}'", self.collection.name()))?;

        tracing::debug!(query, hits = found.hits.len(), "search complete");

        Ok(SearchResults {
            total_count: found.total_count,
            results: stream::iter(found.hits).boxed(),
        })
    }
}

/// `archie search`: print the `count` closest papers to `query`.
pub async fn run_search(config: &Config, query: &str, count: usize) -> Result<()> {
    let embedder = create_provider(&config.embedding)?;

    db::with_pool(config, |pool| async move {
        let collection = Arc::new(SqliteCollection::new(pool, config.db.collection.as_str())?);
        let search = PaperSearch::new(collection, embedder);

        let results = search
            .search(
                query,
                SearchOptions {
                    top: count,
                    include_total_count: true,
                },
            )
            .await?;

        let total_count = results.total_count;
        let hits: Vec<ScoredPaper> = results.results.collect().await;

        let mut stdout = std::io::stdout().lock();
        write_results(&mut stdout, total_count, &hits)?;
        Ok(())
    })
    .await
}

/// Render search hits in the CLI's text format.
pub fn write_results(
    out: &mut impl Write,
    total_count: Option<u64>,
    hits: &[ScoredPaper],
) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "Found {} papers.", total_count.unwrap_or(hits.len() as u64))?;
    writeln!(out)?;
    for hit in hits {
        writeln!(out, "Title: {}", hit.paper.title)?;
        writeln!(out, "Link: {}", hit.paper.link.as_deref().unwrap_or("n/a"))?;
        writeln!(out, "Score: {}", hit.score)?;
        writeln!(out)?;
    }
    Ok(())
}

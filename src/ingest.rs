//! Ingestion pipeline orchestration.
//!
//! Coordinates the `load` flow: arXiv query → normalization → batched
//! embedding → upsert into the collection. Batches run strictly one after
//! another; a failing batch aborts the run and leaves earlier batches stored.

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::connector_arxiv::{ArxivClient, ArxivQuery};
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::models::Paper;
use crate::progress::{LoadProgressEvent, LoadProgressReporter};
use crate::store::{PaperCollection, SqliteCollection};

/// Fetch papers on `topic` in `category` from arXiv, embed their abstracts
/// and store them in the configured collection.
pub async fn run_load(
    config: &Config,
    topic: &str,
    category: &str,
    num_papers: usize,
    reporter: &dyn LoadProgressReporter,
) -> Result<()> {
    reporter.report(LoadProgressEvent::Fetching {
        topic: topic.to_string(),
        category: category.to_string(),
    });

    let client = ArxivClient::from_config(&config.arxiv);
    let query =
        ArxivQuery::new(topic, category, num_papers).with_page_size(config.arxiv.page_size);
    let entries = client
        .query(&query)
        .await
        .with_context(|| format!("Failed to query arXiv for '{}'", topic))?;

    let papers = entries
        .into_iter()
        .map(Paper::from_feed_entry)
        .collect::<Result<Vec<_>>>()?;

    println!("Found {} papers on '{}'", papers.len(), topic);

    let embedder = create_provider(&config.embedding)?;

    let loaded = db::with_pool(config, |pool| async move {
        let collection = SqliteCollection::new(pool, config.db.collection.as_str())?;
        load_papers(
            &collection,
            embedder.as_ref(),
            papers,
            config.ingest.batch_size,
            reporter,
        )
        .await
    })
    .await?;

    println!(
        "Loaded {} papers into collection '{}'",
        loaded, config.db.collection
    );
    Ok(())
}

/// Embed and upsert `papers` in batches of `batch_size`.
///
/// Creates the collection first if needed. Returns the number of papers
/// stored.
pub async fn load_papers(
    collection: &dyn PaperCollection,
    embedder: &dyn EmbeddingProvider,
    papers: Vec<Paper>,
    batch_size: usize,
    reporter: &dyn LoadProgressReporter,
) -> Result<usize> {
    collection.create_collection_if_not_exists().await?;

    let total = papers.len();
    let batch_size = batch_size.max(1);
    let mut loaded = 0usize;

    for (batch_index, batch) in papers.chunks(batch_size).enumerate() {
        let abstracts: Vec<String> = batch.iter().map(|p| p.abstract_text.clone()).collect();
        let vectors = embedder
            .embed_texts(&abstracts)
            .await
            .with_context(|| format!("Failed to embed batch {}", batch_index + 1))?;
        if vectors.len() != batch.len() {
            bail!(
                "Failed to embed batch {}: expected {} vectors, got {}",
                batch_index + 1,
                batch.len(),
                vectors.len()
            );
        }

        let records: Vec<Paper> = batch
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(paper, vector)| paper.with_embedding(vector))
            .collect();

        collection
            .upsert_batch(&records)
            .await
            .with_context(|| format!("Failed to upsert batch {}", batch_index + 1))?;

        loaded += records.len();
        tracing::debug!(batch = batch_index + 1, loaded, total, "stored batch");

        reporter.report(LoadProgressEvent::Loading {
            loaded: loaded.min(total) as u64,
            total: total as u64,
        });
    }

    tracing::info!(collection = collection.name(), loaded, "load complete");
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCollection;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct CountingEmbedder {
        batches: Mutex<Vec<usize>>,
        fail_on_batch: Option<usize>,
        short_on_batch: Option<usize>,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut batches = self.batches.lock().unwrap();
            batches.push(texts.len());
            if Some(batches.len()) == self.fail_on_batch {
                bail!("embedding service unavailable");
            }
            let mut vectors: Vec<Vec<f32>> =
                texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect();
            if Some(batches.len()) == self.short_on_batch {
                vectors.pop();
            }
            Ok(vectors)
        }
    }

    struct RecordingProgress(Mutex<Vec<LoadProgressEvent>>);

    impl LoadProgressReporter for RecordingProgress {
        fn report(&self, event: LoadProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn papers(n: usize) -> Vec<Paper> {
        (0..n)
            .map(|i| Paper {
                id: format!("2401.{:05}v1", i),
                title: format!("Paper {}", i),
                abstract_text: "x".repeat(i + 1),
                published: Utc::now(),
                authors: Vec::new(),
                categories: vec!["cs.AI".to_string()],
                link: None,
                pdf_link: None,
                embedding: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_batches_of_twenty() {
        let collection = InMemoryCollection::new("papers");
        let embedder = CountingEmbedder {
            batches: Mutex::new(Vec::new()),
            fail_on_batch: None,
            short_on_batch: None,
        };
        let progress = RecordingProgress(Mutex::new(Vec::new()));

        let loaded = load_papers(&collection, &embedder, papers(45), 20, &progress)
            .await
            .unwrap();

        assert_eq!(loaded, 45);
        assert_eq!(*embedder.batches.lock().unwrap(), vec![20, 20, 5]);
        assert_eq!(collection.count().await.unwrap(), 45);

        let stored = collection.get("2401.00003v1").await.unwrap().unwrap();
        assert_eq!(stored.embedding, Some(vec![4.0, 1.0]));

        let events = progress.0.lock().unwrap().clone();
        assert_eq!(
            events.last(),
            Some(&LoadProgressEvent::Loading { loaded: 45, total: 45 })
        );
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_batches() {
        let collection = InMemoryCollection::new("papers");
        let embedder = CountingEmbedder {
            batches: Mutex::new(Vec::new()),
            fail_on_batch: Some(2),
            short_on_batch: None,
        };
        let progress = RecordingProgress(Mutex::new(Vec::new()));

        let err = load_papers(&collection, &embedder, papers(45), 20, &progress)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("batch 2"));
        assert_eq!(collection.count().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_empty_input_still_creates_collection() {
        let collection = InMemoryCollection::new("papers");
        let embedder = CountingEmbedder {
            batches: Mutex::new(Vec::new()),
            fail_on_batch: None,
            short_on_batch: None,
        };
        let progress = RecordingProgress(Mutex::new(Vec::new()));

        let loaded = load_papers(&collection, &embedder, Vec::new(), 20, &progress)
            .await
            .unwrap();

        assert_eq!(loaded, 0);
        assert_eq!(collection.count().await.unwrap(), 0);
        assert!(embedder.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_embedding_response_aborts_load() {
        let collection = InMemoryCollection::new("papers");
        let embedder = CountingEmbedder {
            batches: Mutex::new(Vec::new()),
            fail_on_batch: None,
            short_on_batch: Some(2),
        };
        let progress = RecordingProgress(Mutex::new(Vec::new()));

        let err = load_papers(&collection, &embedder, papers(25), 20, &progress)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("expected 5 vectors, got 4"));
        assert_eq!(collection.count().await.unwrap(), 20);
        assert_eq!(progress.0.lock().unwrap().len(), 1);
    }
}

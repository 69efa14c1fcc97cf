//! Core data models used throughout Archie.
//!
//! A paper starts life as a [`FeedEntry`] (raw fields pulled out of the arXiv
//! Atom feed), is normalized into a [`Paper`], picks up an embedding during
//! `archie load`, and is finally upserted into the vector collection.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dimensionality of the abstract embeddings stored in the collection.
pub const EMBEDDING_DIMS: usize = 1536;

/// Raw fields extracted from a single `<entry>` of the arXiv feed.
///
/// Nothing is normalized yet: titles and abstracts still carry the feed's
/// line-continuation whitespace and `published` is the source string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub published: String,
    pub link: Option<String>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub pdf_link: Option<String>,
}

/// A paper record as stored in the vector collection.
///
/// The same shape is used before and after embedding; `embedding` is only
/// populated once the ingestion pipeline has embedded `abstract_text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub published: DateTime<Utc>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub link: Option<String>,
    pub pdf_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Paper {
    /// Build a normalized paper from raw feed fields.
    ///
    /// # Errors
    ///
    /// Returns an error if `published` is not an RFC 3339 timestamp.
    pub fn from_feed_entry(entry: FeedEntry) -> Result<Self> {
        let published = DateTime::parse_from_rfc3339(entry.published.trim())
            .with_context(|| {
                format!(
                    "Invalid published date '{}' for paper {}",
                    entry.published, entry.id
                )
            })?
            .with_timezone(&Utc);

        Ok(Self {
            id: entry.id,
            title: normalize_text(&entry.title),
            abstract_text: normalize_text(&entry.abstract_text),
            published,
            authors: entry.authors,
            categories: entry.categories,
            link: entry.link,
            pdf_link: entry.pdf_link,
            embedding: None,
        })
    }

    /// Attach an embedding computed from this paper's abstract.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Replace the abstract. Any embedding derived from the old text is dropped.
    pub fn set_abstract(&mut self, abstract_text: impl Into<String>) {
        let abstract_text = abstract_text.into();
        if abstract_text != self.abstract_text {
            self.abstract_text = abstract_text;
            self.embedding = None;
        }
    }
}

/// Collapse the feed's line-continuation artifacts (`"\n  "`) into a single space.
pub fn normalize_text(text: &str) -> String {
    text.replace("\n  ", " ")
}

/// Extract the arXiv identifier from an entry URI (its last path segment).
///
/// `http://arxiv.org/abs/2401.01234v2` becomes `2401.01234v2`.
pub fn paper_id_from_uri(uri: &str) -> String {
    uri.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// A paper returned from a similarity search together with its cosine distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPaper {
    pub paper: Paper,
    /// Cosine distance to the query vector; lower is closer.
    pub score: f64,
}

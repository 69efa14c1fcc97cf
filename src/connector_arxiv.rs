//! arXiv paper-source connector.
//!
//! Queries the public arXiv API for papers matching a topic within a
//! category and extracts the raw fields of every feed entry.
//!
//! # Pagination
//!
//! Results are requested newest-updated first in pages of `page_size`
//! (capped at [`ARXIV_MAX_PAGE_SIZE`]) starting at offset 0, until
//! `total_results` have been requested or the feed runs dry. A page that
//! comes back shorter than requested means the source is exhausted.
//!
//! Between two page requests the client sleeps for `page_delay` (3 s by
//! default) to honour arXiv's courtesy rate limit. There is no pause after
//! the last page.
//!
//! # Failure
//!
//! Any non-success HTTP status, API error entry, or malformed feed aborts
//! the whole query; pages already fetched are discarded.
//!
//! # Configuration
//!
//! ```toml
//! [arxiv]
//! base_url = "http://export.arxiv.org/api/query"
//! page_size = 100
//! page_delay_secs = 3
//! ```

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ArxivConfig, ARXIV_MAX_PAGE_SIZE};
use crate::models::{paper_id_from_uri, FeedEntry};

/// Errors raised while querying the arXiv API.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("arXiv request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("arXiv API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("arXiv API error: {0}")]
    Api(String),

    #[error("malformed arXiv feed: {0}")]
    Malformed(String),

    #[error("arXiv entry '{entry}' is missing <{field}>")]
    MissingField { field: &'static str, entry: String },
}

/// A topic query against one arXiv category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArxivQuery {
    pub topic: String,
    pub category: String,
    pub total_results: usize,
    pub page_size: usize,
}

impl ArxivQuery {
    pub fn new(
        topic: impl Into<String>,
        category: impl Into<String>,
        total_results: usize,
    ) -> Self {
        Self {
            topic: topic.into(),
            category: category.into(),
            total_results,
            page_size: 100,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// One page request: result offset and page length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub start: usize,
    pub max_results: usize,
}

/// Transport for a single page of the feed.
///
/// [`HttpFeedFetcher`] is the production implementation; the pagination loop
/// in [`ArxivClient`] only ever talks to this trait.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the raw Atom XML for one page.
    async fn fetch_page(&self, query: &ArxivQuery, page: PageRequest) -> Result<String, FeedError>;
}

/// Fetches feed pages from the arXiv HTTP API with `reqwest`.
pub struct HttpFeedFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFeedFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch_page(&self, query: &ArxivQuery, page: PageRequest) -> Result<String, FeedError> {
        let url = build_query_url(&self.base_url, query, page);
        debug!(%url, "requesting arXiv page");

        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Status {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        Ok(resp.text().await?)
    }
}

/// Paginating arXiv client.
pub struct ArxivClient<F = HttpFeedFetcher> {
    fetcher: F,
    page_delay: Duration,
}

impl ArxivClient<HttpFeedFetcher> {
    /// Build an HTTP-backed client from the `[arxiv]` config section.
    pub fn from_config(config: &ArxivConfig) -> Self {
        Self::new(
            HttpFeedFetcher::new(config.base_url.clone()),
            Duration::from_secs(config.page_delay_secs),
        )
    }
}

impl<F: FeedFetcher> ArxivClient<F> {
    pub fn new(fetcher: F, page_delay: Duration) -> Self {
        Self {
            fetcher,
            page_delay,
        }
    }

    /// Run the query, following pagination, and return every entry found.
    pub async fn query(&self, query: &ArxivQuery) -> Result<Vec<FeedEntry>, FeedError> {
        let page_size = query.page_size.clamp(1, ARXIV_MAX_PAGE_SIZE);
        let mut all_entries = Vec::new();
        let mut start = 0;
        let mut remaining = query.total_results;

        while remaining > 0 {
            let max_results = page_size.min(remaining);
            let page = PageRequest { start, max_results };

            let xml = self.fetcher.fetch_page(query, page).await?;
            let entries = parse_feed(&xml)?;
            let received = entries.len();
            debug!(start, max_results, received, "parsed arXiv page");
            all_entries.extend(entries);

            start += max_results;
            remaining -= max_results;

            if received < max_results {
                debug!(start, "arXiv results exhausted");
                break;
            }

            if remaining > 0 {
                tokio::time::sleep(self.page_delay).await;
            }
        }

        info!(
            topic = %query.topic,
            category = %query.category,
            found = all_entries.len(),
            "arXiv query complete"
        );
        Ok(all_entries)
    }
}

/// Build the arXiv query URL for one page.
///
/// The topic is matched as a quoted phrase across all fields and
/// intersected with the category; results are newest-updated first.
pub fn build_query_url(base_url: &str, query: &ArxivQuery, page: PageRequest) -> String {
    format!(
        "{}?search_query=all:%22{}%22+AND+cat:{}&start={}&max_results={}&sortBy=lastUpdatedDate&sortOrder=descending",
        base_url,
        query_encode(&query.topic),
        query_encode(&query.category),
        page.start,
        page.max_results
    )
}

/// Encode a query-string value: spaces become `+`, unreserved characters
/// pass through, everything else is percent-encoded.
fn query_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            b' ' => result.push('+'),
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

// ============ Atom feed parsing ============

#[derive(Debug, Clone, Copy)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

#[derive(Default)]
struct PartialEntry {
    id_uri: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    authors: Vec<String>,
    categories: Vec<String>,
    pdf_link: Option<String>,
}

impl PartialEntry {
    fn set(&mut self, field: Field, text: String) {
        match field {
            Field::Id => self.id_uri = Some(text.trim().to_string()),
            Field::Title => self.title = Some(text),
            Field::Summary => self.summary = Some(text),
            Field::Published => self.published = Some(text.trim().to_string()),
            Field::AuthorName => self.authors.push(text.trim().to_string()),
        }
    }

    fn apply_element(&mut self, e: &BytesStart<'_>) -> Result<(), FeedError> {
        match e.local_name().as_ref() {
            b"link" => {
                if self.pdf_link.is_none() && attribute(e, b"title")?.as_deref() == Some("pdf") {
                    self.pdf_link = attribute(e, b"href")?;
                }
            }
            b"category" => {
                if let Some(term) = attribute(e, b"term")? {
                    self.categories.push(term);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<FeedEntry, FeedError> {
        let id_uri = self.id_uri.ok_or_else(|| FeedError::MissingField {
            field: "id",
            entry: self.title.clone().unwrap_or_default(),
        })?;

        // arXiv reports query errors as a single entry under /api/errors
        if id_uri.contains("/api/errors") {
            return Err(FeedError::Api(
                self.summary.unwrap_or_else(|| id_uri.clone()).trim().to_string(),
            ));
        }

        let id = paper_id_from_uri(&id_uri);
        let missing = |field| FeedError::MissingField {
            field,
            entry: id.clone(),
        };

        Ok(FeedEntry {
            title: self.title.ok_or_else(|| missing("title"))?,
            abstract_text: self.summary.ok_or_else(|| missing("summary"))?,
            published: self.published.ok_or_else(|| missing("published"))?,
            link: Some(id_uri),
            authors: self.authors,
            categories: self.categories,
            pdf_link: self.pdf_link,
            id,
        })
    }
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, FeedError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| FeedError::Malformed(err.to_string()))?;
        if attr.key.local_name().as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| FeedError::Malformed(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Parse an arXiv Atom feed into raw [`FeedEntry`] values.
///
/// Text is kept verbatim (line-continuation whitespace included); see
/// [`crate::models::Paper::from_feed_entry`] for normalization.
///
/// # Errors
///
/// Returns [`FeedError::Malformed`] for invalid XML or a document that is
/// not a `<feed>`, [`FeedError::MissingField`] for entries without id,
/// title, summary or published date, and [`FeedError::Api`] when arXiv
/// answered with an error entry.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, FeedError> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<PartialEntry> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();
    let mut in_author = false;
    let mut depth = 0usize;
    let mut saw_feed = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                match e.local_name().as_ref() {
                    b"feed" if depth == 1 => saw_feed = true,
                    b"entry" => current = Some(PartialEntry::default()),
                    b"author" if current.is_some() => in_author = true,
                    b"name" if in_author => field = Some(Field::AuthorName),
                    b"id" if current.is_some() && !in_author => field = Some(Field::Id),
                    b"title" if current.is_some() => field = Some(Field::Title),
                    b"summary" if current.is_some() => field = Some(Field::Summary),
                    b"published" if current.is_some() => field = Some(Field::Published),
                    _ => {
                        if let Some(entry) = current.as_mut() {
                            entry.apply_element(&e)?;
                        }
                    }
                }
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if depth == 0 && e.local_name().as_ref() == b"feed" {
                    saw_feed = true;
                }
                if let Some(entry) = current.as_mut() {
                    entry.apply_element(&e)?;
                }
            }
            Ok(Event::Text(t)) => {
                if field.is_some() {
                    let unescaped = t
                        .unescape()
                        .map_err(|err| FeedError::Malformed(err.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(c)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::End(e)) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| FeedError::Malformed("unbalanced end tag".to_string()))?;
                match e.local_name().as_ref() {
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            entries.push(entry.finish()?);
                        }
                    }
                    b"author" => in_author = false,
                    _ => {
                        if let (Some(f), Some(entry)) = (field.take(), current.as_mut()) {
                            entry.set(f, std::mem::take(&mut text));
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FeedError::Malformed(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if !saw_feed {
        return Err(FeedError::Malformed("response is not an Atom <feed>".to_string()));
    }
    if depth != 0 {
        return Err(FeedError::Malformed("unexpected end of document".to_string()));
    }

    Ok(entries)
}

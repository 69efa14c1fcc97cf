//! SQLite-backed [`PaperCollection`].
//!
//! One table per collection, named by `[db].collection`:
//!
//! ```sql
//! CREATE TABLE arxiv_records (
//!     id              TEXT PRIMARY KEY,
//!     title           TEXT NOT NULL,
//!     abstract        TEXT NOT NULL,
//!     published       INTEGER NOT NULL,   -- unix seconds
//!     authors_json    TEXT NOT NULL,
//!     categories_json TEXT NOT NULL,
//!     link            TEXT,
//!     pdf_link        TEXT,
//!     embedding       BLOB,               -- little-endian f32
//!     embedding_dims  INTEGER
//! );
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::is_sql_identifier;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{Paper, ScoredPaper};

use super::{rank_candidates, PaperCollection, VectorSearchResult};

/// SQLite implementation of [`PaperCollection`].
pub struct SqliteCollection {
    pool: SqlitePool,
    table: String,
}

impl SqliteCollection {
    /// Wrap a pool. The collection name is used verbatim as the table name,
    /// so it must be a plain SQL identifier.
    pub fn new(pool: SqlitePool, name: impl Into<String>) -> Result<Self> {
        let table = name.into();
        if !is_sql_identifier(&table) {
            bail!("Invalid collection name '{}'", table);
        }
        Ok(Self { pool, table })
    }

    fn paper_from_row(row: &SqliteRow) -> Result<Paper> {
        let id: String = row.try_get("id")?;
        let published: i64 = row.try_get("published")?;
        let authors_json: String = row.try_get("authors_json")?;
        let categories_json: String = row.try_get("categories_json")?;
        let embedding: Option<Vec<u8>> = row.try_get("embedding")?;

        Ok(Paper {
            title: row.try_get("title")?,
            abstract_text: row.try_get("abstract")?,
            published: DateTime::from_timestamp(published, 0)
                .with_context(|| format!("Invalid published timestamp for paper {}", id))?,
            authors: serde_json::from_str(&authors_json)
                .with_context(|| format!("Invalid authors for paper {}", id))?,
            categories: serde_json::from_str(&categories_json)
                .with_context(|| format!("Invalid categories for paper {}", id))?,
            link: row.try_get("link")?,
            pdf_link: row.try_get("pdf_link")?,
            embedding: embedding.map(|blob| blob_to_vec(&blob)),
            id,
        })
    }
}

#[async_trait]
impl PaperCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.table
    }

    async fn create_collection_if_not_exists(&self) -> Result<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                abstract TEXT NOT NULL,
                published INTEGER NOT NULL,
                authors_json TEXT NOT NULL,
                categories_json TEXT NOT NULL,
                link TEXT,
                pdf_link TEXT,
                embedding BLOB,
                embedding_dims INTEGER
            )
            "#,
            self.table
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create collection {}", self.table))?;

        tracing::debug!(collection = %self.table, "collection ready");
        Ok(())
    }

    async fn upsert_batch(&self, papers: &[Paper]) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, title, abstract, published, authors_json,
                            categories_json, link, pdf_link, embedding, embedding_dims)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                abstract = excluded.abstract,
                published = excluded.published,
                authors_json = excluded.authors_json,
                categories_json = excluded.categories_json,
                link = excluded.link,
                pdf_link = excluded.pdf_link,
                embedding = excluded.embedding,
                embedding_dims = excluded.embedding_dims
            "#,
            self.table
        );

        let mut tx = self.pool.begin().await?;
        for paper in papers {
            let blob = paper.embedding.as_deref().map(vec_to_blob);
            let dims = paper.embedding.as_ref().map(|v| v.len() as i64);

            sqlx::query(&sql)
                .bind(&paper.id)
                .bind(&paper.title)
                .bind(&paper.abstract_text)
                .bind(paper.published.timestamp())
                .bind(serde_json::to_string(&paper.authors)?)
                .bind(serde_json::to_string(&paper.categories)?)
                .bind(&paper.link)
                .bind(&paper.pdf_link)
                .bind(blob)
                .bind(dims)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to upsert paper {}", paper.id))?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        top: usize,
        include_total_count: bool,
    ) -> Result<VectorSearchResult> {
        let rows = sqlx::query(&format!(
            "SELECT id, embedding FROM {} WHERE embedding IS NOT NULL",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id")?;
            let blob: Vec<u8> = row.try_get("embedding")?;
            candidates.push((id, blob_to_vec(&blob)));
        }

        let (total, ranked) = rank_candidates(query_vec, candidates, top)?;

        let mut hits = Vec::with_capacity(ranked.len());
        for (id, score) in ranked {
            if let Some(paper) = self.get(&id).await? {
                hits.push(ScoredPaper { paper, score });
            }
        }

        Ok(VectorSearchResult {
            total_count: include_total_count.then_some(total),
            hits,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Paper>> {
        let row = sqlx::query(&format!("SELECT * FROM {} WHERE id = ?", self.table))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::paper_from_row).transpose()
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

//! Fallback ticket back-end: Postgres with a vector extension
//!
//! Vector queries go through the `match_{table}` stored procedure; when the
//! procedure is unavailable the back-end fetches up to `multiplier × k`
//! candidate rows and scores cosine similarity in-process. Keyword queries
//! rank with `ts_rank` over the `title + description` lexical index,
//! rewriting multi-word queries to boolean-AND form; a missing index
//! degrades to an ILIKE substring scan at the documented uniform score.

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::time::Duration;

use ticket_rag_core::{cosine_similarity, meta, Collection, TicketFilters};
use ticket_rag_config::constants::retrieval::SUBSTRING_FALLBACK_SCORE;

use crate::backend::{KeywordHit, KeywordResults, TicketBackend, VectorHit};
use crate::StoreError;

/// Postgres back-end configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub acquire_timeout: Duration,
    /// Candidate rows for client-side scoring: `multiplier × k`
    pub candidate_multiplier: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            acquire_timeout: Duration::from_secs(5),
            candidate_multiplier: 3,
        }
    }
}

/// Fallback back-end
pub struct PostgresBackend {
    pool: PgPool,
    config: PostgresConfig,
}

const ROW_COLUMNS: &str = "jira_id, key, title, description, content, project, status, created";

impl PostgresBackend {
    pub async fn connect(config: PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(classify)?;

        Ok(Self { pool, config })
    }

    /// Wrap an existing pool (tests, shared pools).
    pub fn from_pool(pool: PgPool, config: PostgresConfig) -> Self {
        Self { pool, config }
    }

    /// Rewrite a free-text query to the store's boolean-AND tsquery form.
    ///
    /// Tokens are stripped to alphanumerics so user punctuation cannot break
    /// the tsquery syntax; `region server timeout` becomes
    /// `region & server & timeout`.
    pub fn rewrite_tsquery(query: &str) -> String {
        query
            .split_whitespace()
            .map(|token| {
                token
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
            })
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>()
            .join(" & ")
    }

    /// Render an embedding as a pgvector literal.
    fn vector_literal(embedding: &[f32]) -> String {
        let mut out = String::with_capacity(embedding.len() * 10 + 2);
        out.push('[');
        for (i, v) in embedding.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&v.to_string());
        }
        out.push(']');
        out
    }

    /// `AND col = $n` clauses starting at parameter `start`.
    fn filter_clause(filters: &TicketFilters, start: usize) -> (String, Vec<String>) {
        let mut sql = String::new();
        let mut binds = Vec::new();
        for (i, (column, value)) in filters.pairs().into_iter().enumerate() {
            sql.push_str(&format!(" AND {column} = ${}", start + i));
            binds.push(value.to_string());
        }
        (sql, binds)
    }

    fn row_to_parts(row: &PgRow, collection: Collection) -> (String, HashMap<String, String>) {
        let title: String = row.try_get("title").unwrap_or_default();
        let description: Option<String> = row.try_get("description").unwrap_or_default();
        let content: Option<String> = row.try_get("content").unwrap_or_default();
        let content = content
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| format!("{title}\n{}", description.clone().unwrap_or_default()));

        let mut metadata = HashMap::new();
        if let Ok(key) = row.try_get::<String, _>("key") {
            metadata.insert(meta::KEY.to_string(), key);
        }
        metadata.insert(meta::TITLE.to_string(), title);
        metadata.insert("collection".to_string(), collection.as_str().to_string());
        if let Ok(Some(project)) = row.try_get::<Option<String>, _>("project") {
            metadata.insert(meta::PROJECT.to_string(), project);
        }
        if let Ok(Some(status)) = row.try_get::<Option<String>, _>("status") {
            metadata.insert("status".to_string(), status);
        }
        if let Ok(Some(created)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("created")
        {
            metadata.insert(meta::TIMESTAMP.to_string(), created.to_rfc3339());
        }

        (content, metadata)
    }

    /// Parse a `vector`-column text rendering back into floats.
    fn parse_embedding(text: &str) -> Option<Vec<f32>> {
        let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
        if inner.is_empty() {
            return Some(Vec::new());
        }
        inner
            .split(',')
            .map(|v| v.trim().parse::<f32>().ok())
            .collect()
    }

    async fn vector_search_rpc(
        &self,
        collection: Collection,
        embedding_literal: &str,
        k: usize,
        threshold: f32,
        filters: &TicketFilters,
    ) -> Result<Vec<VectorHit>, sqlx::Error> {
        let (filter_sql, filter_binds) = Self::filter_clause(filters, 4);
        let sql = format!(
            "SELECT {ROW_COLUMNS}, similarity \
             FROM match_{table}($1::vector, $2::double precision, $3::integer) \
             WHERE true{filter_sql}",
            table = collection.table_name(),
        );

        let mut query = sqlx::query(&sql)
            .bind(embedding_literal)
            .bind(threshold as f64)
            .bind(k as i64);
        for bind in &filter_binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let (content, metadata) = Self::row_to_parts(row, collection);
                let similarity: f64 = row.try_get("similarity").unwrap_or(0.0);
                VectorHit {
                    content,
                    metadata,
                    similarity: (similarity as f32).clamp(0.0, 1.0),
                }
            })
            .collect())
    }

    async fn vector_search_client_side(
        &self,
        collection: Collection,
        query_embedding: &[f32],
        k: usize,
        threshold: f32,
        filters: &TicketFilters,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let candidates = (self.config.candidate_multiplier.max(1) * k).max(k);
        let (filter_sql, filter_binds) = Self::filter_clause(filters, 2);
        let sql = format!(
            "SELECT {ROW_COLUMNS}, embedding::text AS embedding \
             FROM {table} WHERE embedding IS NOT NULL{filter_sql} \
             ORDER BY created DESC NULLS LAST LIMIT $1",
            table = collection.table_name(),
        );

        let mut query = sqlx::query(&sql).bind(candidates as i64);
        for bind in &filter_binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(classify)?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .filter_map(|row| {
                let text: String = row.try_get("embedding").ok()?;
                let embedding = Self::parse_embedding(&text)?;
                let similarity = cosine_similarity(query_embedding, &embedding);
                if similarity < threshold {
                    return None;
                }
                let (content, metadata) = Self::row_to_parts(row, collection);
                Some(VectorHit {
                    content,
                    metadata,
                    similarity: similarity.clamp(0.0, 1.0),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(k);
        Ok(hits)
    }

    async fn keyword_search_ranked(
        &self,
        collection: Collection,
        tsquery: &str,
        k: usize,
        filters: &TicketFilters,
    ) -> Result<Vec<KeywordHit>, sqlx::Error> {
        let (filter_sql, filter_binds) = Self::filter_clause(filters, 3);
        let sql = format!(
            "SELECT {ROW_COLUMNS}, \
             ts_rank(to_tsvector('english', title || ' ' || coalesce(description, '')), \
                     to_tsquery('english', $1)) AS rank \
             FROM {table} \
             WHERE to_tsvector('english', title || ' ' || coalesce(description, '')) \
                   @@ to_tsquery('english', $1){filter_sql} \
             ORDER BY rank DESC LIMIT $2",
            table = collection.table_name(),
        );

        let mut query = sqlx::query(&sql).bind(tsquery).bind(k as i64);
        for bind in &filter_binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let (content, metadata) = Self::row_to_parts(row, collection);
                let rank: f32 = row.try_get("rank").unwrap_or(0.0);
                KeywordHit {
                    content,
                    metadata,
                    rank,
                }
            })
            .collect())
    }

    async fn keyword_search_substring(
        &self,
        collection: Collection,
        query: &str,
        k: usize,
        filters: &TicketFilters,
    ) -> Result<Vec<KeywordHit>, StoreError> {
        let (filter_sql, filter_binds) = Self::filter_clause(filters, 3);
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM {table} \
             WHERE (title ILIKE $1 OR description ILIKE $1){filter_sql} LIMIT $2",
            table = collection.table_name(),
        );

        let pattern = format!("%{}%", query.trim());
        let mut q = sqlx::query(&sql).bind(pattern).bind(k as i64);
        for bind in &filter_binds {
            q = q.bind(bind);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(classify)?;
        Ok(rows
            .iter()
            .map(|row| {
                let (content, metadata) = Self::row_to_parts(row, collection);
                KeywordHit {
                    content,
                    metadata,
                    rank: SUBSTRING_FALLBACK_SCORE,
                }
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl TicketBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn vector_search(
        &self,
        collection: Collection,
        query_embedding: &[f32],
        k: usize,
        threshold: f32,
        filters: &TicketFilters,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let literal = Self::vector_literal(query_embedding);

        match self
            .vector_search_rpc(collection, &literal, k, threshold, filters)
            .await
        {
            Ok(hits) => Ok(hits),
            Err(sqlx::Error::Database(db)) => {
                // Nearest-neighbor routine unavailable; score client-side.
                tracing::warn!(
                    collection = %collection,
                    code = db.code().as_deref().unwrap_or("unknown"),
                    "match procedure unavailable, falling back to client-side scoring"
                );
                self.vector_search_client_side(collection, query_embedding, k, threshold, filters)
                    .await
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn keyword_search(
        &self,
        collection: Collection,
        query: &str,
        k: usize,
        filters: &TicketFilters,
    ) -> Result<KeywordResults, StoreError> {
        let tsquery = Self::rewrite_tsquery(query);
        if tsquery.is_empty() {
            return Ok(KeywordResults::default());
        }

        match self
            .keyword_search_ranked(collection, &tsquery, k, filters)
            .await
        {
            Ok(hits) => Ok(KeywordResults {
                hits,
                used_index: true,
            }),
            Err(sqlx::Error::Database(db)) => {
                tracing::warn!(
                    collection = %collection,
                    code = db.code().as_deref().unwrap_or("unknown"),
                    "lexical ranking unavailable, falling back to substring scan"
                );
                let hits = self
                    .keyword_search_substring(collection, query, k, filters)
                    .await?;
                Ok(KeywordResults {
                    hits,
                    used_index: false,
                })
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn ready(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

fn classify(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(e) => StoreError::Transient(e.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Transient(err.to_string())
        }
        sqlx::Error::Database(db) => {
            // 28xxx: invalid authorization specification
            if db.code().map(|c| c.starts_with("28")).unwrap_or(false) {
                StoreError::Auth(db.to_string())
            } else {
                StoreError::Backend(db.to_string())
            }
        }
        other => StoreError::Backend(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsquery_rewrite() {
        assert_eq!(
            PostgresBackend::rewrite_tsquery("region server timeout"),
            "region & server & timeout"
        );
        assert_eq!(PostgresBackend::rewrite_tsquery("single"), "single");
        assert_eq!(
            PostgresBackend::rewrite_tsquery("can't connect!"),
            "cant & connect"
        );
        assert_eq!(PostgresBackend::rewrite_tsquery("  ?!  "), "");
    }

    #[test]
    fn test_vector_literal() {
        assert_eq!(PostgresBackend::vector_literal(&[0.5, -1.0]), "[0.5,-1]");
        assert_eq!(PostgresBackend::vector_literal(&[]), "[]");
    }

    #[test]
    fn test_parse_embedding_round_trip() {
        let original = vec![0.25f32, -1.5, 3.0];
        let literal = PostgresBackend::vector_literal(&original);
        let parsed = PostgresBackend::parse_embedding(&literal).unwrap();
        assert_eq!(parsed, original);
        assert!(PostgresBackend::parse_embedding("not a vector").is_none());
    }

    #[test]
    fn test_filter_clause_numbering() {
        let filters = TicketFilters {
            project: Some("HBASE".to_string()),
            status: Some("Open".to_string()),
            ..Default::default()
        };
        let (sql, binds) = PostgresBackend::filter_clause(&filters, 3);
        assert_eq!(sql, " AND project = $3 AND status = $4");
        assert_eq!(binds, vec!["HBASE", "Open"]);

        let (sql, binds) = PostgresBackend::filter_clause(&TicketFilters::default(), 2);
        assert!(sql.is_empty());
        assert!(binds.is_empty());
    }
}

//! Primary ticket back-end: Qdrant + tantivy
//!
//! Cosine nearest-neighbor queries run natively in Qdrant with a score
//! threshold and equality filters on payload fields. Keyword ranking comes
//! from the per-collection tantivy index; when no index is configured the
//! back-end degrades to a bounded scroll plus case-insensitive substring
//! scan at the documented uniform score.

use qdrant_client::{
    qdrant::{
        value::Kind, Condition, FieldCondition, Filter, Match, ScrollPointsBuilder,
        SearchPointsBuilder,
    },
    Qdrant,
};
use std::collections::HashMap;
use std::sync::Arc;

use ticket_rag_core::{meta, Collection, TicketFilters};
use ticket_rag_config::constants::retrieval::SUBSTRING_FALLBACK_SCORE;

use crate::backend::{KeywordHit, KeywordResults, TicketBackend, VectorHit};
use crate::keyword_index::KeywordIndex;
use crate::StoreError;

/// Rows fetched for the substring-scan degradation
const SCAN_LIMIT: u32 = 512;

/// Qdrant back-end configuration
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Collections are named `{prefix}{collection}`
    pub collection_prefix: String,
}

/// Primary back-end
pub struct QdrantBackend {
    client: Qdrant,
    config: QdrantConfig,
    keyword_indices: HashMap<Collection, Arc<KeywordIndex>>,
}

impl QdrantBackend {
    pub fn new(config: QdrantConfig) -> Result<Self, StoreError> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            client,
            config,
            keyword_indices: HashMap::new(),
        })
    }

    /// Attach a lexical index for one collection.
    pub fn with_keyword_index(mut self, collection: Collection, index: Arc<KeywordIndex>) -> Self {
        self.keyword_indices.insert(collection, index);
        self
    }

    fn collection_name(&self, collection: Collection) -> String {
        Self::collection_name_for(&self.config.collection_prefix, collection)
    }

    fn collection_name_for(prefix: &str, collection: Collection) -> String {
        format!("{prefix}{}", collection.as_str())
    }

    fn build_filter(filters: &TicketFilters) -> Option<Filter> {
        if filters.is_empty() {
            return None;
        }

        let conditions: Vec<Condition> = filters
            .pairs()
            .into_iter()
            .map(|(column, value)| Condition {
                condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(
                    FieldCondition {
                        key: column.to_string(),
                        r#match: Some(Match {
                            match_value: Some(
                                qdrant_client::qdrant::r#match::MatchValue::Keyword(
                                    value.to_string(),
                                ),
                            ),
                        }),
                        ..Default::default()
                    },
                )),
            })
            .collect();

        Some(Filter {
            must: conditions,
            ..Default::default()
        })
    }

    fn payload_to_hit(
        payload: HashMap<String, qdrant_client::qdrant::Value>,
        collection: Collection,
    ) -> (String, HashMap<String, String>) {
        let mut content = String::new();
        let mut metadata = HashMap::new();

        for (k, v) in payload {
            if let Some(Kind::StringValue(s)) = v.kind {
                if k == "content" {
                    content = s;
                } else if k == "created" {
                    // Stored as `created` at ingest; contexts carry it
                    // under the timestamp key like the other back-ends.
                    metadata.insert(meta::TIMESTAMP.to_string(), s);
                } else {
                    metadata.insert(k, s);
                }
            }
        }
        metadata.insert("collection".to_string(), collection.as_str().to_string());

        (content, metadata)
    }
}

#[async_trait::async_trait]
impl TicketBackend for QdrantBackend {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn vector_search(
        &self,
        collection: Collection,
        query_embedding: &[f32],
        k: usize,
        threshold: f32,
        filters: &TicketFilters,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let mut builder = SearchPointsBuilder::new(
            self.collection_name(collection),
            query_embedding.to_vec(),
            k as u64,
        )
        .with_payload(true)
        .score_threshold(threshold);

        if let Some(filter) = Self::build_filter(filters) {
            builder = builder.filter(filter);
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let (content, metadata) = Self::payload_to_hit(point.payload, collection);
                VectorHit {
                    content,
                    metadata,
                    similarity: point.score.clamp(0.0, 1.0),
                }
            })
            .collect())
    }

    async fn keyword_search(
        &self,
        collection: Collection,
        query: &str,
        k: usize,
        filters: &TicketFilters,
    ) -> Result<KeywordResults, StoreError> {
        if let Some(index) = self.keyword_indices.get(&collection) {
            // Tantivy search is CPU-bound; keep it off the async workers.
            let index = Arc::clone(index);
            let query = query.to_string();
            let filters = filters.clone();
            let hits = tokio::task::spawn_blocking(move || index.search(&query, k, &filters))
                .await
                .map_err(|e| StoreError::Index(format!("keyword search task failed: {e}")))??;

            return Ok(KeywordResults {
                hits,
                used_index: true,
            });
        }

        tracing::warn!(
            collection = %collection,
            "no lexical index configured, degrading to substring scan"
        );

        let mut builder = ScrollPointsBuilder::new(self.collection_name(collection))
            .limit(SCAN_LIMIT)
            .with_payload(true);
        if let Some(filter) = Self::build_filter(filters) {
            builder = builder.filter(filter);
        }

        let response = self
            .client
            .scroll(builder)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        let needle = query.to_lowercase();
        let hits: Vec<KeywordHit> = response
            .result
            .into_iter()
            .filter_map(|point| {
                let (content, metadata) = Self::payload_to_hit(point.payload, collection);
                let title = metadata.get(meta::TITLE).cloned().unwrap_or_default();
                let haystack = format!("{title} {content}").to_lowercase();
                haystack.contains(&needle).then_some(KeywordHit {
                    content,
                    metadata,
                    rank: SUBSTRING_FALLBACK_SCORE,
                })
            })
            .take(k)
            .collect();

        Ok(KeywordResults {
            hits,
            used_index: false,
        })
    }

    async fn ready(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names_use_prefix() {
        assert_eq!(
            QdrantBackend::collection_name_for("tickets_", Collection::Bugs),
            "tickets_bugs"
        );
        assert_eq!(
            QdrantBackend::collection_name_for("tickets_", Collection::Releases),
            "tickets_releases"
        );
    }

    #[test]
    fn test_payload_created_maps_to_timestamp() {
        let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
        payload.insert("content".to_string(), "body".to_string().into());
        payload.insert(
            "created".to_string(),
            "2024-03-05T00:00:00Z".to_string().into(),
        );
        payload.insert("key".to_string(), "HBASE-1".to_string().into());

        let (content, metadata) = QdrantBackend::payload_to_hit(payload, Collection::Bugs);
        assert_eq!(content, "body");
        assert_eq!(metadata.get("timestamp").unwrap(), "2024-03-05T00:00:00Z");
        assert!(!metadata.contains_key("created"));
        assert_eq!(metadata.get("key").unwrap(), "HBASE-1");
        assert_eq!(metadata.get("collection").unwrap(), "bugs");
    }

    #[test]
    fn test_filter_built_only_when_set() {
        assert!(QdrantBackend::build_filter(&TicketFilters::default()).is_none());

        let filters = TicketFilters {
            project: Some("HBASE".to_string()),
            priority: Some("Blocker".to_string()),
            ..Default::default()
        };
        let filter = QdrantBackend::build_filter(&filters).unwrap();
        assert_eq!(filter.must.len(), 2);
    }
}

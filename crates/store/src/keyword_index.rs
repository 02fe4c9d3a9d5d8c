//! Keyword search using tantivy (BM25)
//!
//! The primary back-end's lexical index. One index directory per
//! collection, written by the ingestion collaborator; the engine opens it
//! read-mostly. The lexical text is `title + description`, matching the
//! ticket store's indexing contract; multi-word queries are conjunctive.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    query::{BooleanQuery, Occur, Query, QueryParser, TermQuery},
    schema::{Field, IndexRecordOption, OwnedValue, Schema, STORED, STRING, TEXT},
    Index, IndexReader, IndexWriter, TantivyDocument, Term,
};

use ticket_rag_core::{meta, Collection, Document, TicketFilters};

use crate::backend::KeywordHit;
use crate::StoreError;

/// BM25 index over one collection's tickets
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<Option<IndexWriter>>,
    collection: Collection,
    id_field: Field,
    key_field: Field,
    title_field: Field,
    description_field: Field,
    content_field: Field,
    project_field: Field,
    type_field: Field,
    status_field: Field,
    priority_field: Field,
    created_field: Field,
}

impl KeywordIndex {
    /// Open (or create) the index under `dir/{collection}`.
    pub fn open(dir: &Path, collection: Collection) -> Result<Self, StoreError> {
        let schema = Self::schema();
        let path = dir.join(collection.as_str());
        std::fs::create_dir_all(&path).map_err(|e| StoreError::Index(e.to_string()))?;

        let mmap = tantivy::directory::MmapDirectory::open(&path)
            .map_err(|e| StoreError::Index(e.to_string()))?;
        let index = Index::open_or_create(mmap, schema.clone())
            .map_err(|e| StoreError::Index(e.to_string()))?;

        Self::from_index(index, schema, collection)
    }

    /// In-memory index, used by tests and local runs.
    pub fn in_memory(collection: Collection) -> Result<Self, StoreError> {
        let schema = Self::schema();
        let index = Index::create_in_ram(schema.clone());
        Self::from_index(index, schema, collection)
    }

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("key", STRING | STORED);
        builder.add_text_field("title", TEXT | STORED);
        builder.add_text_field("description", TEXT | STORED);
        builder.add_text_field("content", STORED);
        builder.add_text_field("project", STRING | STORED);
        builder.add_text_field("type", STRING | STORED);
        builder.add_text_field("status", STRING | STORED);
        builder.add_text_field("priority", STRING | STORED);
        builder.add_text_field("created", STRING | STORED);
        builder.build()
    }

    fn from_index(index: Index, schema: Schema, collection: Collection) -> Result<Self, StoreError> {
        let get = |name: &str| {
            schema
                .get_field(name)
                .map_err(|e| StoreError::Index(e.to_string()))
        };

        let id_field = get("id")?;
        let key_field = get("key")?;
        let title_field = get("title")?;
        let description_field = get("description")?;
        let content_field = get("content")?;
        let project_field = get("project")?;
        let type_field = get("type")?;
        let status_field = get("status")?;
        let priority_field = get("priority")?;
        let created_field = get("created")?;

        let reader = index
            .reader()
            .map_err(|e| StoreError::Index(e.to_string()))?;
        let writer = index
            .writer(50_000_000)
            .map_err(|e| StoreError::Index(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(Some(writer)),
            collection,
            id_field,
            key_field,
            title_field,
            description_field,
            content_field,
            project_field,
            type_field,
            status_field,
            priority_field,
            created_field,
        })
    }

    /// Index ticket documents. Used by ingest tooling and tests.
    pub fn index_documents(&self, documents: &[Document]) -> Result<(), StoreError> {
        let mut guard = self.writer.write();
        let writer = guard
            .as_mut()
            .ok_or_else(|| StoreError::Index("writer not available".to_string()))?;

        for doc in documents {
            let mut t = TantivyDocument::default();
            t.add_text(self.id_field, &doc.jira_id);
            t.add_text(self.key_field, &doc.key);
            t.add_text(self.title_field, &doc.title);
            t.add_text(self.description_field, &doc.description);
            t.add_text(self.content_field, &doc.content);
            if let Some(ref v) = doc.project {
                t.add_text(self.project_field, v);
            }
            if let Some(ref v) = doc.issue_type {
                t.add_text(self.type_field, v);
            }
            if let Some(ref v) = doc.status {
                t.add_text(self.status_field, v);
            }
            if let Some(ref v) = doc.priority {
                t.add_text(self.priority_field, v);
            }
            if let Some(created) = doc.created {
                t.add_text(self.created_field, created.to_rfc3339());
            }
            writer
                .add_document(t)
                .map_err(|e| StoreError::Index(e.to_string()))?;
        }

        writer
            .commit()
            .map_err(|e| StoreError::Index(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| StoreError::Index(e.to_string()))?;
        Ok(())
    }

    /// BM25 search over title + description, conjunctive across terms.
    pub fn search(
        &self,
        query: &str,
        k: usize,
        filters: &TicketFilters,
    ) -> Result<Vec<KeywordHit>, StoreError> {
        let searcher = self.reader.searcher();

        let mut parser =
            QueryParser::for_index(&self.index, vec![self.title_field, self.description_field]);
        parser.set_conjunction_by_default();
        let text_query = parser
            .parse_query(query)
            .map_err(|e| StoreError::Index(e.to_string()))?;

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query)];
        for (column, value) in filters.pairs() {
            let field = match column {
                "project" => self.project_field,
                "type" => self.type_field,
                "status" => self.status_field,
                _ => self.priority_field,
            };
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(field, value),
                    IndexRecordOption::Basic,
                )),
            ));
        }
        let combined = BooleanQuery::new(clauses);

        let top_docs = searcher
            .search(&combined, &TopDocs::with_limit(k.max(1)))
            .map_err(|e| StoreError::Index(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| StoreError::Index(e.to_string()))?;

            let text = |field: Field| -> Option<String> {
                doc.get_first(field).and_then(|v| match v {
                    OwnedValue::Str(s) => Some(s.clone()),
                    _ => None,
                })
            };

            let title = text(self.title_field).unwrap_or_default();
            let description = text(self.description_field).unwrap_or_default();
            let content = text(self.content_field)
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| format!("{title}\n{description}"));

            let mut metadata = HashMap::new();
            if let Some(key) = text(self.key_field) {
                metadata.insert(meta::KEY.to_string(), key);
            }
            metadata.insert(meta::TITLE.to_string(), title);
            metadata.insert("collection".to_string(), self.collection.as_str().to_string());
            if let Some(project) = text(self.project_field) {
                metadata.insert(meta::PROJECT.to_string(), project);
            }
            if let Some(status) = text(self.status_field) {
                metadata.insert("status".to_string(), status);
            }
            if let Some(created) = text(self.created_field) {
                metadata.insert(meta::TIMESTAMP.to_string(), created);
            }

            hits.push(KeywordHit {
                content,
                metadata,
                rank: score,
            });
        }

        Ok(hits)
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(key: &str, title: &str, description: &str, project: &str) -> Document {
        Document {
            jira_id: key.to_string(),
            key: key.to_string(),
            project: Some(project.to_string()),
            project_name: None,
            priority: None,
            issue_type: Some("Bug".to_string()),
            status: Some("Open".to_string()),
            component: None,
            version: None,
            reporter: None,
            assignee: None,
            created: None,
            resolved: None,
            updated: None,
            title: title.to_string(),
            description: description.to_string(),
            content: format!("{title} {description}"),
            embedding: None,
        }
    }

    #[test]
    fn test_index_and_search() {
        let index = KeywordIndex::in_memory(Collection::Bugs).unwrap();
        index
            .index_documents(&[
                doc("HBASE-1", "Region server timeout", "scan requests time out", "HBASE"),
                doc("SPARK-2", "Executor out of memory", "OOM during shuffle", "SPARK"),
            ])
            .unwrap();
        assert_eq!(index.doc_count(), 2);

        let hits = index
            .search("region timeout", 10, &TicketFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.get("key").unwrap(), "HBASE-1");
        assert!(hits[0].rank > 0.0);
    }

    #[test]
    fn test_conjunctive_terms() {
        let index = KeywordIndex::in_memory(Collection::Bugs).unwrap();
        index
            .index_documents(&[
                doc("A-1", "timeout in scanner", "", "A"),
                doc("A-2", "memory pressure", "", "A"),
            ])
            .unwrap();

        // Both terms must match; "timeout memory" matches neither doc.
        let hits = index
            .search("timeout memory", 10, &TicketFilters::default())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_filter_by_project() {
        let index = KeywordIndex::in_memory(Collection::Releases).unwrap();
        index
            .index_documents(&[
                doc("HBASE-1", "release notes timeout fix", "", "HBASE"),
                doc("SPARK-9", "release notes timeout fix", "", "SPARK"),
            ])
            .unwrap();

        let filters = TicketFilters {
            project: Some("SPARK".to_string()),
            ..Default::default()
        };
        let hits = index.search("timeout", 10, &filters).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.get("key").unwrap(), "SPARK-9");
    }
}

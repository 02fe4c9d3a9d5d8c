//! Ticket document model and collections
//!
//! Documents are created by the ingestion collaborator and immutable from
//! the engine's perspective; the engine only reads them back out of the
//! ticket store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The two logically identical ticket collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Bugs,
    Releases,
}

impl Collection {
    /// Every collection, in fusion tie-break order.
    pub const ALL: [Collection; 2] = [Collection::Bugs, Collection::Releases];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Bugs => "bugs",
            Collection::Releases => "releases",
        }
    }

    /// Backing table name in the relational store.
    pub fn table_name(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ticket record as stored in either collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub jira_id: String,
    pub key: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, rename = "type")]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub reporter: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Concatenated retrieval text derived at ingest time
    #[serde(default)]
    pub content: String,
    /// Embedding of `content`, dimension fixed per deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    /// Metadata map for a retrieved context built from this document.
    pub fn context_metadata(&self, collection: Collection) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert(crate::context::meta::KEY.to_string(), self.key.clone());
        m.insert(crate::context::meta::TITLE.to_string(), self.title.clone());
        m.insert("collection".to_string(), collection.as_str().to_string());
        if let Some(ref project) = self.project {
            m.insert(crate::context::meta::PROJECT.to_string(), project.clone());
        }
        if let Some(ref status) = self.status {
            m.insert("status".to_string(), status.clone());
        }
        if let Some(created) = self.created {
            m.insert(
                crate::context::meta::TIMESTAMP.to_string(),
                created.to_rfc3339(),
            );
        }
        m
    }
}

/// Equality filters accepted by every ticket store operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketFilters {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

impl TicketFilters {
    pub fn is_empty(&self) -> bool {
        self.project.is_none()
            && self.issue_type.is_none()
            && self.status.is_none()
            && self.priority.is_none()
    }

    /// `(column, value)` pairs for the filters that are set.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(ref v) = self.project {
            out.push(("project", v.as_str()));
        }
        if let Some(ref v) = self.issue_type {
            out.push(("type", v.as_str()));
        }
        if let Some(ref v) = self.status {
            out.push(("status", v.as_str()));
        }
        if let Some(ref v) = self.priority {
            out.push(("priority", v.as_str()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::Bugs.table_name(), "bugs");
        assert_eq!(Collection::Releases.to_string(), "releases");
        assert_eq!(Collection::ALL.len(), 2);
    }

    #[test]
    fn test_filters_pairs() {
        let f = TicketFilters {
            project: Some("HBASE".into()),
            status: Some("Open".into()),
            ..Default::default()
        };
        assert!(!f.is_empty());
        assert_eq!(f.pairs(), vec![("project", "HBASE"), ("status", "Open")]);
    }

    #[test]
    fn test_document_context_metadata() {
        let doc = Document {
            jira_id: "1".into(),
            key: "SPARK-100".into(),
            project: Some("SPARK".into()),
            project_name: None,
            priority: None,
            issue_type: None,
            status: Some("Resolved".into()),
            component: None,
            version: None,
            reporter: None,
            assignee: None,
            created: None,
            resolved: None,
            updated: None,
            title: "Executor OOM".into(),
            description: String::new(),
            content: String::new(),
            embedding: None,
        };

        let m = doc.context_metadata(Collection::Bugs);
        assert_eq!(m.get("key").unwrap(), "SPARK-100");
        assert_eq!(m.get("collection").unwrap(), "bugs");
        assert_eq!(m.get("project").unwrap(), "SPARK");
    }
}

//! Strategy capability trait
//!
//! Five strategies satisfy a single capability: `run(query, hints, k)`.
//! This is polymorphism over a capability set, not inheritance; strategies
//! are independently testable and swappable behind `Arc<dyn ...>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::context::RetrievedContext;
use crate::plan::{QueryHints, StrategyKind};
use crate::Error;

/// Per-invocation facts a strategy reports alongside its contexts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalMetadata {
    /// Sub-methods that produced results, e.g. `multi_query`, `keyword`
    #[serde(default)]
    pub methods_used: Vec<String>,
    /// Result count per sub-method
    #[serde(default)]
    pub result_counts: HashMap<String, usize>,
    #[serde(default)]
    pub reranker_used: bool,
    #[serde(default)]
    pub keyword_index_used: bool,
    #[serde(default)]
    pub filters_applied: bool,
    /// Degradation messages; the request still succeeds with these present
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RetrievalMetadata {
    pub fn record_method(&mut self, method: impl Into<String>, count: usize) {
        let method = method.into();
        self.result_counts.insert(method.clone(), count);
        self.methods_used.push(method);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Fold another invocation's metadata into this one.
    pub fn merge(&mut self, other: RetrievalMetadata) {
        self.methods_used.extend(other.methods_used);
        self.result_counts.extend(other.result_counts);
        self.reranker_used |= other.reranker_used;
        self.keyword_index_used |= other.keyword_index_used;
        self.filters_applied |= other.filters_applied;
        self.warnings.extend(other.warnings);
    }
}

/// What a strategy invocation returns
#[derive(Debug, Clone, Default)]
pub struct StrategyOutput {
    pub contexts: Vec<RetrievedContext>,
    pub metadata: RetrievalMetadata,
}

/// The retrieval capability
///
/// Implementations receive a read-only view of the inputs and return
/// freshly allocated context lists; they hold no per-request state and must
/// be safe for concurrent use.
#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Execute the strategy. An empty context list is success, not error;
    /// only total sub-retrieval failure raises `Error::StrategyFailed`.
    async fn run(&self, query: &str, hints: &QueryHints, k: usize)
        -> Result<StrategyOutput, Error>;

    /// Whether the back-ends this strategy depends on are reachable.
    async fn ready(&self) -> bool {
        true
    }
}

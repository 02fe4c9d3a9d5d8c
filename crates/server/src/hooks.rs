//! Request hooks
//!
//! The single seam toward the authentication/quota/audit collaborators:
//! one pre-request hook that may reject or annotate, one post-request hook
//! that records. The default implementation does nothing.

use async_trait::async_trait;
use axum::http::HeaderMap;

/// Rejection issued by the pre-request hook
#[derive(Debug, Clone)]
pub struct HookRejection {
    /// 401, 403, or 429
    pub status: u16,
    pub message: String,
}

/// Facts handed to the post-request hook
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub request_id: String,
    pub query: String,
    pub routing_decision: String,
    pub status: u16,
    pub total_processing_time: f64,
}

/// Pre/post request collaborator seam
#[async_trait]
pub trait RequestHooks: Send + Sync {
    /// Reject (401/403/429) or annotate an incoming request.
    async fn pre(&self, headers: &HeaderMap, query: &str) -> Result<(), HookRejection>;

    /// Record a completed request.
    async fn post(&self, summary: RequestSummary);
}

/// Default no-op hooks
pub struct NoopHooks;

#[async_trait]
impl RequestHooks for NoopHooks {
    async fn pre(&self, _headers: &HeaderMap, _query: &str) -> Result<(), HookRejection> {
        Ok(())
    }

    async fn post(&self, summary: RequestSummary) {
        tracing::debug!(
            request_id = %summary.request_id,
            status = summary.status,
            "request completed"
        );
    }
}

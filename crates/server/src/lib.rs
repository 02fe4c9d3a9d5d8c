//! HTTP server for the ticket RAG engine
//!
//! Routes, shared state, request hooks, health reporting, and Prometheus
//! metrics. Authentication, quotas, and audit logging are collaborators
//! behind the pre/post request hooks; the engine itself never depends on a
//! user identity.

pub mod health;
pub mod hooks;
pub mod http;
pub mod metrics;
pub mod state;

pub use health::{HealthRegistry, HealthReport};
pub use hooks::{HookRejection, NoopHooks, RequestHooks, RequestSummary};
pub use http::create_router;
pub use metrics::init_metrics;
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("startup error: {0}")]
    Startup(String),

    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),
}

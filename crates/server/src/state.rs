//! Application state
//!
//! Shared across all handlers. Everything here is long-lived, Arc'ed, and
//! safe for concurrent use; per-request state lives inside the workflow.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use ticket_rag_agent::Workflow;
use ticket_rag_config::Settings;

use crate::health::HealthRegistry;
use crate::hooks::{NoopHooks, RequestHooks};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub workflow: Arc<Workflow>,
    pub health: Arc<HealthRegistry>,
    pub hooks: Arc<dyn RequestHooks>,
    pub metrics: PrometheusHandle,
}

impl AppState {
    pub fn new(
        settings: Settings,
        workflow: Arc<Workflow>,
        health: Arc<HealthRegistry>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            workflow,
            health,
            hooks: Arc::new(NoopHooks),
            metrics,
        }
    }

    /// Swap in the auth/quota/audit collaborator.
    pub fn with_hooks(mut self, hooks: Arc<dyn RequestHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

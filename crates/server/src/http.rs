//! HTTP endpoints

use axum::{
    extract::{Json, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use ticket_rag_core::QueryHints;

use crate::hooks::RequestSummary;
use crate::metrics::metrics_handler;
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    Router::new()
        .route("/multiagent-rag", post(multiagent_rag))
        .route("/debug/routing", post(debug_routing))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("invalid CORS origin: {origin}");
                None
            })
        })
        .collect();

    if parsed.is_empty() {
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Request body for /multiagent-rag and /debug/routing
#[derive(Debug, Deserialize)]
pub struct RagRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub user_can_wait: bool,
    #[serde(default)]
    pub production_incident: bool,
}

impl RagRequest {
    fn hints(&self) -> QueryHints {
        QueryHints {
            user_can_wait: self.user_can_wait,
            production_incident: self.production_incident,
        }
    }

    /// The validated, non-empty query.
    fn validated_query(&self) -> Result<&str, ErrorBody> {
        match self.query.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => Ok(self.query.as_deref().unwrap()),
            _ => Err(ErrorBody {
                error: "query is required and must be non-empty".to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// POST /multiagent-rag
async fn multiagent_rag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RagRequest>,
) -> Response {
    let query = match request.validated_query() {
        Ok(query) => query.to_string(),
        Err(body) => return (StatusCode::BAD_REQUEST, Json(body)).into_response(),
    };

    // Auth/quota collaborator; 401/403/429 come from here.
    if let Err(rejection) = state.hooks.pre(&headers, &query).await {
        let status =
            StatusCode::from_u16(rejection.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (
            status,
            Json(ErrorBody {
                error: rejection.message,
            }),
        )
            .into_response();
    }

    let request_id = Uuid::new_v4().to_string();
    let hints = request.hints();
    let response = state.workflow.run(&query, hints, None).await;

    // Retrieval-confined failures compose a 200; only a fully unreachable
    // retrieval tier is a 503.
    let retrieval_collapsed = response.retrieval_metadata.fallback_used
        && response.retrieved_contexts.is_empty()
        && response.messages.iter().any(|m| m.kind == "error");
    let status = if retrieval_collapsed && !state.workflow.any_strategy_ready().await {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    state
        .hooks
        .post(RequestSummary {
            request_id,
            query,
            routing_decision: response.routing_decision.clone(),
            status: status.as_u16(),
            total_processing_time: response.total_processing_time,
        })
        .await;

    if status == StatusCode::SERVICE_UNAVAILABLE {
        return (
            status,
            Json(ErrorBody {
                error: "no retrieval back-end is reachable".to_string(),
            }),
        )
            .into_response();
    }

    (status, Json(response)).into_response()
}

/// Response body for /debug/routing
#[derive(Debug, Serialize)]
struct RoutingResponse {
    routing_decision: String,
    routing_reasoning: String,
}

/// POST /debug/routing
async fn debug_routing(
    State(state): State<AppState>,
    Json(request): Json<RagRequest>,
) -> Response {
    let query = match request.validated_query() {
        Ok(query) => query.to_string(),
        Err(body) => return (StatusCode::BAD_REQUEST, Json(body)).into_response(),
    };

    let plan = state.workflow.route_only(&query, &request.hints()).await;
    Json(RoutingResponse {
        routing_decision: plan.strategy.as_str().to_string(),
        routing_reasoning: plan.rationale,
    })
    .into_response()
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Response {
    let report = state.health.report(&state.workflow).await;
    let status = if report.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

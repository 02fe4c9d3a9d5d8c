//! Ticket RAG server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use ticket_rag_agent::{ResponseWriter, Supervisor, Workflow, WorkflowConfig};
use ticket_rag_config::{load_settings, Settings, StoreBackendKind};
use ticket_rag_core::{Collection, RetrievalStrategy};
use ticket_rag_llm::{build_tiers, LlmTiers};
use ticket_rag_retrieval::{
    logstore::HttpLogStoreConfig, reranker::HttpRerankerConfig, websearch::TavilyConfig,
    Bm25Strategy, CompressionStrategy, EnsembleStrategy, HttpLogStore, HttpReranker,
    LogSearchConfig, LogSearchStrategy, LogStore, Reranker, TavilyClient, WebSearchConfig,
    WebSearchStrategy, WebSearchProvider,
};
use ticket_rag_store::{
    client::TicketStoreConfig, postgres::PostgresConfig, qdrant::QdrantConfig, EmbeddingClient,
    EmbeddingConfig, KeywordIndex, PostgresBackend, QdrantBackend, TicketBackend, TicketStore,
};

use ticket_rag_server::{create_router, init_metrics, AppState, HealthRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("TICKET_RAG_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized, use eprintln for early logging
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::info!("Starting ticket RAG server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?settings.environment,
        config = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    let metrics_handle = init_metrics();
    tracing::info!("Initialized Prometheus metrics at /metrics");

    // Embedding client. A missing key for a remote endpoint is fatal: every
    // vector path depends on it.
    let embedding_config = EmbeddingConfig::from_settings(&settings.embedding);
    if embedding_config.api_key.is_empty()
        && !settings.embedding.endpoint.starts_with("http://localhost")
    {
        return Err(format!(
            "fatal: env var {} is not set for the embedding provider",
            settings.embedding.api_key_env
        )
        .into());
    }
    let embedder = Arc::new(EmbeddingClient::new(embedding_config)?);

    let store = Arc::new(build_ticket_store(&settings, Arc::clone(&embedder)).await?);

    // LLM tiers; missing credentials are fatal, both planners and the
    // response writer depend on them.
    let llm: LlmTiers = build_tiers(&settings.llm)?;

    let reranker = build_reranker(&settings);

    let web_provider: Arc<dyn WebSearchProvider> = Arc::new(TavilyClient::new(TavilyConfig {
        endpoint: settings.web.endpoint.clone(),
        api_key: read_key(&settings.web.api_key_env, "web search"),
        timeout: Duration::from_millis(settings.web.timeout_ms),
    })?);

    let log_store: Arc<dyn LogStore> = Arc::new(HttpLogStore::new(HttpLogStoreConfig {
        endpoint: settings.logs.endpoint.clone(),
        api_key: read_key(&settings.logs.api_key_env, "log store"),
        timeout: Duration::from_secs(10),
    })?);

    // Strategies
    let mut compression = CompressionStrategy::new(Arc::clone(&store));
    if let Some(ref reranker) = reranker {
        compression = compression.with_reranker(Arc::clone(reranker));
    }
    let fallback: Arc<dyn RetrievalStrategy> = Arc::new(compression.degraded());

    let mut ensemble = EnsembleStrategy::new(Arc::clone(&store), llm.fast.clone());
    if let Some(ref reranker) = reranker {
        ensemble = ensemble.with_reranker(Arc::clone(reranker));
    }

    let web_strategy = WebSearchStrategy::new(
        Arc::clone(&web_provider),
        llm.fast.clone(),
        WebSearchConfig {
            max_searches: settings.web.max_searches,
            fanout: settings.retrieval.fanout,
            timeout: Duration::from_millis(settings.web.timeout_ms),
            max_results: settings.web.max_results,
        },
    );

    let log_strategy = LogSearchStrategy::new(
        Arc::clone(&log_store),
        llm.fast.clone(),
        LogSearchConfig {
            max_searches: settings.logs.max_searches,
            fanout: settings.retrieval.fanout,
            default_window_hours: settings.logs.default_window_hours,
            incident_window_hours: settings.logs.incident_window_hours,
            exception_catalogue: settings.logs.exception_types.clone(),
            per_query_limit: settings.retrieval.default_top_k * 2,
        },
    );

    let mut supervisor = Supervisor::new();
    if settings.workflow.supervisor_llm_enabled {
        supervisor = supervisor.with_classifier(llm.strong.clone());
    }

    let workflow = Arc::new(
        Workflow::new(
            supervisor,
            ResponseWriter::new(llm.strong.clone()),
            fallback,
            WorkflowConfig::from_settings(&settings.workflow, settings.retrieval.default_top_k),
        )
        .with_strategy(Arc::new(Bm25Strategy::new(Arc::clone(&store))))
        .with_strategy(Arc::new(compression))
        .with_strategy(Arc::new(ensemble))
        .with_strategy(Arc::new(web_strategy))
        .with_strategy(Arc::new(log_strategy)),
    );

    let health = Arc::new(HealthRegistry::new(
        embedder,
        store,
        web_provider,
        log_store,
        llm,
    ));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let state = AppState::new(settings, workflow, health, metrics_handle);
    let router = create_router(state);

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the back-end chain per the configured mode: `auto` tries primary
/// first and degrades to fallback per call.
async fn build_ticket_store(
    settings: &Settings,
    embedder: Arc<EmbeddingClient>,
) -> Result<TicketStore, Box<dyn std::error::Error>> {
    let mut backends: Vec<Arc<dyn TicketBackend>> = Vec::new();
    let mode = settings.store.backend;

    if matches!(mode, StoreBackendKind::Primary | StoreBackendKind::Auto) {
        let mut primary = QdrantBackend::new(QdrantConfig {
            endpoint: settings.store.primary.endpoint.clone(),
            api_key: std::env::var(&settings.store.primary.api_key_env).ok(),
            collection_prefix: settings.store.primary.collection_prefix.clone(),
        })?;

        if let Some(ref dir) = settings.store.primary.keyword_index_dir {
            for collection in Collection::ALL {
                match KeywordIndex::open(std::path::Path::new(dir), collection) {
                    Ok(index) => {
                        primary = primary.with_keyword_index(collection, Arc::new(index));
                    }
                    Err(e) => {
                        tracing::warn!(
                            %collection,
                            error = %e,
                            "keyword index unavailable; keyword search will degrade"
                        );
                    }
                }
            }
        } else {
            tracing::warn!("no keyword index dir configured; keyword search will degrade");
        }

        backends.push(Arc::new(primary));
        tracing::info!(endpoint = %settings.store.primary.endpoint, "primary ticket back-end configured");
    }

    if matches!(mode, StoreBackendKind::Fallback | StoreBackendKind::Auto) {
        match std::env::var(&settings.store.fallback.database_url_env) {
            Ok(url) if !url.is_empty() => {
                match PostgresBackend::connect(PostgresConfig {
                    database_url: url,
                    acquire_timeout: Duration::from_millis(
                        settings.store.fallback.statement_timeout_ms,
                    ),
                    candidate_multiplier: settings.store.fallback.candidate_multiplier,
                })
                .await
                {
                    Ok(backend) => {
                        backends.push(Arc::new(backend));
                        tracing::info!("fallback ticket back-end configured");
                    }
                    Err(e) if mode == StoreBackendKind::Auto => {
                        tracing::warn!(error = %e, "fallback back-end unreachable, continuing with primary only");
                    }
                    Err(e) => return Err(format!("fatal: fallback back-end: {e}").into()),
                }
            }
            _ if mode == StoreBackendKind::Auto => {
                tracing::warn!(
                    env = %settings.store.fallback.database_url_env,
                    "no database url set, continuing with primary only"
                );
            }
            _ => {
                return Err(format!(
                    "fatal: env var {} is not set for the fallback ticket store",
                    settings.store.fallback.database_url_env
                )
                .into());
            }
        }
    }

    if backends.is_empty() {
        return Err("fatal: no ticket store back-end could be configured".into());
    }

    Ok(TicketStore::new(
        backends,
        embedder,
        TicketStoreConfig {
            similarity_threshold: settings.store.similarity_threshold,
            vector_weight: settings.retrieval.vector_weight,
            keyword_weight: settings.retrieval.keyword_weight,
        },
    ))
}

fn build_reranker(settings: &Settings) -> Option<Arc<dyn Reranker>> {
    let reranker = &settings.retrieval.reranker;
    if !reranker.enabled {
        return None;
    }
    let Some(ref endpoint) = reranker.endpoint else {
        tracing::warn!("reranker enabled but no endpoint configured, disabling");
        return None;
    };

    match HttpReranker::new(HttpRerankerConfig {
        endpoint: endpoint.clone(),
        api_key: read_key(&reranker.api_key_env, "reranker"),
        model: reranker.model.clone(),
        timeout: Duration::from_millis(reranker.timeout_ms),
    }) {
        Ok(reranker) => Some(Arc::new(reranker)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to build reranker, disabling");
            None
        }
    }
}

/// Read an API key env var; absence degrades the subsystem rather than
/// failing startup, and /health will report it unready.
fn read_key(env_var: &str, subsystem: &str) -> String {
    match std::env::var(env_var) {
        Ok(key) if !key.is_empty() => key,
        _ => {
            tracing::warn!(env = %env_var, "{subsystem} key not set; calls will fail until provided");
            String::new()
        }
    }
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ticket_rag=debug"));

    if settings.environment.is_production() {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_filter(filter))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(filter))
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}

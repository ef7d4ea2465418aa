//! HTTP trigger surface (spec §6): thin axum handlers over
//! [`run_source_pipeline`](crate::pipeline::run_source_pipeline) and
//! [`run_dedup_pass`](crate::dedup::run_dedup_pass) — no route contains
//! business logic. This is the surface a scheduler (cron, Cloud Scheduler,
//! etc.) calls; the dashboard/visualization layer is an external
//! collaborator and is not part of this crate.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::SourceConfig;
use crate::dedup::{self, DEFAULT_LOOKBACK_HOURS};
use crate::models::Source;
use crate::pipeline;
use crate::store::{AuditSink, DeadLetterSink, RawEventSink, UnifiedStore};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Per spec §6: presence selects a per-source ingestion service (the
    /// `/ingest` route defaults to this source when the query string omits
    /// one); absence means this instance only serves `/deduplicate` and
    /// `/health` meaningfully, though `/ingest?source=...` still works.
    pub source_name: Option<Source>,
}

/// Shared application state: one HTTP client and the four store traits,
/// handed to every request.
#[derive(Clone)]
pub struct AppState {
    http: Client,
    raw_sink: Arc<dyn RawEventSink>,
    dead_letter_sink: Arc<dyn DeadLetterSink>,
    audit_sink: Arc<dyn AuditSink>,
    unified_store: Arc<dyn UnifiedStore>,
    source_name: Option<Source>,
}

impl AppState {
    #[must_use]
    pub fn new(
        http: Client,
        raw_sink: Arc<dyn RawEventSink>,
        dead_letter_sink: Arc<dyn DeadLetterSink>,
        audit_sink: Arc<dyn AuditSink>,
        unified_store: Arc<dyn UnifiedStore>,
        source_name: Option<Source>,
    ) -> Self {
        Self {
            http,
            raw_sink,
            dead_letter_sink,
            audit_sink,
            unified_store,
            source_name,
        }
    }
}

/// Create the Axum router with all routes.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(ingest_handler))
        .route("/deduplicate", post(deduplicate_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Start the HTTP trigger server.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn run_server(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("quake-unify trigger surface listening at http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct IngestQuery {
    source: Option<String>,
}

/// `POST /ingest?source=<name>` → `200 {run_id, source, raw_events,
/// dead_letters, duration_s}` or `500 {error}` (spec §6).
async fn ingest_handler(
    State(state): State<AppState>,
    Query(params): Query<IngestQuery>,
) -> impl IntoResponse {
    let source_str = params
        .source
        .or_else(|| state.source_name.map(|s| s.to_string()));

    let Some(source_str) = source_str else {
        return error_response("missing `source` query parameter and no SOURCE_NAME configured");
    };

    let source: Source = match source_str.parse() {
        Ok(s) => s,
        Err(e) => return error_response(&e),
    };

    let config = SourceConfig::default_for(source);
    match pipeline::run_source_pipeline(
        source,
        &state.http,
        &config,
        &state.raw_sink,
        &state.dead_letter_sink,
        &state.audit_sink,
    )
    .await
    {
        Ok(report) => Json(serde_json::to_value(report).unwrap_or_default()).into_response(),
        Err(e) => error_response(&e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct DeduplicateQuery {
    lookback_hours: Option<i64>,
}

/// `POST /deduplicate?lookback_hours=<n>` → `200 {clusters, unified_events,
/// multi_source_clusters, duration_s}` or `500 {error}` (spec §6).
async fn deduplicate_handler(
    State(state): State<AppState>,
    Query(params): Query<DeduplicateQuery>,
) -> impl IntoResponse {
    let lookback_hours = params.lookback_hours.unwrap_or(DEFAULT_LOOKBACK_HOURS);

    match dedup::run_dedup_pass(lookback_hours, &state.raw_sink, &state.unified_store).await {
        Ok(report) => Json(serde_json::to_value(report).unwrap_or_default()).into_response(),
        Err(e) => error_response(&e.to_string()),
    }
}

/// `GET /health` → `200 {status: "ok", source?: <name>}` (spec §6).
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "source": state.source_name.map(|s| s.to_string()),
    }))
}

fn error_response(message: &str) -> axum::response::Response {
    (
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

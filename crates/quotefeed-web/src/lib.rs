//! Axum trigger surface + Askama listing page for quotefeed.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use quotefeed_core::QuoteCollection;
use quotefeed_storage::StoreError;
use quotefeed_sync::{OneShotSchedule, PipelineError, ScrapeConfig, ScrapePipeline};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "quotefeed-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ScrapePipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<ScrapePipeline>) -> Self {
        Self { pipeline }
    }
}

#[derive(Debug, Clone, Serialize)]
struct QuotesBody {
    count: usize,
    quotes: QuoteCollection,
}

#[derive(Debug, Clone)]
struct QuoteRow {
    text: String,
    author: String,
    tags_text: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    total: usize,
    running: bool,
    quotes: Vec<QuoteRow>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/scrape", get(scrape_handler).post(scrape_handler))
        .route("/quotes", get(quotes_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(Arc::new(state))
}

/// Serve the trigger surface and arm the optional one-shot schedule, until
/// Ctrl-C.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("QUOTEFEED_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let config = ScrapeConfig::from_env();
    let pipeline = Arc::new(ScrapePipeline::from_config(&config)?);
    let schedule = OneShotSchedule::arm_from_config(&config, pipeline.clone()).await;

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, store = %config.store_path.display(), "quotefeed web listening");
    axum::serve(listener, app(AppState::new(pipeline)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(schedule) = schedule {
        if let Err(err) = schedule.shutdown().await {
            warn!(error = %err, "failed to disarm scheduled scrape");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "listening for shutdown signal");
    }
    info!("shutdown requested");
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.store().read().await {
        Ok(quotes) => {
            let rows = quotes
                .into_iter()
                .map(|q| QuoteRow {
                    tags_text: q.tags.iter().cloned().collect::<Vec<_>>().join(", "),
                    text: q.text,
                    author: q.author,
                })
                .collect::<Vec<_>>();
            render_html(IndexTemplate {
                total: rows.len(),
                running: state.pipeline.is_running(),
                quotes: rows,
            })
        }
        Err(err) => server_error(err.into()),
    }
}

async fn scrape_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.run_once().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => pipeline_error(err),
    }
}

async fn quotes_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.store().read().await {
        Ok(quotes) => Json(QuotesBody {
            count: quotes.len(),
            quotes,
        })
        .into_response(),
        Err(err) => store_error(err),
    }
}

fn pipeline_error(err: PipelineError) -> Response {
    let status = match &err {
        PipelineError::AlreadyRunning => {
            info!("manual scrape rejected; a run is already in progress");
            StatusCode::CONFLICT
        }
        PipelineError::Fetch(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status != StatusCode::CONFLICT {
        error!(error = %err, "manual scrape failed");
    }
    json_error(status, err.to_string())
}

fn store_error(err: StoreError) -> Response {
    error!(error = %err, "reading quote store");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn json_error(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

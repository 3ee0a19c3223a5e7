use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::gateway::Gateway;
use crate::{cache, pipeline, xmltv};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/", get(root))
        .route("/epg.xml", get(epg_xml))
        .route("/cache", get(cache_status).delete(cache_clear))
        .with_state(state)
}

pub async fn run(config: Config, pool: SqlitePool) -> Result<()> {
    let config = Arc::new(config);
    let cancel = CancellationToken::new();

    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding to {}", config.server.listen))?;

    info!(listen = %config.server.listen, "HTTP server listening");

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                server_cancel.cancelled().await;
            })
            .await
    });

    wait_for_shutdown().await;
    info!("shutdown signal received");
    cancel.cancel();

    let shutdown_timeout = std::time::Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, server_handle).await;

    pool.close().await;
    info!("shutdown complete");

    Ok(())
}

async fn healthcheck() -> Response {
    axum::Json(json!({"status": "ok"})).into_response()
}

/// Root endpoint: JSON status for API clients, HTML dashboard for browsers.
async fn root(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"));

    if wants_json {
        return match cache::status(&state.pool).await {
            Ok(chunks) => {
                let size_bytes: i64 = chunks.iter().map(|c| c.size_bytes).sum();
                axum::Json(json!({
                    "status": "online",
                    "cache_entries": chunks.len(),
                    "cache_size_bytes": size_bytes,
                    "chunks": chunks,
                }))
                .into_response()
            }
            Err(e) => {
                warn!(error = %e, "failed to read cache status");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    axum::Json(json!({"status": "error", "message": e.to_string()})),
                )
                    .into_response()
            }
        };
    }

    Html(dashboard_html(&state.config)).into_response()
}

async fn epg_xml(State(state): State<AppState>) -> Response {
    info!("received request for epg.xml");

    let mut gateway = match Gateway::new(&state.config) {
        Ok(g) => g,
        Err(e) => return pipeline_error(e.into()),
    };

    let pool = state.config.cache.enabled.then_some(&state.pool);
    let guide = match pipeline::assemble_guide(
        &mut gateway,
        pool,
        state.config.guide.days,
        state.config.guide.hours,
        state.config.cache_ttl(),
    )
    .await
    {
        Ok(guide) => guide,
        Err(e) => return pipeline_error(e.into()),
    };

    if !guide.is_complete() {
        warn!(
            merged = guide.windows_merged,
            expected = guide.windows_expected,
            "serving incomplete guide"
        );
    }

    let xml = xmltv::render(&guide, state.config.timezone());
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

fn pipeline_error(e: anyhow::Error) -> Response {
    warn!(error = %e, "error generating EPG");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Error generating EPG: {e}"),
    )
        .into_response()
}

async fn cache_status(State(state): State<AppState>) -> Response {
    match cache::status(&state.pool).await {
        Ok(chunks) => axum::Json(chunks).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to read cache status");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

async fn cache_clear(State(state): State<AppState>) -> Response {
    info!("received request to clear cache");
    match cache::clear(&state.pool).await {
        Ok(()) => axum::Json(json!({"status": "success", "message": "Cache cleared"})).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to clear cache");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error clearing cache: {e}"),
            )
                .into_response()
        }
    }
}

fn dashboard_html(config: &Config) -> String {
    let rows = [
        ("tuner.host", config.tuner.host.clone()),
        ("tuner.guide_api_url", config.tuner.guide_api_url.clone()),
        ("guide.days", config.guide.days.to_string()),
        ("guide.hours", config.guide.hours.to_string()),
        ("guide.timezone", config.guide.timezone.clone()),
        ("cache.enabled", config.cache.enabled.to_string()),
        ("cache.path", config.cache.path.display().to_string()),
        ("cache.ttl", config.cache.ttl.clone()),
        ("server.listen", config.server.listen.clone()),
    ]
    .into_iter()
    .map(|(name, value)| {
        format!(
            "<tr><td>{}</td><td>{}</td></tr>",
            quick_xml::escape::escape(name),
            quick_xml::escape::escape(value.as_str())
        )
    })
    .collect::<String>();

    format!(
        "<!DOCTYPE html>\n<html><head><title>HDHomeRun EPG Status</title></head>\n\
         <body><h1>HDHomeRun EPG Status</h1>\n\
         <p><a href=\"/epg.xml\">epg.xml</a> · <a href=\"/cache\">cache status</a></p>\n\
         <table border=\"1\"><tr><th>Setting</th><th>Value</th></tr>{rows}</table>\n\
         </body></html>\n"
    )
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

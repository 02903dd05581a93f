use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine;
use pagescout_browser::{BrowserService, GetPage, GetScreenshot};
use pagescout_conversion::ConversionRegistry;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct ServerState {
    pub browser: Arc<dyn BrowserService>,
    pub conversions: ConversionRegistry,
    pub rule_count: usize,
    pub default_wait_time_ms: u64,
    pub page_timeout: Duration,
}

/// Query parameters are taken as raw strings so malformed values get a JSON error body.
#[derive(Debug, Deserialize)]
struct PageQuery {
    url: Option<String>,
    wait_time: Option<String>,
    format: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Validated `url` and `wait_time`.
fn page_target(state: &ServerState, query: &PageQuery) -> Result<(String, u64), Response> {
    let url = match query.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => return Err(error_response(StatusCode::BAD_REQUEST, "missing 'url' parameter")),
    };
    let wait_time = match query.wait_time.as_deref() {
        None | Some("") => state.default_wait_time_ms,
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            error_response(StatusCode::BAD_REQUEST, format!("invalid 'wait_time' value: {}", raw))
        })?,
    };
    Ok((url, wait_time))
}

async fn handle_page(State(state): State<ServerState>, Query(query): Query<PageQuery>) -> Response {
    let (url, wait_time) = match page_target(&state, &query) {
        Ok(target) => target,
        Err(resp) => return resp,
    };
    let conversion = match query.format.as_deref() {
        None | Some("") => None,
        Some(name) => match state.conversions.get(name) {
            Some(service) => Some(service),
            None => return error_response(StatusCode::BAD_REQUEST, format!("unknown format: {}", name)),
        },
    };

    info!(url = %url, wait_time, format = ?query.format, "Page request");
    let page = match tokio::time::timeout(state.page_timeout, state.browser.get_page(GetPage { url: url.clone(), wait_time })).await {
        Ok(Ok(page)) => page,
        Ok(Err(e)) => {
            error!(url = %url, error = %e, "Page retrieval failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
        Err(_) => {
            error!(url = %url, "Page retrieval timed out");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("page retrieval timed out after {}s", state.page_timeout.as_secs()),
            );
        }
    };

    let page = match conversion {
        Some(service) => match service.convert(page) {
            Ok(page) => page,
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        None => page,
    };
    Json(page).into_response()
}

async fn handle_screenshot(State(state): State<ServerState>, Query(query): Query<PageQuery>) -> Response {
    let (url, wait_time) = match page_target(&state, &query) {
        Ok(target) => target,
        Err(resp) => return resp,
    };

    info!(url = %url, wait_time, "Screenshot request");
    let request = GetScreenshot { url: url.clone(), wait_time };
    match tokio::time::timeout(state.page_timeout, state.browser.screenshot(request)).await {
        Ok(Ok(shot)) => {
            let image = base64::engine::general_purpose::STANDARD.encode(&shot.image);
            Json(json!({ "image": image })).into_response()
        }
        Ok(Err(e)) => {
            error!(url = %url, error = %e, "Screenshot failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("screenshot timed out after {}s", state.page_timeout.as_secs()),
        ),
    }
}

async fn handle_health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "rules": state.rule_count }))
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/page", get(handle_page))
        .route("/screenshot", get(handle_screenshot))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config_path: Option<&Path>, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let rules = super::load_rules(&config)?;
    let rule_count = rules.len();
    let browser = super::connect_browser(&config, rules).await?;

    let state = ServerState {
        browser: Arc::new(browser),
        conversions: ConversionRegistry::with_defaults()?,
        rule_count,
        default_wait_time_ms: config.server.default_wait_time_ms,
        page_timeout: Duration::from_secs(config.server.page_timeout_secs),
    };

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, rules = rule_count, "HTTP API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

//! Discovery of page targets through the DevTools HTTP endpoint.

use pagescout_core::{Error, Result};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// `<devtools>/json/<path>`, tolerating a trailing slash on the base.
fn json_url(devtools_url: &str, path: &str) -> Result<Url> {
    let base = format!("{}/", devtools_url.trim_end_matches('/'));
    Url::parse(&base)
        .and_then(|u| u.join(&format!("json/{}", path)))
        .map_err(|e| Error::Config(format!("invalid DevTools URL '{}': {}", devtools_url, e)))
}

/// WebSocket URL of the first `page` target in a `/json/list` answer.
fn first_page_target(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

/// Poll `/json/version` until the browser answers, up to `timeout`.
pub async fn wait_for_devtools(devtools_url: &str, timeout: Duration) -> Result<()> {
    let url = json_url(devtools_url, "version")?;
    let start = Instant::now();

    loop {
        if let Ok(resp) = reqwest::get(url.clone()).await {
            if let Ok(body) = resp.json::<Value>().await {
                if body.get("webSocketDebuggerUrl").is_some() {
                    debug!(browser = ?body.get("Browser"), "DevTools endpoint ready");
                    return Ok(());
                }
            }
        }
        if start.elapsed() > timeout {
            return Err(Error::Browser(format!(
                "DevTools endpoint {} not ready after {}s",
                devtools_url,
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Find a page target to drive. Retries since a fresh browser may not list one yet.
pub async fn page_ws_url(devtools_url: &str) -> Result<String> {
    let url = json_url(devtools_url, "list")?;

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let resp = match reqwest::get(url.clone()).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };
        if let Some(ws_url) = first_page_target(&targets) {
            return Ok(ws_url);
        }
    }

    Err(Error::Browser(format!("no page target found at {}", devtools_url)))
}

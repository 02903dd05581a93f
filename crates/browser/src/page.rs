//! Page retrieval: navigate, dismiss the consent dialog, then extract or capture.

use async_trait::async_trait;
use base64::Engine;
use pagescout_autoconsent::{ConsentManager, PageDriver};
use pagescout_core::config::BrowserConfig;
use pagescout_core::{Error, Page, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::driver::CdpDriver;
use crate::endpoint;

const SCREENSHOT_QUALITY: u8 = 90;

const HIDE_WEBDRIVER: &str = "Object.defineProperty(navigator, 'webdriver', { get: () => false });";

/// Outer HTML of the topmost visible elements under `body`, separated by blank lines.
const VISIBLE_HTML: &str = r#"(() => {
  function isVisible(el) {
    if (!el || !document.body.contains(el)) { return false; }
    for (let p = el; p && p !== document.body; p = p.parentElement) {
      if (window.getComputedStyle(p).display === 'none') { return false; }
    }
    const style = window.getComputedStyle(el);
    if (style.visibility === 'hidden' || style.visibility === 'collapse') { return false; }
    if (parseFloat(style.opacity) === 0) { return false; }
    const rect = el.getBoundingClientRect();
    if ((rect.width === 0 || rect.height === 0) && style.overflow !== 'visible') { return false; }
    return true;
  }
  const parts = [];
  document.querySelectorAll('body *').forEach(el => {
    const parent = el.parentElement;
    if (parent && (parent === document.body || !isVisible(parent)) && isVisible(el)) {
      parts.push(el.outerHTML);
    }
  });
  return parts.join('\n\n');
})()"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPage {
    pub url: String,
    /// Milliseconds to let the page settle after the load event.
    #[serde(default)]
    pub wait_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetScreenshot {
    pub url: String,
    #[serde(default)]
    pub wait_time: u64,
}

#[derive(Debug, Clone)]
pub struct ScreenshotResponse {
    /// JPEG bytes.
    pub image: Vec<u8>,
}

#[async_trait]
pub trait BrowserService: Send + Sync {
    async fn get_page(&self, req: GetPage) -> Result<Page>;

    async fn screenshot(&self, req: GetScreenshot) -> Result<ScreenshotResponse>;
}

/// Drives one page target of an already running Chrome.
pub struct ChromeService {
    client: Mutex<CdpClient>,
    consent: ConsentManager,
}

impl ChromeService {
    pub async fn connect(config: &BrowserConfig, consent: ConsentManager) -> Result<Self> {
        endpoint::wait_for_devtools(&config.devtools_url, Duration::from_secs(config.ready_timeout_secs)).await?;
        let ws_url = endpoint::page_ws_url(&config.devtools_url).await?;
        let client = CdpClient::connect(&ws_url, Duration::from_secs(config.command_timeout_secs)).await?;

        for domain in ["Page", "Runtime", "DOM", "Network"] {
            client.enable_domain(domain).await?;
        }
        if !config.user_agent.is_empty() {
            client.set_user_agent(&config.user_agent).await?;
        }
        // Applies to every document loaded from now on.
        client.add_script_on_new_document(HIDE_WEBDRIVER).await?;

        info!(ws_url = %ws_url, rules = consent.rules().len(), "Connected to browser page target");
        Ok(Self {
            client: Mutex::new(client),
            consent,
        })
    }

    /// Navigate, settle, and run the consent opt-out. Returns the final location.
    async fn open(&self, client: &CdpClient, url: &str, wait_time: u64) -> Result<String> {
        client.navigate(url).await?;
        tokio::time::sleep(Duration::from_millis(wait_time)).await;

        let driver = CdpDriver::new(client);
        let location = driver.current_url().await?;
        debug!(requested = %url, location = %location, "Page loaded");

        if let Some(rule) = self.consent.apply_opt_out(&driver, &location).await {
            info!(rule = %rule, url = %location, "Consent dialog handled");
        }
        if let Err(e) = driver.release().await {
            warn!(error = %e, "Failed to release consent node handles");
        }
        Ok(location)
    }
}

#[async_trait]
impl BrowserService for ChromeService {
    async fn get_page(&self, req: GetPage) -> Result<Page> {
        let client = self.client.lock().await;
        self.open(&client, &req.url, req.wait_time).await?;

        let content = client.evaluate_js(VISIBLE_HTML).await?;
        let title = client.evaluate_js("document.title").await?;

        Ok(Page {
            title: title.as_str().unwrap_or_default().to_string(),
            content: content.as_str().unwrap_or_default().to_string(),
            url: req.url,
        })
    }

    async fn screenshot(&self, req: GetScreenshot) -> Result<ScreenshotResponse> {
        let client = self.client.lock().await;
        self.open(&client, &req.url, req.wait_time).await?;

        let data = client.screenshot(SCREENSHOT_QUALITY).await?;
        let image = base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| Error::Browser(format!("invalid screenshot data: {}", e)))?;
        info!(url = %req.url, bytes = image.len(), "Screenshot captured");
        Ok(ScreenshotResponse { image })
    }
}

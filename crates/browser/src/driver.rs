//! [`PageDriver`] backed by a live CDP page.
//!
//! Node handles are Runtime remote object ids. They all belong to one object group
//! so a session can drop them in a single call once consent handling is done.

use async_trait::async_trait;
use pagescout_autoconsent::{NodeHandle, PageDriver};
use pagescout_core::{Error, Result};
use serde_json::{json, Value};
use std::time::Duration;

use crate::cdp::CdpClient;

pub const OBJECT_GROUP: &str = "pagescout-consent";

const QUERY_CSS: &str = r#"function(selector, all) {
  if (all) { return Array.from(this.querySelectorAll(selector)); }
  const found = this.querySelector(selector);
  return found ? [found] : [];
}"#;

const QUERY_XPATH: &str = r#"function(expression, all) {
  const doc = this.ownerDocument || this;
  const snapshot = doc.evaluate(expression, this, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
  const out = [];
  for (let i = 0; i < snapshot.snapshotLength; i++) {
    out.push(snapshot.snapshotItem(i));
    if (!all) { break; }
  }
  return out;
}"#;

const SHADOW_ROOT: &str = "function() { return this.shadowRoot || null; }";

const FRAME_DOCUMENT: &str = r#"function() {
  if (!this.tagName || this.tagName.toLowerCase() !== 'iframe') { return null; }
  try { return this.contentDocument || null; } catch (e) { return null; }
}"#;

const CLICK: &str = "function() { this.click(); }";

/// Object id of a remote object, `None` for `null`/`undefined`.
fn object_id(remote: &Value) -> Option<String> {
    remote.get("objectId").and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Object ids of the array elements in a `Runtime.getProperties` answer, in index order.
fn array_elements(properties: &[Value]) -> Vec<String> {
    let mut indexed: Vec<(usize, String)> = properties
        .iter()
        .filter_map(|p| {
            let index = p.get("name")?.as_str()?.parse::<usize>().ok()?;
            let id = object_id(p.get("value")?)?;
            Some((index, id))
        })
        .collect();
    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, id)| id).collect()
}

/// `name=value` rendering of a `Network.getCookies` entry.
fn cookie_line(cookie: &Value) -> String {
    format!(
        "{}={}",
        cookie.get("name").and_then(|v| v.as_str()).unwrap_or_default(),
        cookie.get("value").and_then(|v| v.as_str()).unwrap_or_default()
    )
}

pub struct CdpDriver<'a> {
    client: &'a CdpClient,
}

impl<'a> CdpDriver<'a> {
    pub fn new(client: &'a CdpClient) -> Self {
        Self { client }
    }

    /// Release every node handle handed out so far.
    pub async fn release(&self) -> Result<()> {
        self.client.release_object_group(OBJECT_GROUP).await
    }

    async fn node_list(&self, scope: &NodeHandle, function: &str, query: &str, all: bool) -> Result<Vec<NodeHandle>> {
        let array = self
            .client
            .call_function_on(scope.id(), function, vec![json!(query), json!(all)], false)
            .await?;
        let Some(array_id) = object_id(&array) else {
            return Ok(Vec::new());
        };
        let properties = self.client.get_properties(&array_id).await?;
        Ok(array_elements(&properties).into_iter().map(NodeHandle::new).collect())
    }

    async fn node(&self, node: &NodeHandle, function: &str) -> Result<Option<NodeHandle>> {
        let remote = self.client.call_function_on(node.id(), function, Vec::new(), false).await?;
        Ok(object_id(&remote).map(NodeHandle::new))
    }
}

#[async_trait]
impl PageDriver for CdpDriver<'_> {
    async fn document(&self) -> Result<NodeHandle> {
        let remote = self.client.evaluate_handle("document", OBJECT_GROUP).await?;
        object_id(&remote)
            .map(NodeHandle::new)
            .ok_or_else(|| Error::Browser("document has no remote object".to_string()))
    }

    async fn query_css(&self, scope: &NodeHandle, selector: &str, all: bool) -> Result<Vec<NodeHandle>> {
        self.node_list(scope, QUERY_CSS, selector, all).await
    }

    async fn query_xpath(&self, scope: &NodeHandle, expression: &str, all: bool) -> Result<Vec<NodeHandle>> {
        self.node_list(scope, QUERY_XPATH, expression, all).await
    }

    async fn shadow_root(&self, node: &NodeHandle) -> Result<Option<NodeHandle>> {
        self.node(node, SHADOW_ROOT).await
    }

    async fn frame_document(&self, node: &NodeHandle) -> Result<Option<NodeHandle>> {
        self.node(node, FRAME_DOCUMENT).await
    }

    async fn click(&self, node: &NodeHandle) -> Result<()> {
        self.client.call_function_on(node.id(), CLICK, Vec::new(), true).await?;
        Ok(())
    }

    async fn evaluate_script(&self, source: &str) -> Result<()> {
        self.client.evaluate_js(source).await?;
        Ok(())
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn cookies_contain(&self, needle: &str) -> Result<bool> {
        let cookies = self.client.get_cookies().await?;
        Ok(cookies.iter().any(|c| cookie_line(c).contains(needle)))
    }

    async fn current_url(&self) -> Result<String> {
        let href = self.client.evaluate_js("window.location.href").await?;
        href.as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Browser("location.href is not a string".to_string()))
    }
}

//! The browser capabilities the consent engine needs.
//!
//! Everything above this trait is driver-agnostic: the CDP client in
//! `pagescout-browser` implements it against a live tab, and `testing::FakePage` (feature `testing`)
//! implements it against an in-memory DOM.

use async_trait::async_trait;
use pagescout_core::Result;
use std::fmt;
use std::time::Duration;

/// Opaque reference to a DOM node (element, document, or shadow root) owned by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle(String);

impl NodeHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primitive DOM operations on one page.
///
/// Query methods return an empty list when nothing matches; `Err` is reserved for
/// driver faults such as a broken connection or an invalid selector.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// The top-level document of the page.
    async fn document(&self) -> Result<NodeHandle>;

    /// CSS query scoped to `scope`. Only the first match is returned unless `all` is set.
    async fn query_css(&self, scope: &NodeHandle, selector: &str, all: bool) -> Result<Vec<NodeHandle>>;

    /// XPath query with `scope` as the context node, evaluated by the document owning it.
    async fn query_xpath(&self, scope: &NodeHandle, expression: &str, all: bool) -> Result<Vec<NodeHandle>>;

    /// Open shadow root hosted by `node`, if any.
    async fn shadow_root(&self, node: &NodeHandle) -> Result<Option<NodeHandle>>;

    /// Embedded document of `node` when it is a same-origin iframe.
    async fn frame_document(&self, node: &NodeHandle) -> Result<Option<NodeHandle>>;

    async fn click(&self, node: &NodeHandle) -> Result<()>;

    /// Run a script in the page, discarding its value.
    async fn evaluate_script(&self, source: &str) -> Result<()>;

    async fn sleep(&self, duration: Duration);

    /// Whether any cookie of the current session, rendered as `name=value`, contains `needle`.
    async fn cookies_contain(&self, needle: &str) -> Result<bool>;

    async fn current_url(&self) -> Result<String>;
}

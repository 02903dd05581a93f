//! In-memory [`PageDriver`] for exercising consent rules without a browser.
//!
//! The fake DOM understands enough CSS (tag, `#id`, `.class`, `[attr]`,
//! `[attr="value"]`, descendant combinator) and XPath (`//tag`, `.//tag` with an
//! optional `[text()='...']` or `[@attr='...']` predicate) for rule fixtures.
//! Shadow roots and iframe documents are separate trees, as in a browser.

use async_trait::async_trait;
use pagescout_core::{Error, Result};
use regex::Regex;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::driver::{NodeHandle, PageDriver};

/// Element description used to build a fake page.
#[derive(Debug, Clone, Default)]
pub struct FakeNode {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, String)>,
    text: String,
    appears_after: Option<Duration>,
}

impl FakeNode {
    pub fn element(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// The node (and its subtree) only becomes queryable after `delay`.
    pub fn appearing_after(mut self, delay: Duration) -> Self {
        self.appears_after = Some(delay);
        self
    }

    fn attr(&self, name: &str) -> Option<&str> {
        match name {
            "id" => self.id.as_deref(),
            _ => self
                .attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str()),
        }
    }
}

#[derive(Debug)]
enum Kind {
    Document,
    ShadowRoot,
    Element(FakeNode),
}

#[derive(Debug)]
struct NodeData {
    kind: Kind,
    parent: Option<usize>,
    children: Vec<usize>,
    shadow: Option<usize>,
    /// Embedded document and whether it is same-origin.
    frame: Option<(usize, bool)>,
}

#[derive(Debug, Default)]
struct State {
    nodes: Vec<NodeData>,
    cookies: Vec<String>,
    clicks: Vec<NodeHandle>,
    scripts: Vec<String>,
    slept: Duration,
}

pub struct FakePage {
    url: String,
    started: Instant,
    state: Mutex<State>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        let mut state = State::default();
        state.nodes.push(NodeData {
            kind: Kind::Document,
            parent: None,
            children: Vec::new(),
            shadow: None,
            frame: None,
        });
        Self {
            url: url.to_string(),
            started: Instant::now(),
            state: Mutex::new(state),
        }
    }

    /// Handle of the top-level document.
    pub fn root(&self) -> NodeHandle {
        NodeHandle::new("0")
    }

    /// Append `node` as the last child of `parent`.
    ///
    /// Builder methods panic on handles that did not come from this page.
    pub fn add(&self, parent: NodeHandle, node: FakeNode) -> NodeHandle {
        let parent = index(&parent).expect("fake handle");
        let mut state = self.lock();
        let id = push(&mut state, Kind::Element(node), Some(parent));
        state.nodes[parent].children.push(id);
        handle(id)
    }

    /// Attach an open shadow root to `host` and return it.
    pub fn attach_shadow(&self, host: NodeHandle) -> NodeHandle {
        let host = index(&host).expect("fake handle");
        let mut state = self.lock();
        let root = push(&mut state, Kind::ShadowRoot, None);
        state.nodes[host].shadow = Some(root);
        handle(root)
    }

    /// Give `frame` an embedded document and return it.
    pub fn attach_frame(&self, frame: NodeHandle, same_origin: bool) -> NodeHandle {
        let frame = index(&frame).expect("fake handle");
        let mut state = self.lock();
        let doc = push(&mut state, Kind::Document, None);
        state.nodes[frame].frame = Some((doc, same_origin));
        handle(doc)
    }

    pub fn add_cookie(&self, cookie: &str) {
        self.lock().cookies.push(cookie.to_string());
    }

    /// Every node clicked so far, in order.
    pub fn clicks(&self) -> Vec<NodeHandle> {
        self.lock().clicks.clone()
    }

    pub fn click_count(&self, node: &NodeHandle) -> usize {
        self.lock().clicks.iter().filter(|n| *n == node).count()
    }

    /// Every script evaluated so far, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.lock().scripts.clone()
    }

    /// Total time spent in [`PageDriver::sleep`].
    pub fn slept(&self) -> Duration {
        self.lock().slept
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn present(&self, node: &NodeData) -> bool {
        match &node.kind {
            Kind::Element(el) => el
                .appears_after
                .map_or(true, |delay| Instant::now() >= self.started + delay),
            _ => true,
        }
    }

    /// Present descendants of `scope` in document order, not crossing tree boundaries.
    fn descendants(&self, state: &State, scope: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = state.nodes[scope].children.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let node = &state.nodes[id];
            if !self.present(node) {
                continue;
            }
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    fn tree_root(state: &State, mut id: usize) -> usize {
        while let Some(parent) = state.nodes[id].parent {
            id = parent;
        }
        id
    }
}

fn push(state: &mut State, kind: Kind, parent: Option<usize>) -> usize {
    state.nodes.push(NodeData {
        kind,
        parent,
        children: Vec::new(),
        shadow: None,
        frame: None,
    });
    state.nodes.len() - 1
}

fn handle(id: usize) -> NodeHandle {
    NodeHandle::new(id.to_string())
}

fn index(node: &NodeHandle) -> Result<usize> {
    node.id()
        .parse()
        .map_err(|_| Error::NotFound(format!("stale node handle '{}'", node)))
}

fn lookup(state: &State, node: &NodeHandle) -> Result<usize> {
    let id = index(node)?;
    if id >= state.nodes.len() {
        return Err(Error::NotFound(format!("stale node handle '{}'", node)));
    }
    Ok(id)
}

/// One compound CSS selector such as `button.primary#ok[data-role="reject"]`.
#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

impl Compound {
    fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::Selector(format!("invalid selector '{}'", raw));
        let mut out = Compound::default();
        let mut rest = raw;

        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '*'))
            .unwrap_or(rest.len());
        if tag_len > 0 {
            let tag = &rest[..tag_len];
            if tag != "*" {
                out.tag = Some(tag.to_ascii_lowercase());
            }
            rest = &rest[tag_len..];
        }

        while !rest.is_empty() {
            let marker = rest.as_bytes()[0];
            rest = &rest[1..];
            match marker {
                b'#' | b'.' => {
                    let len = rest
                        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
                        .unwrap_or(rest.len());
                    if len == 0 {
                        return Err(invalid());
                    }
                    let name = rest[..len].to_string();
                    if marker == b'#' {
                        out.id = Some(name);
                    } else {
                        out.classes.push(name);
                    }
                    rest = &rest[len..];
                }
                b'[' => {
                    let end = rest.find(']').ok_or_else(invalid)?;
                    let body = &rest[..end];
                    let attr = match body.split_once('=') {
                        Some((name, value)) => (
                            name.trim().to_string(),
                            Some(value.trim().trim_matches(|c| c == '"' || c == '\'').to_string()),
                        ),
                        None => (body.trim().to_string(), None),
                    };
                    if attr.0.is_empty() {
                        return Err(invalid());
                    }
                    out.attrs.push(attr);
                    rest = &rest[end + 1..];
                }
                _ => return Err(invalid()),
            }
        }
        Ok(out)
    }

    fn matches(&self, el: &FakeNode) -> bool {
        if self.tag.as_deref().is_some_and(|t| t != el.tag) {
            return false;
        }
        if self.id.is_some() && self.id != el.id {
            return false;
        }
        if !self.classes.iter().all(|c| el.classes.contains(c)) {
            return false;
        }
        self.attrs.iter().all(|(name, value)| match (el.attr(name), value) {
            (Some(actual), Some(expected)) => actual == expected,
            (Some(_), None) => true,
            (None, _) => false,
        })
    }
}

fn parse_css(selector: &str) -> Result<Vec<Compound>> {
    let parts = selector
        .split_whitespace()
        .map(Compound::parse)
        .collect::<Result<Vec<_>>>()?;
    if parts.is_empty() {
        return Err(Error::Selector("empty selector".to_string()));
    }
    Ok(parts)
}

fn element(state: &State, id: usize) -> Option<&FakeNode> {
    match &state.nodes[id].kind {
        Kind::Element(el) => Some(el),
        _ => None,
    }
}

fn css_matches(state: &State, id: usize, compounds: &[Compound]) -> bool {
    let Some((last, ancestors)) = compounds.split_last() else {
        return false;
    };
    if !element(state, id).is_some_and(|el| last.matches(el)) {
        return false;
    }
    // Descendant combinator: match the remaining compounds right to left up the tree.
    let mut remaining = ancestors;
    let mut cursor = state.nodes[id].parent;
    while let Some((wanted, rest)) = remaining.split_last() {
        loop {
            let Some(parent) = cursor else {
                return false;
            };
            cursor = state.nodes[parent].parent;
            if element(state, parent).is_some_and(|el| wanted.matches(el)) {
                break;
            }
        }
        remaining = rest;
    }
    true
}

struct XPathQuery {
    relative: bool,
    tag: Option<String>,
    predicate: Option<(String, String)>,
}

fn parse_xpath(expression: &str) -> Result<XPathQuery> {
    let re = Regex::new(r"^(\.)?//([A-Za-z][A-Za-z0-9-]*|\*)(?:\[(text\(\)|@[A-Za-z-]+)\s*=\s*'([^']*)'\])?$")?;
    let caps = re
        .captures(expression.trim())
        .ok_or_else(|| Error::Selector(format!("unsupported xpath '{}'", expression)))?;
    let tag = caps.get(2).map(|m| m.as_str()).filter(|t| *t != "*");
    Ok(XPathQuery {
        relative: caps.get(1).is_some(),
        tag: tag.map(str::to_ascii_lowercase),
        predicate: caps
            .get(3)
            .zip(caps.get(4))
            .map(|(k, v)| (k.as_str().to_string(), v.as_str().to_string())),
    })
}

impl XPathQuery {
    fn matches(&self, el: &FakeNode) -> bool {
        if self.tag.as_deref().is_some_and(|t| t != el.tag) {
            return false;
        }
        match &self.predicate {
            None => true,
            Some((key, value)) if key == "text()" => el.text == *value,
            Some((key, value)) => el.attr(key.trim_start_matches('@')) == Some(value.as_str()),
        }
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn document(&self) -> Result<NodeHandle> {
        Ok(self.root())
    }

    async fn query_css(&self, scope: &NodeHandle, selector: &str, all: bool) -> Result<Vec<NodeHandle>> {
        let compounds = parse_css(selector)?;
        let state = self.lock();
        let scope = lookup(&state, scope)?;
        let mut found = self
            .descendants(&state, scope)
            .into_iter()
            .filter(|id| css_matches(&state, *id, &compounds))
            .map(handle);
        Ok(if all { found.collect() } else { found.next().into_iter().collect() })
    }

    async fn query_xpath(&self, scope: &NodeHandle, expression: &str, all: bool) -> Result<Vec<NodeHandle>> {
        let query = parse_xpath(expression)?;
        let state = self.lock();
        let scope = lookup(&state, scope)?;
        let origin = if query.relative { scope } else { Self::tree_root(&state, scope) };
        let mut found = self
            .descendants(&state, origin)
            .into_iter()
            .filter(|id| element(&state, *id).is_some_and(|el| query.matches(el)))
            .map(handle);
        Ok(if all { found.collect() } else { found.next().into_iter().collect() })
    }

    async fn shadow_root(&self, node: &NodeHandle) -> Result<Option<NodeHandle>> {
        let state = self.lock();
        let id = lookup(&state, node)?;
        Ok(state.nodes[id].shadow.map(handle))
    }

    async fn frame_document(&self, node: &NodeHandle) -> Result<Option<NodeHandle>> {
        let state = self.lock();
        let id = lookup(&state, node)?;
        let is_iframe = element(&state, id).is_some_and(|el| el.tag == "iframe");
        Ok(match state.nodes[id].frame {
            Some((doc, true)) if is_iframe => Some(handle(doc)),
            _ => None,
        })
    }

    async fn click(&self, node: &NodeHandle) -> Result<()> {
        let mut state = self.lock();
        lookup(&state, node)?;
        state.clicks.push(node.clone());
        Ok(())
    }

    async fn evaluate_script(&self, source: &str) -> Result<()> {
        self.lock().scripts.push(source.to_string());
        Ok(())
    }

    async fn sleep(&self, duration: Duration) {
        self.lock().slept += duration;
        tokio::time::sleep(duration).await;
    }

    async fn cookies_contain(&self, needle: &str) -> Result<bool> {
        Ok(self.lock().cookies.iter().any(|c| c.contains(needle)))
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.url.clone())
    }
}

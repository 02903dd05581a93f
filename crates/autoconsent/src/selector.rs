//! Element selectors and cross-boundary resolution.
//!
//! A selector is either one string or a path of strings. Each string is a CSS
//! selector, or an XPath expression when prefixed with `xpath/`. Path steps are
//! resolved inside the node produced by the previous step: its shadow root when it
//! hosts one, otherwise the document of a same-origin iframe. A step that offers
//! neither ends the path with no match.

use pagescout_core::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

use crate::driver::{NodeHandle, PageDriver};

const XPATH_PREFIX: &str = "xpath/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ElementSelector {
    Single(String),
    Path(Vec<String>),
}

/// One resolution step after the `xpath/` convention has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<'a> {
    Css(&'a str),
    XPath(&'a str),
}

impl<'a> Step<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.strip_prefix(XPATH_PREFIX) {
            Some(expression) => Step::XPath(expression),
            None => Step::Css(raw),
        }
    }
}

impl ElementSelector {
    /// Decode the JSON shape of a selector: a string or a non-empty list of strings.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(ElementSelector::Single(s.clone())),
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(Error::Selector("selector path must not be empty".to_string()));
                }
                let steps = items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            Error::Selector(format!("selector path step must be a string, got {}", item))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ElementSelector::Path(steps))
            }
            other => Err(Error::Selector(format!(
                "selector must be a string or a list of strings, got {}",
                other
            ))),
        }
    }

    pub fn steps(&self) -> Vec<Step<'_>> {
        match self {
            ElementSelector::Single(s) => vec![Step::parse(s)],
            ElementSelector::Path(path) => path.iter().map(|s| Step::parse(s)).collect(),
        }
    }
}

impl From<&str> for ElementSelector {
    fn from(s: &str) -> Self {
        ElementSelector::Single(s.to_string())
    }
}

impl<'de> Deserialize<'de> for ElementSelector {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        ElementSelector::from_value(&value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ElementSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementSelector::Single(s) => f.write_str(s),
            ElementSelector::Path(path) => f.write_str(&path.join(" >> ")),
        }
    }
}

async fn query_step(
    driver: &dyn PageDriver,
    scope: &NodeHandle,
    step: Step<'_>,
    all: bool,
) -> Result<Vec<NodeHandle>> {
    match step {
        Step::Css(selector) => driver.query_css(scope, selector, all).await,
        Step::XPath(expression) => driver.query_xpath(scope, expression, all).await,
    }
}

/// Shadow root first, then same-origin iframe document.
async fn descend(driver: &dyn PageDriver, node: &NodeHandle) -> Result<Option<NodeHandle>> {
    if let Some(root) = driver.shadow_root(node).await? {
        return Ok(Some(root));
    }
    driver.frame_document(node).await
}

/// Resolve every node matched by the terminal step (or only the first unless `all`).
///
/// Intermediate steps always follow their first match. An empty result means the
/// selector does not match; `Err` only carries driver faults.
pub async fn resolve_all(
    driver: &dyn PageDriver,
    selector: &ElementSelector,
    all: bool,
) -> Result<Vec<NodeHandle>> {
    let steps = selector.steps();
    let Some(last) = steps.len().checked_sub(1) else {
        return Err(Error::Selector("selector path must not be empty".to_string()));
    };

    let mut scope = driver.document().await?;
    for (i, step) in steps.into_iter().enumerate() {
        let found = query_step(driver, &scope, step, all && i == last).await?;
        if i == last {
            return Ok(found);
        }
        let Some(node) = found.into_iter().next() else {
            return Ok(Vec::new());
        };
        match descend(driver, &node).await? {
            Some(inner) => scope = inner,
            None => {
                debug!(selector = %selector, step = i, "No shadow root or same-origin frame to descend into");
                return Ok(Vec::new());
            }
        }
    }
    Ok(Vec::new())
}

/// First node matched by `selector`.
pub async fn resolve(driver: &dyn PageDriver, selector: &ElementSelector) -> Result<Option<NodeHandle>> {
    Ok(resolve_all(driver, selector, false).await?.into_iter().next())
}

/// Existence probe. Driver faults count as "not found".
pub async fn exists(driver: &dyn PageDriver, selector: &ElementSelector) -> bool {
    match resolve(driver, selector).await {
        Ok(found) => found.is_some(),
        Err(e) => {
            debug!(selector = %selector, error = %e, "Selector probe failed");
            false
        }
    }
}

/// Click the first match, or every terminal match when `all` is set.
/// Returns how many nodes were clicked.
pub async fn click(driver: &dyn PageDriver, selector: &ElementSelector, all: bool) -> Result<usize> {
    let nodes = resolve_all(driver, selector, all).await?;
    if nodes.is_empty() {
        return Err(Error::NotFound(format!("no element matches '{}'", selector)));
    }
    for node in &nodes {
        driver.click(node).await?;
    }
    Ok(nodes.len())
}

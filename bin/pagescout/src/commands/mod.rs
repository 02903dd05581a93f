pub mod fetch;
pub mod mcp;
pub mod rules;
pub mod screenshot;
pub mod serve;

#[cfg(test)]
mod stub;

use anyhow::Context;
use pagescout_autoconsent::{ConsentManager, RuleSet};
use pagescout_browser::ChromeService;
use pagescout_core::{Config, Paths};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Explicit `--config` file, or `~/.pagescout/config.json` when present.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(Config::load_or_default(&Paths::new())?),
    }
}

/// The rule document named by the config. A configured path must load; the default
/// locations may be absent, in which case no consent handling happens.
pub fn load_rules(config: &Config) -> anyhow::Result<Arc<RuleSet>> {
    let path = config.rules_path(&Paths::new());
    let configured = config.rules.path.as_deref().is_some_and(|p| !p.trim().is_empty());
    if !configured && !path.exists() {
        warn!(path = %path.display(), "No consent rule document found, consent dialogs will not be handled");
        return Ok(Arc::new(RuleSet::default()));
    }
    let rules = RuleSet::load(&path)?;
    Ok(Arc::new(rules))
}

pub async fn connect_browser(config: &Config, rules: Arc<RuleSet>) -> anyhow::Result<ChromeService> {
    ChromeService::connect(&config.browser, ConsentManager::new(rules))
        .await
        .with_context(|| format!("cannot attach to browser at {}", config.browser.devtools_url))
}

//! Rule selection and the opt-out flow.

use std::sync::Arc;
use tracing::{debug, info};

use crate::driver::PageDriver;
use crate::interpreter::{execute, Mode};
use crate::rule::{ConsentRule, RuleSet};

/// First rule, in document order, whose `detectCMP` holds on the current page.
///
/// Rules with an empty `detectCMP` list or a `runContext.urlPattern` that does not
/// match `url` are skipped without probing the page.
pub async fn select_rule<'r>(driver: &dyn PageDriver, url: &str, rules: &'r RuleSet) -> Option<&'r ConsentRule> {
    for rule in rules.iter() {
        if rule.detect_cmp.is_empty() {
            continue;
        }
        if !rule.run_context.url_matches(url) {
            debug!(rule = %rule.name, url = %url, "URL outside rule run context");
            continue;
        }
        if execute(driver, &rule.detect_cmp, Mode::Detect).await {
            return Some(rule);
        }
    }
    None
}

/// Applies the opt-out flow of the matching rule to a page.
///
/// Cheap to clone; the rule set is shared read-only between sessions.
#[derive(Clone)]
pub struct ConsentManager {
    rules: Arc<RuleSet>,
}

impl ConsentManager {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Detect the consent manager on the page and run its `optOut` list.
    ///
    /// Returns the name of the rule that was applied. `detectPopup` and `optIn` are
    /// never run. Nothing here fails the page load.
    pub async fn apply_opt_out(&self, driver: &dyn PageDriver, url: &str) -> Option<String> {
        let Some(rule) = select_rule(driver, url, &self.rules).await else {
            debug!(url = %url, "No consent manager detected");
            return None;
        };
        info!(rule = %rule.name, url = %url, "Consent manager detected, opting out");
        execute(driver, &rule.opt_out, Mode::Execute).await;
        info!(rule = %rule.name, "Opt-out flow finished");
        Some(rule.name.clone())
    }
}

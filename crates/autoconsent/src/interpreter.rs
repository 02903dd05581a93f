//! Action-list interpreter.
//!
//! Every list is walked to the end. In [`Mode::Detect`] the result is the AND of all
//! probe actions in the list; a failed probe does not stop the remaining ones from
//! running. In [`Mode::Execute`] side-effecting actions run in order and their
//! failures are logged, never propagated.

use futures::future::BoxFuture;
use pagescout_core::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::driver::PageDriver;
use crate::rule::Action;
use crate::scripts;
use crate::selector::{self, ElementSelector};

/// Cadence of the polling actions.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Only probe page state.
    Detect,
    /// Perform clicks, scripts and style injection.
    Execute,
}

/// Run `actions` in `mode` and return whether every Detect-relevant action held.
///
/// A list with no Detect-relevant actions (or any list in Execute mode) yields `true`.
pub fn execute<'a>(driver: &'a dyn PageDriver, actions: &'a [Action], mode: Mode) -> BoxFuture<'a, bool> {
    Box::pin(async move {
        let mut matched = true;
        for action in actions {
            debug!(action = action.kind(), mode = ?mode, "Running consent action");
            if !run_action(driver, action, mode).await {
                matched = false;
            }
        }
        matched
    })
}

async fn run_action(driver: &dyn PageDriver, action: &Action, mode: Mode) -> bool {
    match (action, mode) {
        (Action::Exists { selector }, Mode::Detect) => selector::exists(driver, selector).await,
        // Visibility is approximated by existence.
        (Action::Visible { selector, .. }, Mode::Detect) => selector::exists(driver, selector).await,
        (Action::WaitFor { selector, timeout_ms }, Mode::Detect)
        | (Action::WaitForVisible { selector, timeout_ms, .. }, Mode::Detect) => {
            poll_until_found(driver, selector, *timeout_ms).await
        }
        (Action::CookieContains { substring }, Mode::Detect) => match driver.cookies_contain(substring).await {
            Ok(found) => found,
            Err(e) => {
                debug!(error = %e, "Cookie probe failed");
                false
            }
        },

        (Action::Click { selector, all }, Mode::Execute) => {
            if let Err(e) = selector::click(driver, selector, *all).await {
                warn!(selector = %selector, error = %e, "Click action failed");
            }
            true
        }
        (Action::WaitForThenClick { selector, timeout_ms, .. }, Mode::Execute) => {
            if let Err(e) = wait_for_then_click(driver, selector, *timeout_ms).await {
                warn!(selector = %selector, error = %e, "Wait-then-click action failed");
            }
            true
        }
        (Action::Hide { selector, method }, Mode::Execute) => {
            let script = scripts::hide_script(selector, method.as_deref());
            if let Err(e) = driver.evaluate_script(&script).await {
                warn!(selector = %selector, error = %e, "Hide action failed");
            }
            true
        }
        (Action::Eval { key }, Mode::Execute) => {
            match scripts::lookup(key) {
                Some(body) => {
                    if let Err(e) = driver.evaluate_script(&scripts::wrap(body)).await {
                        warn!(key = %key, error = %e, "Eval action failed");
                    }
                }
                None => warn!(key = %key, "Eval action names an unknown script"),
            }
            true
        }
        (
            Action::IfThenElse {
                condition,
                then_actions,
                else_actions,
            },
            Mode::Execute,
        ) => {
            let probe = [condition.to_action()];
            if execute(driver, &probe, Mode::Detect).await {
                debug!("Condition met, running 'then' branch");
                execute(driver, then_actions, Mode::Execute).await;
            } else {
                debug!("Condition not met, running 'else' branch");
                execute(driver, else_actions, Mode::Execute).await;
            }
            true
        }

        (Action::Wait { duration_ms }, _) => {
            driver.sleep(Duration::from_millis(*duration_ms)).await;
            true
        }

        // Inert in this mode.
        _ => true,
    }
}

/// Probe every [`POLL_INTERVAL`] until `selector` matches or `timeout_ms` elapses.
async fn poll_until_found(driver: &dyn PageDriver, selector: &ElementSelector, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        if selector::exists(driver, selector).await {
            return true;
        }
        driver.sleep(POLL_INTERVAL).await;
    }
    false
}

/// Click the first match as soon as it shows up.
async fn wait_for_then_click(driver: &dyn PageDriver, selector: &ElementSelector, timeout_ms: u64) -> Result<()> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        if selector::exists(driver, selector).await {
            selector::click(driver, selector, false).await?;
            return Ok(());
        }
        driver.sleep(POLL_INTERVAL).await;
    }
    Err(Error::Timeout(format!(
        "element '{}' did not appear within {}ms",
        selector, timeout_ms
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{parse_action_list, Condition};
    use crate::testing::{FakeNode, FakePage};
    use serde_json::json;

    fn actions(value: serde_json::Value) -> Vec<Action> {
        parse_action_list(&value).unwrap()
    }

    fn page_with(ids: &[&str]) -> FakePage {
        let page = FakePage::new("https://example.com/");
        for id in ids {
            page.add(page.root(), FakeNode::element("div").with_id(id));
        }
        page
    }

    #[tokio::test]
    async fn test_detect_is_and_of_probes() {
        let page = page_with(&["a", "b"]);
        assert!(execute(&page, &actions(json!([{"exists": "#a"}, {"visible": "#b"}])), Mode::Detect).await);
        assert!(!execute(&page, &actions(json!([{"exists": "#a"}, {"exists": "#c"}])), Mode::Detect).await);
        assert!(execute(&page, &[], Mode::Detect).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detect_does_not_short_circuit() {
        let page = page_with(&["b"]);
        // The first probe fails, yet the wait and the later waitFor still run.
        let list = actions(json!([
            {"exists": "#missing"},
            {"wait": 200},
            {"waitFor": "#b", "timeout": 500}
        ]));
        assert!(!execute(&page, &list, Mode::Detect).await);
        assert_eq!(page.slept(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_execute_actions_inert_in_detect() {
        let page = page_with(&["reject"]);
        let list = actions(json!([
            {"click": "#reject"},
            {"waitForThenClick": "#reject"},
            {"hide": "#reject"},
            {"eval": "ONETRUST_REJECT_ALL"},
            {"if": {"exists": "#reject"}, "then": [{"click": "#reject"}], "else": []}
        ]));
        assert!(execute(&page, &list, Mode::Detect).await);
        assert!(page.clicks().is_empty());
        assert!(page.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_detect_actions_inert_in_execute() {
        let page = page_with(&[]);
        let list = actions(json!([{"exists": "#missing"}, {"cookieContains": "nope"}, {"waitFor": "#missing", "timeout": 5000}]));
        assert!(execute(&page, &list, Mode::Execute).await);
        assert_eq!(page.slept(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_cookie_contains() {
        let page = page_with(&[]);
        page.add_cookie("OptanonConsent=isGpcEnabled=0&groups=C0001:1");
        assert!(execute(&page, &actions(json!([{"cookieContains": "OptanonConsent"}])), Mode::Detect).await);
        assert!(!execute(&page, &actions(json!([{"cookieContains": "euconsent-v2"}])), Mode::Detect).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_returns_when_element_appears() {
        let page = FakePage::new("https://example.com/");
        page.add(
            page.root(),
            FakeNode::element("div").with_id("late").appearing_after(Duration::from_millis(350)),
        );
        let start = Instant::now();
        let found = execute(&page, &actions(json!([{"waitFor": "#late", "timeout": 1000}])), Mode::Detect).await;
        let elapsed = start.elapsed();
        assert!(found);
        assert!(elapsed >= Duration::from_millis(350));
        assert!(elapsed <= Duration::from_millis(350) + POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out_no_earlier_than_deadline() {
        let page = page_with(&[]);
        let start = Instant::now();
        let found = execute(&page, &actions(json!([{"waitForVisible": "#never", "timeout": 700}])), Mode::Detect).await;
        assert!(!found);
        assert!(start.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_then_click_clicks_once_on_sighting() {
        let page = FakePage::new("https://example.com/");
        let button = page.add(
            page.root(),
            FakeNode::element("button").with_id("reject").appearing_after(Duration::from_millis(250)),
        );
        execute(&page, &actions(json!([{"waitForThenClick": "#reject", "timeout": 2000}])), Mode::Execute).await;
        assert_eq!(page.click_count(&button), 1);
        assert!(page.slept() < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_then_click_timeout_is_an_error() {
        let page = page_with(&[]);
        let err = wait_for_then_click(&page, &"#never".into(), 300).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(page.clicks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_abort_execute_list() {
        let page = page_with(&["close"]);
        let list = actions(json!([
            {"click": "#missing"},
            {"waitForThenClick": "#also-missing", "timeout": 200},
            {"eval": "EVAL_UNKNOWN"},
            {"click": "#close"}
        ]));
        assert!(execute(&page, &list, Mode::Execute).await);
        assert_eq!(page.clicks().len(), 1);
    }

    #[tokio::test]
    async fn test_if_then_else_runs_exactly_one_branch() {
        let page = FakePage::new("https://example.com/");
        page.add(page.root(), FakeNode::element("div").with_id("banner"));
        let then_btn = page.add(page.root(), FakeNode::element("button").with_id("then"));
        let else_btn = page.add(page.root(), FakeNode::element("button").with_id("else"));

        let when_present = actions(json!([{
            "if": {"exists": "#banner"},
            "then": [{"click": "#then"}],
            "else": [{"click": "#else"}]
        }]));
        execute(&page, &when_present, Mode::Execute).await;
        assert_eq!(page.click_count(&then_btn), 1);
        assert_eq!(page.click_count(&else_btn), 0);

        let when_absent = actions(json!([{
            "if": {"visible": "#no-banner"},
            "then": [{"click": "#then"}],
            "else": [{"click": "#else"}]
        }]));
        execute(&page, &when_absent, Mode::Execute).await;
        assert_eq!(page.click_count(&then_btn), 1);
        assert_eq!(page.click_count(&else_btn), 1);
    }

    #[tokio::test]
    async fn test_nested_if_then_else() {
        let page = page_with(&["outer", "inner"]);
        let target = page.add(page.root(), FakeNode::element("button").with_id("deep"));
        let list = vec![Action::IfThenElse {
            condition: Condition::Exists { selector: "#outer".into() },
            then_actions: vec![Action::IfThenElse {
                condition: Condition::Exists { selector: "#inner".into() },
                then_actions: vec![Action::Click { selector: "#deep".into(), all: false }],
                else_actions: vec![],
            }],
            else_actions: vec![],
        }];
        execute(&page, &list, Mode::Execute).await;
        assert_eq!(page.click_count(&target), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_runs_in_both_modes() {
        let page = page_with(&[]);
        let list = actions(json!([{"wait": 150}]));
        assert!(execute(&page, &list, Mode::Detect).await);
        assert!(execute(&page, &list, Mode::Execute).await);
        assert_eq!(page.slept(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_hide_and_eval_inject_scripts() {
        let page = page_with(&[]);
        let list = actions(json!([{"hide": "#cmp"}, {"eval": "COOKIEBOT_DECLINE"}]));
        execute(&page, &list, Mode::Execute).await;
        let scripts = page.scripts();
        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].contains("#cmp { display: none !important; }"));
        assert!(scripts[1].starts_with("(()=>{") && scripts[1].contains("Cookiebot.decline"));
    }
}

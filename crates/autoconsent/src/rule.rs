//! Consent rule model and the autoconsent JSON decoder.
//!
//! Action objects carry no explicit type tag; the kind is recognised by the first
//! distinguishing key present (see [`Action::from_value`]). Objects with none of the
//! known keys are skipped so newer rule documents still load.

use pagescout_core::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{debug, info};

use crate::selector::ElementSelector;

/// Timeout applied to wait-style actions that do not set one.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

pub type ActionList = Vec<Action>;

/// Condition of an [`Action::IfThenElse`]; only existence and visibility probes are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Exists { selector: ElementSelector },
    Visible { selector: ElementSelector, check: Option<String> },
}

impl Condition {
    /// The condition as a stand-alone action, for evaluation in Detect mode.
    pub fn to_action(&self) -> Action {
        match self {
            Condition::Exists { selector } => Action::Exists {
                selector: selector.clone(),
            },
            Condition::Visible { selector, check } => Action::Visible {
                selector: selector.clone(),
                check: check.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Exists {
        selector: ElementSelector,
    },
    Visible {
        selector: ElementSelector,
        check: Option<String>,
    },
    WaitFor {
        selector: ElementSelector,
        timeout_ms: u64,
    },
    WaitForVisible {
        selector: ElementSelector,
        timeout_ms: u64,
        check: Option<String>,
    },
    Click {
        selector: ElementSelector,
        all: bool,
    },
    WaitForThenClick {
        selector: ElementSelector,
        timeout_ms: u64,
        check: Option<String>,
    },
    Hide {
        selector: String,
        method: Option<String>,
    },
    CookieContains {
        substring: String,
    },
    Eval {
        key: String,
    },
    IfThenElse {
        condition: Condition,
        then_actions: ActionList,
        else_actions: ActionList,
    },
    Wait {
        duration_ms: u64,
    },
}

/// Read an optional field; absent and `null` are both `None`.
fn field<T: serde::de::DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Result<Option<T>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid '{}' field: {}", key, e))),
    }
}

fn required<T: serde::de::DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Result<T> {
    field(obj, key)?.ok_or_else(|| Error::Config(format!("missing '{}' field", key)))
}

fn selector_field(obj: &Map<String, Value>, key: &str) -> Result<ElementSelector> {
    let value = obj
        .get(key)
        .ok_or_else(|| Error::Config(format!("missing '{}' field", key)))?;
    ElementSelector::from_value(value)
}

/// `timeout` in milliseconds; zero or missing falls back to [`DEFAULT_TIMEOUT_MS`].
fn timeout_field(obj: &Map<String, Value>) -> Result<u64> {
    Ok(match field::<u64>(obj, "timeout")? {
        None | Some(0) => DEFAULT_TIMEOUT_MS,
        Some(ms) => ms,
    })
}

fn has(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).is_some_and(|v| !v.is_null())
}

impl Action {
    /// Decode one action object.
    ///
    /// Keys are tried in this order: `exists`, `visible`, `waitFor`, `waitForVisible`,
    /// `click`, `waitForThenClick`, `hide`, `cookieContains`, `eval`, `wait`, `if`.
    /// Returns `Ok(None)` for objects carrying none of them.
    pub fn from_value(value: &Value) -> Result<Option<Action>> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Config(format!("action must be an object, got {}", value)))?;

        let action = if has(obj, "exists") {
            Action::Exists {
                selector: selector_field(obj, "exists")?,
            }
        } else if has(obj, "visible") {
            Action::Visible {
                selector: selector_field(obj, "visible")?,
                check: field(obj, "check")?,
            }
        } else if has(obj, "waitFor") {
            Action::WaitFor {
                selector: selector_field(obj, "waitFor")?,
                timeout_ms: timeout_field(obj)?,
            }
        } else if has(obj, "waitForVisible") {
            Action::WaitForVisible {
                selector: selector_field(obj, "waitForVisible")?,
                timeout_ms: timeout_field(obj)?,
                check: field(obj, "check")?,
            }
        } else if has(obj, "click") {
            Action::Click {
                selector: selector_field(obj, "click")?,
                all: field(obj, "all")?.unwrap_or(false),
            }
        } else if has(obj, "waitForThenClick") {
            Action::WaitForThenClick {
                selector: selector_field(obj, "waitForThenClick")?,
                timeout_ms: timeout_field(obj)?,
                check: field(obj, "check")?,
            }
        } else if has(obj, "hide") {
            Action::Hide {
                selector: required(obj, "hide")?,
                method: field(obj, "method")?,
            }
        } else if has(obj, "cookieContains") {
            Action::CookieContains {
                substring: required(obj, "cookieContains")?,
            }
        } else if has(obj, "eval") {
            Action::Eval {
                key: required(obj, "eval")?,
            }
        } else if has(obj, "wait") {
            Action::Wait {
                duration_ms: required(obj, "wait")?,
            }
        } else if has(obj, "if") {
            Self::if_then_else(obj)?
        } else {
            debug!(action = %value, "Skipping action with unrecognised shape");
            return Ok(None);
        };
        Ok(Some(action))
    }

    fn if_then_else(obj: &Map<String, Value>) -> Result<Action> {
        let cond = obj
            .get("if")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::Config("'if' field must be an object".to_string()))?;

        let condition = if has(cond, "exists") {
            Condition::Exists {
                selector: selector_field(cond, "exists")?,
            }
        } else if has(cond, "visible") {
            Condition::Visible {
                selector: selector_field(cond, "visible")?,
                check: field(cond, "check")?,
            }
        } else {
            return Err(Error::Config(format!(
                "unsupported 'if' condition: {}",
                Value::Object(cond.clone())
            )));
        };

        let branch = |key: &str| -> Result<ActionList> {
            match obj.get(key) {
                Some(value) => parse_action_list(value),
                None => Ok(Vec::new()),
            }
        };

        Ok(Action::IfThenElse {
            condition,
            then_actions: branch("then")?,
            else_actions: branch("else")?,
        })
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Exists { .. } => "exists",
            Action::Visible { .. } => "visible",
            Action::WaitFor { .. } => "waitFor",
            Action::WaitForVisible { .. } => "waitForVisible",
            Action::Click { .. } => "click",
            Action::WaitForThenClick { .. } => "waitForThenClick",
            Action::Hide { .. } => "hide",
            Action::CookieContains { .. } => "cookieContains",
            Action::Eval { .. } => "eval",
            Action::IfThenElse { .. } => "ifThenElse",
            Action::Wait { .. } => "wait",
        }
    }

    /// Encode back into the rule document shape.
    pub fn to_value(&self) -> Value {
        fn with_check(mut v: Value, check: &Option<String>) -> Value {
            if let Some(check) = check {
                v["check"] = json!(check);
            }
            v
        }

        match self {
            Action::Exists { selector } => json!({ "exists": selector }),
            Action::Visible { selector, check } => with_check(json!({ "visible": selector }), check),
            Action::WaitFor { selector, timeout_ms } => {
                json!({ "waitFor": selector, "timeout": timeout_ms })
            }
            Action::WaitForVisible {
                selector,
                timeout_ms,
                check,
            } => with_check(json!({ "waitForVisible": selector, "timeout": timeout_ms }), check),
            Action::Click { selector, all } => {
                let mut v = json!({ "click": selector });
                if *all {
                    v["all"] = json!(true);
                }
                v
            }
            Action::WaitForThenClick {
                selector,
                timeout_ms,
                check,
            } => with_check(json!({ "waitForThenClick": selector, "timeout": timeout_ms }), check),
            Action::Hide { selector, method } => {
                let mut v = json!({ "hide": selector });
                if let Some(method) = method {
                    v["method"] = json!(method);
                }
                v
            }
            Action::CookieContains { substring } => json!({ "cookieContains": substring }),
            Action::Eval { key } => json!({ "eval": key }),
            Action::IfThenElse {
                condition,
                then_actions,
                else_actions,
            } => json!({
                "if": condition.to_action().to_value(),
                "then": then_actions,
                "else": else_actions,
            }),
            Action::Wait { duration_ms } => json!({ "wait": duration_ms }),
        }
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Decode an action list, dropping entries of unknown shape. `null` is an empty list.
pub fn parse_action_list(value: &Value) -> Result<ActionList> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => {
            let mut actions = Vec::with_capacity(items.len());
            for item in items {
                if let Some(action) = Action::from_value(item)? {
                    actions.push(action);
                }
            }
            Ok(actions)
        }
        other => Err(Error::Config(format!("action list must be an array, got {}", other))),
    }
}

fn deserialize_actions<'de, D>(deserializer: D) -> std::result::Result<ActionList, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_action_list(&value).map_err(serde::de::Error::custom)
}

mod url_pattern {
    use regex::Regex;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(pattern: &Option<Regex>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(pattern.as_ref().map_or("", |re| re.as_str()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Regex>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(pattern) => Regex::new(pattern)
                .map(Some)
                .map_err(|e| serde::de::Error::custom(format!("invalid urlPattern '{}': {}", pattern, e))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    /// Compiled once at load; `None` matches every URL.
    #[serde(default, with = "url_pattern")]
    pub url_pattern: Option<Regex>,
}

impl RunContext {
    pub fn url_matches(&self, url: &str) -> bool {
        self.url_pattern.as_ref().map_or(true, |re| re.is_match(url))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsentRule {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "detectCMP", default, deserialize_with = "deserialize_actions")]
    pub detect_cmp: ActionList,
    #[serde(rename = "detectPopup", default, deserialize_with = "deserialize_actions")]
    pub detect_popup: ActionList,
    #[serde(rename = "optIn", default, deserialize_with = "deserialize_actions")]
    pub opt_in: ActionList,
    #[serde(rename = "optOut", default, deserialize_with = "deserialize_actions")]
    pub opt_out: ActionList,
    #[serde(rename = "runContext", default)]
    pub run_context: RunContext,
}

/// The full rule document. Immutable once loaded and shared read-only between page sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(rename = "autoconsent", default)]
    pub rules: Vec<ConsentRule>,
}

impl RuleSet {
    pub fn from_slice(source: &[u8]) -> Result<Self> {
        serde_json::from_slice(source).map_err(|e| Error::Config(format!("invalid rule document: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read(path)
            .map_err(|e| Error::Config(format!("cannot read rules from {}: {}", path.display(), e)))?;
        let rules = Self::from_slice(&source)?;
        info!(path = %path.display(), rules = rules.len(), "Loaded consent rules");
        Ok(rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConsentRule> {
        self.rules.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ConsentRule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(value: Value) -> Action {
        Action::from_value(&value).unwrap().expect("recognised action")
    }

    #[test]
    fn test_parse_each_kind() {
        assert_eq!(parse_one(json!({"exists": "#cmp"})), Action::Exists { selector: "#cmp".into() });
        assert_eq!(
            parse_one(json!({"visible": "#cmp", "check": "any"})),
            Action::Visible { selector: "#cmp".into(), check: Some("any".to_string()) }
        );
        assert_eq!(
            parse_one(json!({"click": ["#host", "button"], "all": true})),
            Action::Click {
                selector: ElementSelector::Path(vec!["#host".to_string(), "button".to_string()]),
                all: true,
            }
        );
        assert_eq!(
            parse_one(json!({"hide": "#overlay", "method": "opacity"})),
            Action::Hide { selector: "#overlay".to_string(), method: Some("opacity".to_string()) }
        );
        assert_eq!(
            parse_one(json!({"cookieContains": "euconsent"})),
            Action::CookieContains { substring: "euconsent".to_string() }
        );
        assert_eq!(parse_one(json!({"eval": "ONETRUST_REJECT_ALL"})), Action::Eval { key: "ONETRUST_REJECT_ALL".to_string() });
        assert_eq!(parse_one(json!({"wait": 500})), Action::Wait { duration_ms: 500 });
    }

    #[test]
    fn test_wait_actions_default_timeout() {
        assert_eq!(
            parse_one(json!({"waitFor": "#cmp"})),
            Action::WaitFor { selector: "#cmp".into(), timeout_ms: DEFAULT_TIMEOUT_MS }
        );
        assert_eq!(
            parse_one(json!({"waitForVisible": "#cmp", "timeout": 0})),
            Action::WaitForVisible { selector: "#cmp".into(), timeout_ms: DEFAULT_TIMEOUT_MS, check: None }
        );
        assert_eq!(
            parse_one(json!({"waitForThenClick": "#reject", "timeout": 2500})),
            Action::WaitForThenClick { selector: "#reject".into(), timeout_ms: 2500, check: None }
        );
    }

    #[test]
    fn test_key_precedence() {
        // `exists` wins over `click` when both are present.
        assert_eq!(
            parse_one(json!({"click": "#b", "exists": "#a"})),
            Action::Exists { selector: "#a".into() }
        );
        // A null key does not count as present.
        assert_eq!(parse_one(json!({"exists": null, "wait": 10})), Action::Wait { duration_ms: 10 });
    }

    #[test]
    fn test_unknown_shapes_are_skipped() {
        let list = parse_action_list(&json!([
            {"exists": "#a"},
            {"negated": true, "futureAction": "#x"},
            {"click": "#b"}
        ]))
        .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].kind(), "exists");
        assert_eq!(list[1].kind(), "click");
    }

    #[test]
    fn test_if_then_else() {
        let action = parse_one(json!({
            "if": {"exists": "#banner"},
            "then": [{"click": "#reject"}],
            "else": [{"wait": 100}, {"click": "#close"}]
        }));
        match action {
            Action::IfThenElse { condition, then_actions, else_actions } => {
                assert_eq!(condition, Condition::Exists { selector: "#banner".into() });
                assert_eq!(then_actions.len(), 1);
                assert_eq!(else_actions.len(), 2);
            }
            other => panic!("unexpected action {:?}", other),
        }

        let no_else = parse_one(json!({"if": {"visible": "#banner"}, "then": []}));
        assert!(matches!(no_else, Action::IfThenElse { ref else_actions, .. } if else_actions.is_empty()));
    }

    #[test]
    fn test_if_condition_restricted() {
        let err = Action::from_value(&json!({"if": {"click": "#x"}, "then": []})).unwrap_err();
        assert!(err.to_string().contains("unsupported 'if' condition"));
        assert!(Action::from_value(&json!({"if": "#x"})).is_err());
    }

    #[test]
    fn test_bad_selector_shape_is_config_error() {
        assert!(Action::from_value(&json!({"exists": 7})).is_err());
        assert!(Action::from_value(&json!({"click": {"css": "#a"}})).is_err());
        assert!(parse_action_list(&json!([42])).is_err());
    }

    #[test]
    fn test_rule_document() {
        let doc = br##"{
          "autoconsent": [
            {
              "name": "example-cmp",
              "runContext": { "urlPattern": "^https://(www\\.)?example\\.com/", "main": true },
              "prehideSelectors": ["#cmp-root"],
              "detectCMP": [{ "exists": "#cmp-root" }],
              "detectPopup": [{ "visible": "#cmp-root" }],
              "optIn": [{ "click": "#accept-all" }],
              "optOut": [{ "waitForThenClick": "#reject-all" }]
            },
            { "name": "bare" }
          ]
        }"##;
        let rules = RuleSet::from_slice(doc).unwrap();
        assert_eq!(rules.len(), 2);

        let rule = rules.get("example-cmp").unwrap();
        assert_eq!(rule.detect_cmp.len(), 1);
        assert_eq!(rule.detect_popup.len(), 1);
        assert_eq!(rule.opt_in.len(), 1);
        assert!(rule.run_context.url_matches("https://www.example.com/news"));
        assert!(!rule.run_context.url_matches("https://other.org/"));

        let bare = rules.get("bare").unwrap();
        assert!(bare.detect_cmp.is_empty());
        assert!(bare.run_context.url_matches("https://anything.test/"));
    }

    #[test]
    fn test_empty_url_pattern_matches_everything() {
        let rules = RuleSet::from_slice(br#"{"autoconsent": [{"name": "a", "runContext": {"urlPattern": ""}}]}"#).unwrap();
        assert!(rules.rules[0].run_context.url_pattern.is_none());
        assert!(rules.rules[0].run_context.url_matches("about:blank"));
    }

    #[test]
    fn test_invalid_url_pattern_fails_load() {
        let err = RuleSet::from_slice(br#"{"autoconsent": [{"name": "a", "runContext": {"urlPattern": "(unclosed"}}]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_round_trip_preserves_behaviour() {
        let doc = json!({
            "autoconsent": [{
                "name": "round-trip",
                "runContext": { "urlPattern": "consent\\.example" },
                "detectCMP": [{ "exists": ["#host", "xpath/.//div[@id='cmp']"] }, { "cookieContains": "cmp=" }],
                "detectPopup": [{ "waitForVisible": "#cmp", "timeout": 3000, "check": "all" }],
                "optIn": [],
                "optOut": [
                    { "hide": "#cmp", "method": "display" },
                    { "if": { "visible": "#settings" },
                      "then": [{ "click": ".toggle", "all": true }, { "eval": "EVAL_CLOSE" }],
                      "else": [{ "waitForThenClick": "#reject" }] },
                    { "wait": 250 }
                ]
            }]
        });
        let parsed = RuleSet::from_slice(doc.to_string().as_bytes()).unwrap();
        let encoded = serde_json::to_vec(&parsed).unwrap();
        let reparsed = RuleSet::from_slice(&encoded).unwrap();

        let (a, b) = (&parsed.rules[0], &reparsed.rules[0]);
        assert_eq!(a.name, b.name);
        assert_eq!(a.detect_cmp, b.detect_cmp);
        assert_eq!(a.detect_popup, b.detect_popup);
        assert_eq!(a.opt_in, b.opt_in);
        assert_eq!(a.opt_out, b.opt_out);
        assert_eq!(
            a.run_context.url_pattern.as_ref().map(|r| r.as_str()),
            b.run_context.url_pattern.as_ref().map(|r| r.as_str())
        );
        // The wait-then-click without a timeout was materialised with the default.
        match &b.opt_out[1] {
            Action::IfThenElse { else_actions, .. } => assert_eq!(
                else_actions[0],
                Action::WaitForThenClick { selector: "#reject".into(), timeout_ms: DEFAULT_TIMEOUT_MS, check: None }
            ),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, r##"{"autoconsent": [{"name": "x", "detectCMP": [{"exists": "#x"}]}]}"##).unwrap();
        let rules = RuleSet::load(&path).unwrap();
        assert_eq!(rules.len(), 1);

        assert!(RuleSet::load(&dir.path().join("missing.json")).is_err());
    }
}

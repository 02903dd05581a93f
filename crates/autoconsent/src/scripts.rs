//! Fixed catalog of page scripts addressable from `eval` actions, plus the style
//! injection used by `hide`.
//!
//! Rules can only name a script; they never carry script source. The keys and bodies
//! belong to pagescout: each entry performs its action and returns nothing. Upstream
//! autoconsent `EVAL_*` keys are boolean checks with different bodies and are not
//! recognised here.

/// Catalog entries are function bodies; see [`wrap`].
const EVAL_SNIPPETS: &[(&str, &str)] = &[
    (
        "ONETRUST_REJECT_ALL",
        "if (window.OneTrust && typeof window.OneTrust.RejectAll === 'function') { window.OneTrust.RejectAll(); }",
    ),
    (
        "COOKIEBOT_DECLINE",
        "if (window.Cookiebot && typeof window.Cookiebot.decline === 'function') { window.Cookiebot.decline(); }",
    ),
    (
        "COOKIEBOT_HIDE",
        "if (window.Cookiebot && typeof window.Cookiebot.hide === 'function') { window.Cookiebot.hide(); }",
    ),
    (
        "USERCENTRICS_DENY_ALL",
        "if (window.UC_UI && typeof window.UC_UI.denyAllConsents === 'function') { window.UC_UI.denyAllConsents(); }",
    ),
    (
        "DIDOMI_DISAGREE_ALL",
        "if (window.Didomi && typeof window.Didomi.setUserDisagreeToAll === 'function') { window.Didomi.setUserDisagreeToAll(); }",
    ),
    (
        "KLARO_DECLINE_ALL",
        "if (window.klaro && typeof window.klaro.getManager === 'function') { const m = window.klaro.getManager(); m.changeAll(false); m.saveAndApplyConsents(); }",
    ),
    (
        "TCF_REJECT_ALL",
        "if (typeof window.__tcfapi === 'function') { window.__tcfapi('rejectAll', 2, () => {}); }",
    ),
    (
        "SCROLL_UNLOCK",
        "for (const el of [document.documentElement, document.body]) { if (el) { el.style.setProperty('overflow', 'auto', 'important'); el.style.removeProperty('position'); } }",
    ),
];

pub fn lookup(key: &str) -> Option<&'static str> {
    EVAL_SNIPPETS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, body)| *body)
}

pub fn keys() -> impl Iterator<Item = &'static str> {
    EVAL_SNIPPETS.iter().map(|(name, _)| *name)
}

/// Turn a function body into an immediately invoked expression.
pub fn wrap(body: &str) -> String {
    format!("(()=>{{{}}})()", body)
}

/// Script that appends a style sheet hiding everything matched by `selector`.
///
/// `method` is `display` (the default) or `opacity`; the latter keeps layout intact.
pub fn hide_script(selector: &str, method: Option<&str>) -> String {
    let declarations = match method {
        Some("opacity") => "opacity: 0 !important; z-index: -1 !important; pointer-events: none !important;",
        _ => "display: none !important;",
    };
    let css = format!("{} {{ {} }}", selector, declarations);
    let css_literal = serde_json::to_string(&css).unwrap_or_else(|_| "\"\"".to_string());
    wrap(&format!(
        "const style = document.createElement('style'); \
         style.setAttribute('data-pagescout-hide', ''); \
         style.textContent = {}; \
         (document.head || document.documentElement).appendChild(style);",
        css_literal
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown() {
        assert!(lookup("ONETRUST_REJECT_ALL").unwrap().contains("RejectAll"));
        assert!(lookup("EVAL_DOES_NOT_EXIST").is_none());
        assert!(keys().all(|k| !k.starts_with("EVAL_")));
        assert!(lookup("EVAL_ONETRUST_1").is_none());
        assert!(keys().any(|k| k == "KLARO_DECLINE_ALL"));
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("return 1;"), "(()=>{return 1;})()");
    }

    #[test]
    fn test_hide_script_escapes_selector() {
        let script = hide_script(r#"div[data-x="a"]"#, None);
        assert!(script.contains(r#"div[data-x=\"a\"] { display: none !important; }"#));

        let script = hide_script("#cmp", Some("opacity"));
        assert!(script.contains("opacity: 0 !important"));
        assert!(!script.contains("display: none"));
    }
}

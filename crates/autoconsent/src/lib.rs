//! Consent-management popup handling.
//!
//! A rule document (the autoconsent JSON format) describes, per consent platform,
//! how to recognise its dialog and how to opt out of tracking. Rules are parsed once
//! into a [`RuleSet`], then for every page load [`ConsentManager::apply_opt_out`]
//! picks the first matching rule and replays its opt-out actions through a
//! [`PageDriver`].

pub mod driver;
pub mod engine;
pub mod interpreter;
pub mod rule;
pub mod scripts;
pub mod selector;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use driver::{NodeHandle, PageDriver};
pub use engine::{select_rule, ConsentManager};
pub use interpreter::{execute, Mode, POLL_INTERVAL};
pub use rule::{Action, ActionList, Condition, ConsentRule, RuleSet, RunContext, DEFAULT_TIMEOUT_MS};
pub use selector::ElementSelector;

use pagescout_autoconsent::{scripts, Action, RuleSet};
use pagescout_core::Paths;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, PartialEq)]
struct Summary {
    rules: usize,
    actions: usize,
    /// Rules that can never be selected.
    without_detection: Vec<String>,
    /// `(rule, key)` pairs naming scripts missing from the catalog.
    unknown_evals: Vec<(String, String)>,
}

fn visit<'a>(actions: &'a [Action], count: &mut usize, evals: &mut Vec<&'a str>) {
    for action in actions {
        *count += 1;
        match action {
            Action::Eval { key } => evals.push(key),
            Action::IfThenElse {
                then_actions,
                else_actions,
                ..
            } => {
                visit(then_actions, count, evals);
                visit(else_actions, count, evals);
            }
            _ => {}
        }
    }
}

fn summarize(rules: &RuleSet) -> Summary {
    let mut summary = Summary {
        rules: rules.len(),
        ..Default::default()
    };
    for rule in rules.iter() {
        if rule.detect_cmp.is_empty() {
            summary.without_detection.push(rule.name.clone());
        }
        let mut evals = Vec::new();
        for list in [&rule.detect_cmp, &rule.detect_popup, &rule.opt_in, &rule.opt_out] {
            visit(list, &mut summary.actions, &mut evals);
        }
        for key in evals {
            if scripts::lookup(key).is_none() {
                summary.unknown_evals.push((rule.name.clone(), key.to_string()));
            }
        }
    }
    summary
}

pub fn check(config_path: Option<&Path>, path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => super::load_config(config_path)?.rules_path(&Paths::new()),
    };
    let rules = RuleSet::load(&path)?;
    let summary = summarize(&rules);

    println!("Rules:   {}", path.display());
    println!("Count:   {} rules, {} actions", summary.rules, summary.actions);
    if !summary.without_detection.is_empty() {
        println!();
        println!("Never selected (empty detectCMP):");
        for name in &summary.without_detection {
            println!("  {}", name);
        }
    }
    if !summary.unknown_evals.is_empty() {
        println!();
        println!("Unknown eval scripts (skipped at run time):");
        for (rule, key) in &summary.unknown_evals {
            println!("  {:<30} {}", rule, key);
        }
    }
    Ok(())
}

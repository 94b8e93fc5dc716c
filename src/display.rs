//! Plan and report rendering

use colored::Colorize;
use declarative::{ActionKind, ApplyReport, Attributes, Outcome, Plan};
use similar::{ChangeTag, TextDiff};

/// Print a plan for review
pub fn print_plan(plan: &Plan, environment: &str) {
    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        format!("Plan for '{environment}'").bold()
    );
    println!("│");

    if plan.is_empty() {
        println!("│   {} No changes. Infrastructure matches the configuration.", "✓".green());
        println!("└─────────────────────────────────────────────────────┘");
        return;
    }

    for action in plan.iter() {
        println!(
            "│   {} {:<30} {}",
            symbol(action.kind),
            action.name,
            action.resource_type.dimmed()
        );

        match action.kind {
            ActionKind::Create => {
                let attributes = action.planned.as_ref().unwrap_or(&action.attributes);
                for line in attribute_lines(attributes) {
                    println!("│       {}", line.green());
                }
            }
            ActionKind::Update => {
                let before = action.prior.clone().unwrap_or_default();
                let after = action.planned.as_ref().unwrap_or(&action.attributes);
                for line in diff_lines(&before, after) {
                    let styled = if line.starts_with('+') {
                        line.green()
                    } else {
                        line.red()
                    };
                    println!("│       {styled}");
                }
            }
            ActionKind::Delete => {
                if let Some(id) = &action.provider_id {
                    println!("│       {}", format!("id: {id}").dimmed());
                }
            }
        }

        if action.has_deferred_inputs() {
            let refs: Vec<String> = action.deferred.iter().map(ToString::to_string).collect();
            println!("│       {} {}", "(known after apply)".dimmed(), refs.join(", ").dimmed());
        }
    }

    let summary = plan.summary();
    println!("│");
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Plan: {} to create, {} to update, {} to delete",
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.delete.to_string().red()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

fn symbol(kind: ActionKind) -> colored::ColoredString {
    match kind {
        ActionKind::Create => "+".green(),
        ActionKind::Update => "~".yellow(),
        ActionKind::Delete => "-".red(),
    }
}

fn pretty(attributes: &Attributes) -> String {
    let mut text = serde_json::to_string_pretty(attributes).unwrap_or_default();
    text.push('\n');
    text
}

/// Attributes of a new resource, one `key = value` per line
fn attribute_lines(attributes: &Attributes) -> Vec<String> {
    attributes
        .iter()
        .map(|(key, value)| format!("+ {key} = {value}"))
        .collect()
}

/// Changed lines between two attribute sets, prefixed with `-` or `+`
pub fn diff_lines(before: &Attributes, after: &Attributes) -> Vec<String> {
    let old = pretty(before);
    let new = pretty(after);
    let diff = TextDiff::from_lines(&old, &new);

    diff.iter_all_changes()
        .filter_map(|change| {
            let prefix = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => return None,
            };
            Some(format!("{prefix} {}", change.value().trim()))
        })
        .collect()
}

/// Print per-resource problems and the final summary
pub fn print_report(report: &ApplyReport) {
    let problems: Vec<_> = report
        .results
        .iter()
        .filter(|r| !r.outcome.is_success())
        .collect();

    if !problems.is_empty() {
        println!();
        for result in problems {
            match &result.outcome {
                Outcome::Failed { reason } => println!(
                    "    {} {} {} ({}): {}",
                    "✗".red(),
                    result.kind,
                    result.name,
                    result.resource_type,
                    reason
                ),
                Outcome::Skipped { reason } => println!(
                    "    {} {} {} ({}): {}",
                    "⊘".dimmed(),
                    result.kind,
                    result.name,
                    result.resource_type,
                    reason.dimmed()
                ),
                Outcome::Succeeded => {}
            }
        }
    }

    let summary = report.summary();
    println!();
    if summary.is_success() {
        println!("  {} Apply complete!", "✓".green().bold());
    } else {
        println!("  {} Apply finished with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

//! `state list`, `state show`, `state rm` and `state unlock`

use anyhow::{Result, bail};
use colored::Colorize;
use declarative::{StateRecord, StateSnapshot, StateStore};

use super::{Session, Status};
use crate::Context;
use crate::cli::StateCommand;
use crate::ui;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<Status> {
    let session = Session::open(ctx)?;
    match cmd {
        StateCommand::List => list(ctx, &session),
        StateCommand::Show { name, json } => show(&session, &name, json),
        StateCommand::Rm { name, yes } => rm(&session, &name, yes),
        StateCommand::Unlock { yes } => unlock(ctx, &session, yes),
    }
}

fn list(ctx: &Context, session: &Session) -> Result<Status> {
    let snapshot = session.store.load()?;
    ui::header(&format!("State for '{}'", ctx.env));

    if snapshot.is_empty() {
        ui::dim("No resources recorded");
        return Ok(Status::Success);
    }

    for record in snapshot.records.values() {
        println!(
            "  {:<24} {:<16} {}",
            record.name.bold(),
            record.resource_type,
            ui::truncate(&record.provider_id, 40).dimmed()
        );
    }
    println!();
    ui::dim(&format!("{} resources in {}", snapshot.len(), session.store.dir().display()));
    Ok(Status::Success)
}

fn show(session: &Session, name: &str, json: bool) -> Result<Status> {
    let snapshot = session.store.load()?;
    let Some(record) = snapshot.get(name) else {
        bail!("No resource named '{name}' in state");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(Status::Success);
    }

    print_record(record)?;
    Ok(Status::Success)
}

fn print_record(record: &StateRecord) -> Result<()> {
    ui::header(&record.name);
    ui::kv("type", &record.resource_type);
    ui::kv("id", &record.provider_id);
    ui::kv("applied", &record.applied_at.to_rfc3339());
    if !record.depends_on.is_empty() {
        ui::kv("depends on", &record.depends_on.join(", "));
    }

    println!();
    println!("  {}", "attributes".dimmed());
    for line in serde_json::to_string_pretty(&record.attributes)?.lines() {
        println!("    {line}");
    }
    println!("  {}", "outputs".dimmed());
    for line in serde_json::to_string_pretty(&record.outputs)?.lines() {
        println!("    {line}");
    }
    Ok(())
}

/// Names of recorded resources that depend on `name`
fn dependents(snapshot: &StateSnapshot, name: &str) -> Vec<String> {
    snapshot
        .records
        .values()
        .filter(|r| r.depends_on.iter().any(|d| d == name))
        .map(|r| r.name.clone())
        .collect()
}

fn rm(session: &Session, name: &str, yes: bool) -> Result<Status> {
    let _lock = session.lock()?;
    let snapshot = session.store.load()?;
    if !snapshot.contains(name) {
        bail!("No resource named '{name}' in state");
    }

    let dependents = dependents(&snapshot, name);
    if !dependents.is_empty() {
        ui::warn(&format!("Recorded resources depend on '{name}': {}", dependents.join(", ")));
    }

    if !yes && !ui::confirm(&format!("Forget '{name}'? The resource itself is left in place"))? {
        ui::warn("Aborted");
        return Ok(Status::Aborted);
    }

    session.store.remove(name)?;
    ui::success(&format!("Removed '{name}' from state"));
    Ok(Status::Success)
}

fn unlock(ctx: &Context, session: &Session, yes: bool) -> Result<Status> {
    if !session.store.lock_path().exists() {
        ui::success(&format!("State for '{}' is not locked", ctx.env));
        return Ok(Status::Success);
    }

    ui::warn("Only release the lock when no other run is using this environment");
    if !yes && !ui::confirm(&format!("Release the state lock for '{}'?", ctx.env))? {
        ui::warn("Aborted");
        return Ok(Status::Aborted);
    }

    match session.store.force_unlock()? {
        Some(holder) => ui::success(&format!("Released lock held by {holder}")),
        None => ui::success(&format!("State for '{}' is not locked", ctx.env)),
    }
    Ok(Status::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(name: &str, depends_on: &[&str]) -> StateRecord {
        StateRecord {
            name: name.into(),
            resource_type: "network".into(),
            attributes: Default::default(),
            provider_id: format!("{name}-1"),
            outputs: Default::default(),
            depends_on: depends_on.iter().map(ToString::to_string).collect(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn test_dependents() {
        let mut snapshot = StateSnapshot::default();
        snapshot.insert(record("network", &[]));
        snapshot.insert(record("database", &["network"]));
        snapshot.insert(record("service", &["network", "database"]));

        assert_eq!(dependents(&snapshot, "network"), vec!["database", "service"]);
        assert_eq!(dependents(&snapshot, "database"), vec!["service"]);
        assert!(dependents(&snapshot, "service").is_empty());
    }
}

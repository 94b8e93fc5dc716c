//! `plan`, `apply` and `destroy`

use anyhow::{Context as AnyhowContext, Result};
use declarative::{ExecuteOptions, Plan, ResourceGraph, RetryConfig, StateSnapshot, StateStore};
use std::time::{Duration, Instant};

use super::{Session, Status};
use crate::Context;
use crate::cli::{ApplyArgs, PlanArgs};
use crate::config::Manifest;
use crate::display;
use crate::interrupt;
use crate::progress::ApplyProgress;
use crate::ui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Converge,
    Destroy,
}

fn compute(mode: Mode, graph: &ResourceGraph, snapshot: &StateSnapshot) -> Result<Plan> {
    let plan = match mode {
        Mode::Converge => declarative::plan(graph, snapshot)?,
        Mode::Destroy => declarative::plan_destroy(graph, snapshot)?,
    };
    Ok(plan)
}

/// Print what apply (or destroy) would do
pub fn plan(ctx: &Context, args: PlanArgs) -> Result<Status> {
    let session = Session::open(ctx)?;
    let graph = session.manifest.graph()?;
    let snapshot = session.store.load()?;
    let mode = if args.destroy { Mode::Destroy } else { Mode::Converge };

    let plan = compute(mode, &graph, &snapshot)?;
    declarative::preflight(&plan, &session.providers())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        display::print_plan(&plan, &ctx.env);
    }
    Ok(Status::Success)
}

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<Status> {
    run(ctx, args, Mode::Converge)
}

pub fn destroy(ctx: &Context, args: &ApplyArgs) -> Result<Status> {
    run(ctx, args, Mode::Destroy)
}

fn run(ctx: &Context, args: &ApplyArgs, mode: Mode) -> Result<Status> {
    let session = Session::open(ctx)?;
    let graph = session.manifest.graph()?;

    // Held until the run is over
    let _lock = session.lock()?;
    let snapshot = session.store.load()?;

    let plan = compute(mode, &graph, &snapshot)?;
    let providers = session.providers();
    declarative::preflight(&plan, &providers)?;

    display::print_plan(&plan, &ctx.env);
    if plan.is_empty() {
        return Ok(Status::Success);
    }

    if !args.yes {
        let prompt = match mode {
            Mode::Converge => format!("Apply {} changes to '{}'?", plan.len(), ctx.env),
            Mode::Destroy => format!("Destroy {} resources in '{}'?", plan.len(), ctx.env),
        };
        let confirmed = ui::confirm(&prompt).context("Confirmation needs a terminal; pass --yes to skip it")?;
        if !confirmed {
            ui::warn("Aborted, nothing was changed");
            return Ok(Status::Aborted);
        }
    }

    let options = execute_options(&session.manifest, args);
    log::info!(
        "Running with {} jobs, timeout {:?}, {} attempts",
        options.jobs,
        options.timeout,
        options.retry.max_attempts
    );

    interrupt::install(session.deploy.cancel.clone())?;

    let started = Instant::now();
    let mut progress = ApplyProgress::new(ctx.quiet);
    let report = declarative::apply(&plan, &session.deploy, &providers, &session.store, &options, &mut progress)?;

    display::print_report(&report);
    ui::dim(&format!("Finished in {:.1}s", started.elapsed().as_secs_f64()));

    if report.is_success() {
        Ok(Status::Success)
    } else {
        Ok(Status::Partial)
    }
}

/// Manifest settings with command-line overrides applied
fn execute_options(manifest: &Manifest, args: &ApplyArgs) -> ExecuteOptions {
    let mut options = manifest.execute_options();
    if let Some(jobs) = args.jobs {
        options.jobs = jobs.max(1);
    }
    if let Some(secs) = args.timeout {
        options.timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(attempts) = args.max_attempts {
        options.retry = RetryConfig {
            max_attempts: attempts.max(1),
            ..options.retry
        };
    }
    options.fail_fast = args.fail_fast;
    options
}

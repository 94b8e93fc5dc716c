//! Execution engine - applies a plan on a worker pool
//!
//! The calling thread is the coordinator. It owns the readiness counters and
//! the state store, hands ready actions to rayon workers and receives their
//! results over a channel. Workers only ever talk to providers, so every
//! state write happens on one thread, before any dependent is released.

use crate::context::{DeployContext, NoProgress, ProgressCallback};
use crate::error::{Error, ProviderError, Result, ValidationError};
use crate::planner::{Action, Plan};
use crate::provider::{CallContext, Created, Provider, ProviderResolver};
use crate::reference::{Reference, resolve_attributes};
use crate::retry::{RetryCallback, with_retry};
use crate::state::{StateRecord, StateSnapshot, StateStore};
use crate::types::{ActionKind, ApplyReport, Attributes, ExecuteOptions, Outcome, Outputs, ResourceResult};
use chrono::Utc;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

/// Apply a plan
///
/// # Arguments
/// * `plan` - The plan to run
/// * `ctx` - Environment, credentials and cancellation token
/// * `resolver` - Maps resource types to providers
/// * `store` - Receives one commit per successful action
/// * `options` - Worker count, timeout, retry policy, fail-fast
/// * `progress` - Progress callback, driven from the calling thread
///
/// # Returns
/// One result per action, in plan order. Provider failures do not make this
/// return `Err`; they are reported per resource. `Err` means nothing ran
/// (validation, state load, pool creation).
pub fn apply<P: ProgressCallback>(
    plan: &Plan,
    ctx: &DeployContext,
    resolver: &dyn ProviderResolver,
    store: &dyn StateStore,
    options: &ExecuteOptions,
    progress: &mut P,
) -> Result<ApplyReport> {
    preflight(plan, resolver)?;

    progress.on_start(plan.len());
    if plan.is_empty() {
        progress.on_finish();
        return Ok(ApplyReport::default());
    }

    let snapshot = store.load()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .thread_name(|i| format!("apply-worker-{i}"))
        .build()
        .map_err(|e| Error::Pool(e.to_string()))?;

    log::debug!(
        "Applying {} actions in environment '{}' with {} workers",
        plan.len(),
        ctx.environment,
        options.jobs.max(1)
    );

    let mut run = Run::new(plan, ctx, resolver, store, options, snapshot, progress);
    let (tx, rx) = mpsc::channel();
    pool.in_place_scope(|scope| run.drive(scope, &tx, &rx));

    Ok(run.finish())
}

/// Apply without progress reporting
pub fn apply_simple(
    plan: &Plan,
    ctx: &DeployContext,
    resolver: &dyn ProviderResolver,
    store: &dyn StateStore,
    options: &ExecuteOptions,
) -> Result<ApplyReport> {
    apply(plan, ctx, resolver, store, options, &mut NoProgress)
}

/// Reject plans that use a resource type no provider handles
pub fn preflight(plan: &Plan, resolver: &dyn ProviderResolver) -> std::result::Result<(), ValidationError> {
    match plan.iter().find(|a| resolver.resolve(&a.resource_type).is_none()) {
        Some(action) => Err(ValidationError::UnknownResourceType {
            resource: action.name.clone(),
            resource_type: action.resource_type.clone(),
        }),
        None => Ok(()),
    }
}

/// Messages from workers to the coordinator
enum Event {
    Retrying {
        index: usize,
        attempt: u32,
        error: ProviderError,
        delay: Duration,
    },
    Finished {
        index: usize,
        attempts: u32,
        result: std::result::Result<Applied, ProviderError>,
    },
}

enum Applied {
    Created(Created),
    Updated(Outputs),
    Deleted,
}

/// Forwards retry notifications to the coordinator
struct RetryReporter {
    index: usize,
    tx: Sender<Event>,
}

impl RetryCallback for RetryReporter {
    fn on_retry(&self, attempt: u32, error: &ProviderError, delay: Duration) {
        let _ = self.tx.send(Event::Retrying {
            index: self.index,
            attempt,
            error: error.clone(),
            delay,
        });
    }
}

/// One provider call, ready to run on a worker
struct Job<'a> {
    index: usize,
    action: &'a Action,
    provider: &'a dyn Provider,
    attributes: Attributes,
}

impl Job<'_> {
    fn run(&self, ctx: &DeployContext, options: &ExecuteOptions, tx: &Sender<Event>) {
        let reporter = RetryReporter {
            index: self.index,
            tx: tx.clone(),
        };
        let attempted = with_retry(&options.retry, &reporter, |_| self.call_guarded(ctx, options.timeout));
        let _ = tx.send(Event::Finished {
            index: self.index,
            attempts: attempted.attempts,
            result: attempted.result,
        });
    }

    /// A panicking provider fails its action instead of the whole run
    fn call_guarded(&self, ctx: &DeployContext, timeout: Option<Duration>) -> std::result::Result<Applied, ProviderError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.call(ctx, timeout))).unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown cause".to_string());
            Err(ProviderError::permanent(format!("provider panicked: {message}")))
        })
    }

    fn call(&self, ctx: &DeployContext, timeout: Option<Duration>) -> std::result::Result<Applied, ProviderError> {
        let call = CallContext {
            resource: &self.action.name,
            resource_type: &self.action.resource_type,
            environment: &ctx.environment,
            credentials: &ctx.credentials,
            deadline: timeout.map(|t| Instant::now() + t),
            timeout,
            cancel: &ctx.cancel,
        };

        match self.action.kind {
            ActionKind::Create => self.provider.create(&call, &self.attributes).map(Applied::Created),
            ActionKind::Update => self
                .provider
                .update(&call, self.provider_id()?, &self.attributes)
                .map(Applied::Updated),
            ActionKind::Delete => self
                .provider
                .delete(&call, self.provider_id()?)
                .map(|()| Applied::Deleted),
        }
    }

    fn provider_id(&self) -> std::result::Result<&str, ProviderError> {
        self.action
            .provider_id
            .as_deref()
            .ok_or_else(|| ProviderError::permanent(format!("no provider id recorded for '{}'", self.action.name)))
    }
}

/// Coordinator state for one apply
struct Run<'a, P> {
    plan: &'a Plan,
    ctx: &'a DeployContext,
    resolver: &'a dyn ProviderResolver,
    store: &'a dyn StateStore,
    options: &'a ExecuteOptions,
    progress: &'a mut P,
    /// Recorded state as it evolves during the run
    snapshot: StateSnapshot,
    successors: Vec<Vec<usize>>,
    /// Unfinished predecessors per action
    remaining: Vec<usize>,
    /// Resolved attributes of dispatched actions
    inputs: Vec<Option<Attributes>>,
    results: Vec<Option<ResourceResult>>,
    ready: BinaryHeap<Reverse<usize>>,
    running: usize,
}

impl<'a, P: ProgressCallback> Run<'a, P> {
    fn new(
        plan: &'a Plan,
        ctx: &'a DeployContext,
        resolver: &'a dyn ProviderResolver,
        store: &'a dyn StateStore,
        options: &'a ExecuteOptions,
        snapshot: StateSnapshot,
        progress: &'a mut P,
    ) -> Self {
        let remaining: Vec<usize> = plan.iter().map(|a| a.predecessors.len()).collect();
        let ready = remaining
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        Self {
            plan,
            ctx,
            resolver,
            store,
            options,
            progress,
            snapshot,
            successors: plan.successors(),
            remaining,
            inputs: vec![None; plan.len()],
            results: vec![None; plan.len()],
            ready,
            running: 0,
        }
    }

    fn drive<'s>(&mut self, scope: &rayon::Scope<'s>, tx: &Sender<Event>, rx: &Receiver<Event>)
    where
        'a: 's,
    {
        loop {
            while !self.ctx.cancel.is_cancelled() {
                let Some(Reverse(index)) = self.ready.pop() else {
                    break;
                };
                if self.results[index].is_some() {
                    continue;
                }
                if let Some(job) = self.prepare(index) {
                    self.running += 1;
                    let (ctx, options, tx) = (self.ctx, self.options, tx.clone());
                    scope.spawn(move |_| job.run(ctx, options, &tx));
                }
            }

            if self.running == 0 {
                break;
            }

            match rx.recv() {
                Ok(event) => self.handle(event),
                Err(_) => break,
            }
        }
    }

    /// Resolve inputs and build the job, or complete the action inline
    fn prepare(&mut self, index: usize) -> Option<Job<'a>> {
        let plan = self.plan;
        let resolver = self.resolver;
        let action = &plan.actions[index];

        self.progress.on_action_start(action);
        log::debug!("Dispatching {}", action.describe());

        let Some(provider) = resolver.resolve(&action.resource_type) else {
            self.fail(index, 0, format!("no provider for resource type '{}'", action.resource_type));
            return None;
        };

        let attributes = match action.kind {
            ActionKind::Delete => Attributes::new(),
            ActionKind::Create | ActionKind::Update => match self.resolve_inputs(action) {
                Ok(attributes) => attributes,
                Err(reason) => {
                    self.fail(index, 0, reason);
                    return None;
                }
            },
        };

        if action.kind == ActionKind::Update && action.prior.as_ref() == Some(&attributes) {
            log::info!("{} unchanged once deferred inputs resolved", action.name);
            self.succeed(index, 0);
            return None;
        }

        self.inputs[index] = Some(attributes.clone());
        Some(Job {
            index,
            action,
            provider,
            attributes,
        })
    }

    fn resolve_inputs(&self, action: &Action) -> std::result::Result<Attributes, String> {
        if let Some(planned) = &action.planned {
            return Ok(planned.clone());
        }
        resolve_attributes(&action.attributes, &|r: &Reference| self.snapshot.lookup(r)).map_err(|missing| {
            let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
            format!("unresolved references after dependencies applied: {}", names.join(", "))
        })
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Retrying {
                index,
                attempt,
                error,
                delay,
            } => {
                let action = &self.plan.actions[index];
                log::warn!(
                    "{} attempt {attempt} failed: {error}; retrying in {:.1}s",
                    action.describe(),
                    delay.as_secs_f64()
                );
                self.progress.on_retry(action, attempt, &error, delay);
            }
            Event::Finished {
                index,
                attempts,
                result,
            } => {
                self.running -= 1;
                let committed = result
                    .map_err(|e| e.to_string())
                    .and_then(|applied| self.commit(index, applied));
                match committed {
                    Ok(()) => self.succeed(index, attempts),
                    Err(reason) => self.fail(index, attempts, reason),
                }
            }
        }
    }

    /// Record the provider's answer in the state store
    fn commit(&mut self, index: usize, applied: Applied) -> std::result::Result<(), String> {
        let plan = self.plan;
        let action = &plan.actions[index];

        let (provider_id, outputs) = match applied {
            Applied::Deleted => {
                self.store
                    .remove(&action.name)
                    .map_err(|e| format!("deleted, but state update failed: {e}"))?;
                self.snapshot.remove(&action.name);
                log::debug!("Removed state for {}", action.name);
                return Ok(());
            }
            Applied::Created(created) => (created.id, created.outputs),
            Applied::Updated(outputs) => (action.provider_id.clone().unwrap_or_default(), outputs),
        };

        let record = StateRecord {
            name: action.name.clone(),
            resource_type: action.resource_type.clone(),
            attributes: self.inputs[index].take().unwrap_or_default(),
            provider_id,
            outputs,
            depends_on: action.depends_on.clone(),
            applied_at: Utc::now(),
        };
        self.store
            .commit(&record)
            .map_err(|e| format!("applied, but state update failed: {e}"))?;
        log::debug!("Committed state for {}", action.name);
        self.snapshot.insert(record);
        Ok(())
    }

    fn succeed(&mut self, index: usize, attempts: u32) {
        log::info!("{} succeeded", self.plan.actions[index].describe());
        self.finish_action(index, attempts, Outcome::Succeeded);

        for &next in &self.successors[index] {
            self.remaining[next] -= 1;
            if self.remaining[next] == 0 && self.results[next].is_none() {
                self.ready.push(Reverse(next));
            }
        }
    }

    /// Mark an action failed and skip everything downstream of it
    fn fail(&mut self, index: usize, attempts: u32, reason: String) {
        let plan = self.plan;
        let root = &plan.actions[index].name;
        log::error!("{} failed: {reason}", plan.actions[index].describe());
        self.finish_action(index, attempts, Outcome::Failed { reason });

        let mut queue: VecDeque<usize> = self.successors[index].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if self.results[next].is_some() {
                continue;
            }
            log::warn!("Skipping {}: dependency '{root}' failed", plan.actions[next].describe());
            self.finish_action(
                next,
                0,
                Outcome::Skipped {
                    reason: format!("dependency '{root}' failed"),
                },
            );
            queue.extend(self.successors[next].iter().copied());
        }

        if self.options.fail_fast {
            log::warn!("Fail-fast: no further actions will be started");
            self.ctx.cancel.cancel();
        }
    }

    fn finish_action(&mut self, index: usize, attempts: u32, outcome: Outcome) {
        let action = &self.plan.actions[index];
        self.progress.on_action_complete(action, &outcome);
        self.results[index] = Some(ResourceResult {
            name: action.name.clone(),
            resource_type: action.resource_type.clone(),
            kind: action.kind,
            outcome,
            attempts,
        });
    }

    /// Skip whatever cancellation left undispatched and build the report
    fn finish(mut self) -> ApplyReport {
        for index in 0..self.results.len() {
            if self.results[index].is_none() {
                log::warn!("Skipping {}: cancelled", self.plan.actions[index].describe());
                self.finish_action(
                    index,
                    0,
                    Outcome::Skipped {
                        reason: "cancelled".to_string(),
                    },
                );
            }
        }
        self.progress.on_finish();

        ApplyReport {
            results: self.results.into_iter().flatten().collect(),
        }
    }
}

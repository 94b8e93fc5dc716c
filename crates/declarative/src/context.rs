//! Deployment context and progress callbacks
//!
//! Everything a run needs beyond the plan itself (environment, credentials,
//! cancellation) travels in an explicit [`DeployContext`] instead of
//! process-wide globals.

use crate::error::ProviderError;
use crate::planner::Action;
use crate::types::Outcome;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Shared cancellation flag.
///
/// Cancelling stops the executor from dispatching further actions. Calls
/// already running are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Opaque handle naming the credentials providers should use.
///
/// The engine never reads secrets; it only hands the handle through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub profile: Option<String>,
}

impl Credentials {
    pub fn profile(profile: impl Into<String>) -> Self {
        Self {
            profile: Some(profile.into()),
        }
    }
}

/// Context threaded through planning and execution
#[derive(Debug, Clone)]
pub struct DeployContext {
    /// Environment selector (e.g. "dev", "prod")
    pub environment: String,
    pub credentials: Credentials,
    pub cancel: CancelToken,
}

impl DeployContext {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            credentials: Credentials::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Progress callback for execution.
///
/// All methods are called from the executor's coordinating thread, never
/// from the workers.
pub trait ProgressCallback {
    /// Called once before the first action is dispatched
    fn on_start(&mut self, total: usize);

    /// Called when an action is handed to a worker
    fn on_action_start(&mut self, action: &Action);

    /// Called when a transient error is about to be retried
    fn on_retry(&mut self, action: &Action, attempt: u32, error: &ProviderError, delay: Duration);

    /// Called when an action reaches a terminal outcome (including skips)
    fn on_action_complete(&mut self, action: &Action, outcome: &Outcome);

    /// Called after the last action
    fn on_finish(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&mut self, _total: usize) {}
    fn on_action_start(&mut self, _action: &Action) {}
    fn on_retry(&mut self, _action: &Action, _attempt: u32, _error: &ProviderError, _delay: Duration) {}
    fn on_action_complete(&mut self, _action: &Action, _outcome: &Outcome) {}
    fn on_finish(&mut self) {}
}

//! # Declarative
//!
//! A framework for declarative resource provisioning.
//!
//! This crate provides the core of a plan/apply engine: a dependency graph of
//! declared resources, a planner that diffs it against recorded state, and an
//! executor that converges external systems through providers.
//!
//! ## Core Concepts
//!
//! - **Declaration**: A named, typed resource with desired attributes
//! - **ResourceGraph**: Declarations plus their dependency edges (a DAG)
//! - **Plan**: Create/Update/Delete actions with explicit ordering edges
//! - **Provider**: The only component that touches external systems
//! - **StateStore**: Last-applied attributes, identifiers and outputs
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     Declaration, DeployContext, ExecuteOptions, MemoryStore, ProviderRegistry,
//!     ResourceGraph, StateStore, apply_simple, plan,
//! };
//!
//! let graph = ResourceGraph::from_declarations([
//!     Declaration::new("network", "network").attr("cidr", "10.0.0.0/16"),
//!     Declaration::new("database", "database").attr("vpc", "${network.id}"),
//! ])?;
//!
//! let store = MemoryStore::new();
//! let plan = plan(&graph, &store.load()?)?;
//!
//! let mut registry = ProviderRegistry::new();
//! registry.set_fallback(Box::new(MyProvider));
//!
//! let report = apply_simple(
//!     &plan,
//!     &DeployContext::new("dev"),
//!     &registry,
//!     &store,
//!     &ExecuteOptions::default(),
//! )?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Provider`]: Creates, updates and deletes one kind of resource
//! - [`ProviderResolver`]: Picks a provider for a resource type
//! - [`StateStore`]: Persists state records
//! - [`ProgressCallback`]: Receives progress updates
//!
//! This allows the crate to be used without hard dependencies on specific
//! clouds, storage backends or UI frameworks.

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod reference;
pub mod retry;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{CancelToken, Credentials, DeployContext, NoProgress, ProgressCallback};
pub use error::{Error, ProviderError, Result, StateError, ValidationError};
pub use executor::{apply, apply_simple, preflight};
pub use graph::ResourceGraph;
pub use planner::{Action, Plan, PlanSummary, plan, plan_destroy};
pub use provider::{CallContext, Created, Provider, ProviderRegistry, ProviderResolver};
pub use reference::Reference;
pub use retry::{RetryCallback, with_retry};
pub use state::{FileStore, MemoryStore, StateLock, StateRecord, StateSnapshot, StateStore};
pub use types::{
    ActionKind, ApplyReport, Attributes, Declaration, ExecuteOptions, ExecuteSummary, Outcome,
    Outputs, ResourceResult, RetryConfig,
};

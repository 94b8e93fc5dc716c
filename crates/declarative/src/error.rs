//! Error types for graph validation, provider calls and state persistence.
//!
//! Errors are split by when they can happen. [`ValidationError`]s are raised
//! before any provider is called and have no side effects. [`ProviderError`]s
//! come back from external systems and are categorized so the executor knows
//! whether to retry. [`StateError`]s come from the persistence layer.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Problems with the declared resource graph or its relation to state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Two declarations share the same logical name
    #[error("duplicate resource name: {name}")]
    DuplicateName {
        /// The repeated name
        name: String,
    },

    /// A declaration depends on (or references) a resource that was never declared
    #[error("resource '{resource}' depends on undeclared resource '{dependency}'")]
    UnknownDependency {
        /// The declaring resource
        resource: String,
        /// The missing dependency
        dependency: String,
    },

    /// The dependency relation is not a DAG
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    Cycle {
        /// Resources on the cycle, first element repeated at the end
        cycle: Vec<String>,
    },

    /// Resource names are used as state keys and reference targets
    #[error("invalid resource name '{name}': only letters, digits, '_' and '-' are allowed")]
    InvalidName {
        /// The rejected name
        name: String,
    },

    /// A recorded resource was redeclared with a different type
    #[error("resource '{name}' changed type from '{from}' to '{to}'; remove it and re-add it under a new name")]
    TypeChanged {
        /// Resource name
        name: String,
        /// Type recorded in state
        from: String,
        /// Newly declared type
        to: String,
    },

    /// A reference names an output its resource does not have
    #[error("resource '{resource}' references unknown output '{reference}'")]
    UnknownOutput {
        /// The referencing resource
        resource: String,
        /// The reference as written, e.g. `${db.endpoint}`
        reference: String,
    },

    /// No provider is registered for a resource type used by the plan
    #[error("no provider for resource type '{resource_type}' (resource '{resource}')")]
    UnknownResourceType {
        /// Resource name
        resource: String,
        /// Unhandled type tag
        resource_type: String,
    },
}

impl ValidationError {
    /// The resource this error is about, if any.
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::DuplicateName { name }
            | Self::InvalidName { name }
            | Self::TypeChanged { name, .. } => Some(name),
            Self::UnknownDependency { resource, .. }
            | Self::UnknownOutput { resource, .. }
            | Self::UnknownResourceType { resource, .. } => Some(resource),
            Self::Cycle { cycle } => cycle.first().map(String::as_str),
        }
    }
}

/// Errors returned by provider calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Temporary failure (throttling, network); worth retrying
    #[error("transient error: {message}")]
    Transient {
        /// Provider-supplied message
        message: String,
    },

    /// Failure that will not go away by retrying
    #[error("{message}")]
    Permanent {
        /// Provider-supplied message
        message: String,
    },

    /// The call did not finish before its deadline
    #[error("timed out after {}s", .after.as_secs())]
    Timeout {
        /// Configured per-action timeout
        after: Duration,
    },

    /// The call observed the cancellation token and gave up
    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Shorthand for a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Shorthand for a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Whether the executor should try the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}

/// Errors from reading or writing persisted state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Filesystem failure
    #[error("state I/O error at {}: {source}", .path.display())]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A record could not be (de)serialized
    #[error("corrupt state record {}: {source}", .path.display())]
    Corrupt {
        /// Offending file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Another run holds the environment lock
    #[error("state for environment '{environment}' is locked by {holder} ({})", .path.display())]
    Locked {
        /// Environment name
        environment: String,
        /// Contents of the lock file
        holder: String,
        /// Lock file path
        path: PathBuf,
    },

    /// Other failure (e.g. a poisoned in-memory store)
    #[error("{0}")]
    Other(String),
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum Error {
    /// Graph or plan validation failed; nothing was touched
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// State could not be loaded or written
    #[error(transparent)]
    State(#[from] StateError),

    /// Worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    Pool(String),
}

impl Error {
    /// Whether this is a pre-execution validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_categories() {
        assert!(ProviderError::transient("throttled").is_retryable());
        assert!(
            ProviderError::Timeout {
                after: Duration::from_secs(5)
            }
            .is_retryable()
        );
        assert!(!ProviderError::permanent("bad request").is_retryable());
        assert!(!ProviderError::Cancelled.is_retryable());
    }

    #[test]
    fn test_cycle_message_names_path() {
        let err = ValidationError::Cycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
        assert_eq!(err.resource(), Some("a"));
    }

    #[test]
    fn test_validation_wraps_into_error() {
        let err: Error = ValidationError::DuplicateName { name: "db".into() }.into();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "duplicate resource name: db");
    }
}

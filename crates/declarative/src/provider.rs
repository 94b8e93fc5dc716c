//! Provider interface - the only place where external side effects happen
//!
//! A provider turns a resource's desired attributes into create, update and
//! delete calls against some external system. Providers are picked by the
//! resource's type tag through a [`ProviderResolver`].

use crate::context::{CancelToken, Credentials};
use crate::error::ProviderError;
use crate::types::{Attributes, Outputs};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-call information handed to a provider
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Logical name of the resource
    pub resource: &'a str,
    pub resource_type: &'a str,
    pub environment: &'a str,
    pub credentials: &'a Credentials,
    /// Providers should give up and return [`ProviderError::Timeout`] after this
    pub deadline: Option<Instant>,
    pub timeout: Option<Duration>,
    pub cancel: &'a CancelToken,
}

impl CallContext<'_> {
    /// Time left before the deadline, `None` if unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// The timeout error for this call
    pub fn timeout_error(&self) -> ProviderError {
        ProviderError::Timeout {
            after: self.timeout.unwrap_or_default(),
        }
    }
}

/// What a successful create returns
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    /// Identifier assigned by the external system
    pub id: String,
    pub outputs: Outputs,
}

/// Uniform capability interface over external systems
pub trait Provider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Create the resource and return its identifier and outputs
    fn create(&self, ctx: &CallContext<'_>, attributes: &Attributes) -> Result<Created, ProviderError>;

    /// Bring an existing resource to the given attributes
    fn update(&self, ctx: &CallContext<'_>, id: &str, attributes: &Attributes) -> Result<Outputs, ProviderError>;

    /// Delete the resource
    fn delete(&self, ctx: &CallContext<'_>, id: &str) -> Result<(), ProviderError>;
}

/// Maps resource type tags to providers
pub trait ProviderResolver: Send + Sync {
    fn resolve(&self, resource_type: &str) -> Option<&dyn Provider>;
}

/// Resolver backed by a map from type tag to boxed provider
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Box<dyn Provider>>,
    fallback: Option<Box<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for one resource type
    pub fn register(&mut self, resource_type: impl Into<String>, provider: Box<dyn Provider>) {
        self.providers.insert(resource_type.into(), provider);
    }

    /// Provider used for types without an explicit registration
    pub fn set_fallback(&mut self, provider: Box<dyn Provider>) {
        self.fallback = Some(provider);
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty() && self.fallback.is_none()
    }
}

impl ProviderResolver for ProviderRegistry {
    fn resolve(&self, resource_type: &str) -> Option<&dyn Provider> {
        self.providers
            .get(resource_type)
            .or(self.fallback.as_ref())
            .map(|p| &**p)
    }
}

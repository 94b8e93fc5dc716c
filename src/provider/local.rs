//! Local provider - resources materialized as JSON objects on disk
//!
//! Objects live at `<root>/<type>/<id>.json`. Identifiers are derived from
//! the environment, type and name, so re-creating a forgotten resource adopts
//! the existing object instead of leaving a stray copy.

use chrono::{DateTime, Utc};
use declarative::{Attributes, CallContext, Created, Outputs, Provider, ProviderError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Stored form of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalObject {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub environment: String,
    pub attributes: Attributes,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stable identifier for a resource in an environment
    pub fn object_id(ctx: &CallContext<'_>) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in [ctx.environment, ctx.resource_type, ctx.resource] {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        let hex = hasher.finalize().to_hex();
        format!("{}-{}", ctx.resource_type, &hex[..16])
    }

    fn object_path(&self, resource_type: &str, id: &str) -> PathBuf {
        self.root.join(resource_type).join(format!("{id}.json"))
    }

    fn write(&self, ctx: &CallContext<'_>, id: &str, attributes: &Attributes) -> Result<Outputs, ProviderError> {
        if ctx.is_expired() {
            return Err(ctx.timeout_error());
        }

        let path = self.object_path(ctx.resource_type, id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, &e))?;
        }

        let object = LocalObject {
            name: ctx.resource.to_string(),
            resource_type: ctx.resource_type.to_string(),
            environment: ctx.environment.to_string(),
            attributes: attributes.clone(),
            updated_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&object)
            .map_err(|e| ProviderError::permanent(format!("could not serialize {}: {e}", ctx.resource)))?;
        fs::write(&path, content).map_err(|e| io_error(&path, &e))?;
        log::debug!("Wrote {}", path.display());

        // Attributes double as outputs, plus the id and location
        let mut outputs = attributes.clone();
        outputs.insert("id".into(), Value::String(id.to_string()));
        outputs.insert("path".into(), Value::String(path.display().to_string()));
        Ok(outputs)
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn create(&self, ctx: &CallContext<'_>, attributes: &Attributes) -> Result<Created, ProviderError> {
        let id = Self::object_id(ctx);
        let outputs = self.write(ctx, &id, attributes)?;
        Ok(Created { id, outputs })
    }

    fn update(&self, ctx: &CallContext<'_>, id: &str, attributes: &Attributes) -> Result<Outputs, ProviderError> {
        let path = self.object_path(ctx.resource_type, id);
        if !path.exists() {
            return Err(ProviderError::permanent(format!(
                "{} ({id}) no longer exists at {}",
                ctx.resource,
                path.display()
            )));
        }
        self.write(ctx, id, attributes)
    }

    fn delete(&self, ctx: &CallContext<'_>, id: &str) -> Result<(), ProviderError> {
        let path = self.object_path(ctx.resource_type, id);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Removed {}", path.display());
                Ok(())
            }
            // Already gone
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, &e)),
        }
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> ProviderError {
    let message = format!("{}: {e}", path.display());
    match e.kind() {
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => ProviderError::transient(message),
        _ => ProviderError::permanent(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{CancelToken, Credentials};
    use serde_json::json;
    use tempfile::TempDir;

    fn call<'a>(name: &'a str, credentials: &'a Credentials, cancel: &'a CancelToken) -> CallContext<'a> {
        CallContext {
            resource: name,
            resource_type: "bucket",
            environment: "dev",
            credentials,
            deadline: None,
            timeout: None,
            cancel,
        }
    }

    fn attrs(versioned: bool) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("versioned".into(), json!(versioned));
        attributes
    }

    #[test]
    fn test_create_update_delete() {
        let dir = TempDir::new().unwrap();
        let provider = LocalProvider::new(dir.path());
        let (credentials, cancel) = (Credentials::default(), CancelToken::new());
        let ctx = call("logs", &credentials, &cancel);

        let created = provider.create(&ctx, &attrs(false)).unwrap();
        assert!(created.id.starts_with("bucket-"));
        assert_eq!(created.outputs["versioned"], json!(false));
        assert_eq!(created.outputs["id"], json!(created.id));

        let path = dir.path().join("bucket").join(format!("{}.json", created.id));
        let stored: LocalObject = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.name, "logs");
        assert_eq!(stored.environment, "dev");

        let outputs = provider.update(&ctx, &created.id, &attrs(true)).unwrap();
        assert_eq!(outputs["versioned"], json!(true));

        provider.delete(&ctx, &created.id).unwrap();
        assert!(!path.exists());
        // Deleting twice is fine
        provider.delete(&ctx, &created.id).unwrap();
    }

    #[test]
    fn test_ids_stable_and_distinct() {
        let (credentials, cancel) = (Credentials::default(), CancelToken::new());
        let a = LocalProvider::object_id(&call("logs", &credentials, &cancel));
        let b = LocalProvider::object_id(&call("logs", &credentials, &cancel));
        let c = LocalProvider::object_id(&call("assets", &credentials, &cancel));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_update_of_missing_object_fails_permanently() {
        let dir = TempDir::new().unwrap();
        let provider = LocalProvider::new(dir.path());
        let (credentials, cancel) = (Credentials::default(), CancelToken::new());
        let err = provider
            .update(&call("logs", &credentials, &cancel), "bucket-missing", &attrs(true))
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}

//! Built-in providers and their binding to resource types

pub mod exec;
pub mod local;

use crate::config::{Manifest, ProviderConfig};
use declarative::{Attributes, CallContext, Created, Outputs, Provider, ProviderError, ProviderRegistry};
use std::path::Path;

pub use exec::ExecProvider;
pub use local::LocalProvider;

/// Manifest key whose binding applies to every type not listed explicitly
pub const DEFAULT_BINDING: &str = "default";

/// A provider configured from the manifest
#[derive(Debug, Clone)]
pub enum Backend {
    Local(LocalProvider),
    Exec(ExecProvider),
}

impl Backend {
    /// Build a backend; `local_dir` is used when a local binding names no directory
    pub fn from_config(config: &ProviderConfig, manifest: &Manifest, local_dir: &Path) -> Self {
        match config {
            ProviderConfig::Local { dir } => {
                let root = dir
                    .as_deref()
                    .map_or_else(|| local_dir.to_path_buf(), |d| manifest.resolve_path(d));
                let provider = LocalProvider::new(root);
                log::trace!("Local objects in {}", provider.root().display());
                Self::Local(provider)
            }
            ProviderConfig::Exec { command, args } => {
                // Bare program names are looked up on PATH
                let command = if command.contains('/') || command.starts_with('~') {
                    manifest.resolve_path(command)
                } else {
                    command.into()
                };
                Self::Exec(ExecProvider::new(command, args.clone()))
            }
        }
    }

    fn inner(&self) -> &dyn Provider {
        match self {
            Self::Local(p) => p,
            Self::Exec(p) => p,
        }
    }
}

impl Provider for Backend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn create(&self, ctx: &CallContext<'_>, attributes: &Attributes) -> Result<Created, ProviderError> {
        self.inner().create(ctx, attributes)
    }

    fn update(&self, ctx: &CallContext<'_>, id: &str, attributes: &Attributes) -> Result<Outputs, ProviderError> {
        self.inner().update(ctx, id, attributes)
    }

    fn delete(&self, ctx: &CallContext<'_>, id: &str) -> Result<(), ProviderError> {
        self.inner().delete(ctx, id)
    }
}

/// Provider registry for a manifest.
///
/// Without a `[providers]` table every type is handled by a local provider
/// writing below `state_dir`. Otherwise only the listed types are handled,
/// with `default` as the fallback.
pub fn registry(manifest: &Manifest, state_dir: &Path) -> ProviderRegistry {
    let local_dir = state_dir.join("local");
    let mut registry = ProviderRegistry::new();

    if manifest.providers.is_empty() {
        log::debug!("No providers configured; using local objects in {}", local_dir.display());
        registry.set_fallback(Box::new(Backend::Local(LocalProvider::new(local_dir))));
        return registry;
    }

    for (resource_type, config) in &manifest.providers {
        let backend = Backend::from_config(config, manifest, &local_dir);
        log::debug!("Binding '{resource_type}' to {} provider", backend.name());
        if resource_type == DEFAULT_BINDING {
            registry.set_fallback(Box::new(backend));
        } else {
            registry.register(resource_type.clone(), Box::new(backend));
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::ProviderResolver;
    use std::collections::BTreeMap;

    fn manifest(providers: &[(&str, ProviderConfig)]) -> Manifest {
        Manifest {
            providers: providers
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            base_dir: "/infra".into(),
            ..Manifest::default()
        }
    }

    #[test]
    fn test_empty_table_binds_everything_locally() {
        let registry = registry(&manifest(&[]), Path::new("/state/dev"));
        assert_eq!(registry.resolve("bucket").map(|p| p.name()), Some("local"));
        assert_eq!(registry.resolve("anything").map(|p| p.name()), Some("local"));
    }

    #[test]
    fn test_listed_types_only() {
        let exec = ProviderConfig::Exec {
            command: "./providers/db.sh".into(),
            args: Vec::new(),
        };
        let registry = registry(&manifest(&[("database", exec)]), Path::new("/state/dev"));
        assert_eq!(registry.resolve("database").map(|p| p.name()), Some("exec"));
        assert!(registry.resolve("bucket").is_none());
    }

    #[test]
    fn test_default_binding_is_fallback() {
        let registry = registry(
            &manifest(&[("default", ProviderConfig::Local { dir: None })]),
            Path::new("/state/dev"),
        );
        assert_eq!(registry.resolve("bucket").map(|p| p.name()), Some("local"));
    }

    #[test]
    fn test_paths_resolved_against_manifest() {
        let m = manifest(&[]);
        let local = Backend::from_config(
            &ProviderConfig::Local {
                dir: Some("objects".into()),
            },
            &m,
            Path::new("/state/dev/local"),
        );
        match local {
            Backend::Local(p) => assert_eq!(p.root(), Path::new("/infra/objects")),
            Backend::Exec(_) => panic!("expected local backend"),
        }

        let unset = Backend::from_config(&ProviderConfig::Local { dir: None }, &m, Path::new("/state/dev/local"));
        match unset {
            Backend::Local(p) => assert_eq!(p.root(), Path::new("/state/dev/local")),
            Backend::Exec(_) => panic!("expected local backend"),
        }
    }
}

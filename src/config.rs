//! Manifest loading
//!
//! A manifest declares resources, provider bindings, per-environment
//! variables and execution defaults. TOML and JSON are both accepted; the
//! format follows the file extension.
//!
//! `${var.NAME}` placeholders are substituted from the selected environment
//! at load time. `${resource.output}` references are left for the engine.

use declarative::graph::is_valid_name;
use declarative::reference::resolve_partial;
use declarative::{Credentials, Declaration, ExecuteOptions, ResourceGraph, RetryConfig, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Pseudo-resource name used for environment variables
pub const VAR_PREFIX: &str = "var";

/// Environment selected when `--env` is not given
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// Manifest file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension (TOML unless it ends in `.json`)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Manifest problems found before a graph is built
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read manifest {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid environment name '{0}' (use letters, digits, '_' and '-')")]
    InvalidEnvironment(String),

    #[error("unknown environment '{environment}' (declared: {declared})")]
    UnknownEnvironment { environment: String, declared: String },

    #[error("resource '{resource}' uses undefined variable '{var}' in environment '{environment}'")]
    UndefinedVar {
        resource: String,
        var: String,
        environment: String,
    },

    #[error("'var' is reserved for environment variables and cannot name a resource")]
    ReservedName,
}

/// Execution defaults from `[settings]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Worker threads for provider calls
    pub jobs: Option<usize>,
    /// Per-attempt timeout in seconds; 0 disables the timeout
    pub timeout_secs: Option<u64>,
    /// Attempts per action, including the first
    pub max_attempts: Option<u32>,
}

/// How resources of one type are provisioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// JSON objects in a local directory
    Local {
        /// Directory for the objects (defaults to the environment's state directory)
        #[serde(default)]
        dir: Option<String>,
    },
    /// External program speaking JSON over stdin/stdout
    Exec {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Per-environment parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Values for `${var.NAME}` placeholders
    pub vars: BTreeMap<String, Value>,
    /// Credentials profile handed to providers
    pub profile: Option<String>,
}

/// A loaded manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub settings: Settings,

    /// Provider bindings keyed by resource type; `default` applies to unlisted types
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,

    #[serde(default, rename = "resource")]
    pub resources: Vec<Declaration>,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Manifest {
    /// Load a manifest and substitute the environment's variables
    pub fn load(path: &Path, environment: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::parse(&content, ConfigFormat::from_path(path), path)?;
        manifest.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        manifest.resolve_vars(environment)?;
        log::debug!(
            "Loaded {} resources from {} for environment '{environment}'",
            manifest.resources.len(),
            path.display()
        );
        Ok(manifest)
    }

    /// Parse manifest text without substituting variables
    pub fn parse(content: &str, format: ConfigFormat, path: &Path) -> Result<Self, ConfigError> {
        let manifest: Self = match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?,
            ConfigFormat::Json => serde_json::from_str(content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?,
        };

        if manifest.resources.iter().any(|r| r.name == VAR_PREFIX) {
            return Err(ConfigError::ReservedName);
        }
        Ok(manifest)
    }

    /// Replace `${var.NAME}` placeholders with the environment's values
    pub fn resolve_vars(&mut self, environment: &str) -> Result<(), ConfigError> {
        let env = self.environment(environment)?.cloned().unwrap_or_default();
        let lookup = |r: &declarative::Reference| {
            if r.resource == VAR_PREFIX {
                env.vars.get(&r.output).cloned()
            } else {
                None
            }
        };

        for resource in &mut self.resources {
            for value in resource.attributes.values_mut() {
                let (resolved, left) = resolve_partial(value, &lookup);
                if let Some(undefined) = left.iter().find(|r| r.resource == VAR_PREFIX) {
                    return Err(ConfigError::UndefinedVar {
                        resource: resource.name.clone(),
                        var: undefined.output.clone(),
                        environment: environment.to_string(),
                    });
                }
                *value = resolved;
            }
        }
        Ok(())
    }

    /// Settings of an environment.
    ///
    /// Any well-formed name is accepted while no environments are declared;
    /// `default` is always accepted. The name becomes a state directory, so
    /// path separators and `..` never pass.
    pub fn environment(&self, name: &str) -> Result<Option<&EnvironmentConfig>, ConfigError> {
        if !is_valid_name(name) {
            return Err(ConfigError::InvalidEnvironment(name.to_string()));
        }
        match self.environments.get(name) {
            Some(env) => Ok(Some(env)),
            None if self.environments.is_empty() || name == DEFAULT_ENVIRONMENT => Ok(None),
            None => Err(ConfigError::UnknownEnvironment {
                environment: name.to_string(),
                declared: self.environments.keys().cloned().collect::<Vec<_>>().join(", "),
            }),
        }
    }

    /// Credentials handle for an environment
    pub fn credentials(&self, environment: &str) -> Credentials {
        self.environments
            .get(environment)
            .and_then(|e| e.profile.clone())
            .map(Credentials::profile)
            .unwrap_or_default()
    }

    /// Build and validate the resource graph
    pub fn graph(&self) -> Result<ResourceGraph, ValidationError> {
        ResourceGraph::from_declarations(self.resources.iter().cloned())
    }

    /// Execution options from `[settings]`, before command-line overrides
    pub fn execute_options(&self) -> ExecuteOptions {
        let mut options = ExecuteOptions::default();
        if let Some(jobs) = self.settings.jobs {
            options.jobs = jobs.max(1);
        }
        if let Some(secs) = self.settings.timeout_secs {
            options.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(attempts) = self.settings.max_attempts {
            options.retry = RetryConfig::with_attempts(attempts);
        }
        options
    }

    /// Resolve a manifest-relative path (`~` and `$VARS` are expanded first)
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let expanded = crate::paths::expand(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir.join(expanded)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const MANIFEST: &str = r#"
[settings]
jobs = 8
timeout_secs = 30
max_attempts = 5

[providers.database]
kind = "exec"
command = "./providers/rds.sh"
args = ["--region", "eu-west-1"]

[providers.default]
kind = "local"

[environments.dev.vars]
instance_class = "db.t3.micro"
replicas = 1

[environments.prod]
profile = "ops"

[environments.prod.vars]
instance_class = "db.r6g.large"
replicas = 3

[[resource]]
name = "network"
type = "network"
attributes = { cidr = "10.0.0.0/16" }

[[resource]]
name = "database"
type = "database"
depends_on = ["network"]
attributes = { vpc = "${network.id}", class = "${var.instance_class}", replicas = "${var.replicas}", label = "db-${var.instance_class}" }
"#;

    fn load(environment: &str) -> Result<Manifest, ConfigError> {
        let mut manifest = Manifest::parse(MANIFEST, ConfigFormat::Toml, Path::new("strata.toml"))?;
        manifest.resolve_vars(environment)?;
        Ok(manifest)
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("infra.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("infra.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("infra")), ConfigFormat::Toml);
    }

    #[test]
    fn test_vars_substituted_per_environment() {
        let prod = load("prod").unwrap();
        let db = &prod.resources[1].attributes;
        assert_eq!(db["class"], json!("db.r6g.large"));
        assert_eq!(db["replicas"], json!(3));
        assert_eq!(db["label"], json!("db-db.r6g.large"));
        // Engine references survive
        assert_eq!(db["vpc"], json!("${network.id}"));

        let dev = load("dev").unwrap();
        assert_eq!(dev.resources[1].attributes["class"], json!("db.t3.micro"));
    }

    #[test]
    fn test_undefined_var_rejected() {
        let err = load("default").unwrap_err();
        assert!(matches!(err, ConfigError::UndefinedVar { ref var, .. } if var == "instance_class"));
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let err = load("staging").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEnvironment { .. }));
        assert!(err.to_string().contains("dev, prod"));
    }

    #[test]
    fn test_environment_name_must_stay_in_state_dir() {
        let manifest = Manifest::default();
        for name in ["../other", "/tmp/x", "a/b", "", ".."] {
            let err = manifest.environment(name).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidEnvironment(ref n) if n == name), "{name}");
        }
        assert!(manifest.environment("staging-2").unwrap().is_none());
    }

    #[test]
    fn test_providers_and_settings() {
        let manifest = load("prod").unwrap();
        assert_eq!(
            manifest.providers["database"],
            ProviderConfig::Exec {
                command: "./providers/rds.sh".into(),
                args: vec!["--region".into(), "eu-west-1".into()],
            }
        );
        assert_eq!(manifest.providers["default"], ProviderConfig::Local { dir: None });

        let options = manifest.execute_options();
        assert_eq!(options.jobs, 8);
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(manifest.credentials("prod").profile.as_deref(), Some("ops"));
        assert_eq!(manifest.credentials("dev").profile, None);
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let mut manifest = Manifest::default();
        manifest.settings.timeout_secs = Some(0);
        assert_eq!(manifest.execute_options().timeout, None);
    }

    #[test]
    fn test_graph_from_manifest() {
        let graph = load("dev").unwrap().graph().unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.dependency_names("database"), vec!["network"]);
    }

    #[test]
    fn test_reserved_name_rejected() {
        let content = "[[resource]]\nname = \"var\"\ntype = \"x\"\n";
        let err = Manifest::parse(content, ConfigFormat::Toml, Path::new("m.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReservedName));
    }

    #[test]
    fn test_json_manifest_loaded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infra.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"resource": [{{"name": "bucket", "type": "bucket", "attributes": {{"versioned": true}}}}]}}"#
        )
        .unwrap();

        let manifest = Manifest::load(&path, "anything").unwrap();
        assert_eq!(manifest.resources[0].attributes["versioned"], json!(true));
        assert_eq!(manifest.base_dir, dir.path());
        assert_eq!(manifest.resolve_path("providers/x.sh"), dir.path().join("providers/x.sh"));
        assert_eq!(manifest.resolve_path("/opt/x.sh"), PathBuf::from("/opt/x.sh"));
    }

    #[test]
    fn test_missing_file_reported() {
        let err = Manifest::load(Path::new("/nonexistent/strata.toml"), "default").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

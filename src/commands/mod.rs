pub mod deploy;
pub mod state;
pub mod validate;

use crate::Context;
use crate::config::Manifest;
use crate::{paths, provider};
use anyhow::{Context as AnyhowContext, Result};
use declarative::{DeployContext, FileStore, ProviderRegistry, StateLock};

/// How a command finished, mapped to the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Everything requested was done
    Success,
    /// The user declined the confirmation prompt
    Aborted,
    /// Some actions failed or were skipped
    Partial,
}

/// Manifest, state store and deploy context for one invocation
pub struct Session {
    pub manifest: Manifest,
    pub store: FileStore,
    pub deploy: DeployContext,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        let manifest = Manifest::load(&ctx.file, &ctx.env)?;
        let state_root = paths::state_dir(ctx.state_dir.as_deref())?;
        let store = FileStore::new(&state_root, &ctx.env);
        let deploy = DeployContext::new(&ctx.env).with_credentials(manifest.credentials(&ctx.env));
        log::debug!("State for '{}' at {}", ctx.env, store.dir().display());
        Ok(Self {
            manifest,
            store,
            deploy,
        })
    }

    /// Take the environment lock for the rest of the command
    pub fn lock(&self) -> Result<StateLock> {
        self.store
            .lock()
            .context("State is in use; if no other run is active, release it with `strata state unlock`")
    }

    /// Providers bound to the manifest's resource types
    pub fn providers(&self) -> ProviderRegistry {
        provider::registry(&self.manifest, self.store.dir())
    }
}

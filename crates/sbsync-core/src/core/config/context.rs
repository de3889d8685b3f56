use std::path::Path;
use std::sync::{Arc, OnceLock};

use anyhow::Result;

use sbsync_domain::ManifestStore;

use super::{Config, EnvSnapshot, GlobalOptions, LastUsed};
use crate::core::catalog::{load_credentials, CatalogGateway, SplunkbaseGateway};

pub struct CommandContext<'a> {
    pub global: &'a GlobalOptions,
    env: EnvSnapshot,
    config: Config,
    last_used: LastUsed,
    catalog: OnceLock<Arc<dyn CatalogGateway>>,
}

impl<'a> CommandContext<'a> {
    /// Creates a command context from the process environment and the last-used record.
    ///
    /// # Errors
    /// Returns an error if an environment setting cannot be parsed.
    pub fn new(global: &'a GlobalOptions) -> Result<Self> {
        let env = EnvSnapshot::capture();
        let last_used = LastUsed::load(LastUsed::state_dir(&env).as_deref());
        let config = Config::from_snapshot(&env, global, &last_used)?;
        Ok(Self {
            global,
            env,
            config,
            last_used,
            catalog: OnceLock::new(),
        })
    }

    /// Same as [`CommandContext::new`] but every sync goes through `gateway`.
    pub fn with_catalog(global: &'a GlobalOptions, gateway: Arc<dyn CatalogGateway>) -> Result<Self> {
        let ctx = Self::new(global)?;
        let _ = ctx.catalog.set(gateway);
        Ok(ctx)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn last_used(&self) -> &LastUsed {
        &self.last_used
    }

    pub fn manifest_store(&self) -> ManifestStore {
        ManifestStore::new(self.config.manifest.clone(), self.config.backups)
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    pub fn state_dir(&self) -> Option<&Path> {
        self.config.state_dir.as_deref()
    }

    /// The catalog gateway, built on first use. Credentials are looked up then
    /// too; a missing login only fails the entries that reach the catalog.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn catalog(&self) -> Result<Arc<dyn CatalogGateway>> {
        if let Some(gateway) = self.catalog.get() {
            return Ok(gateway.clone());
        }
        let credentials = load_credentials(&self.env, &self.config.manifest);
        let gateway: Arc<dyn CatalogGateway> =
            Arc::new(SplunkbaseGateway::new(self.config.catalog.clone(), credentials)?);
        let _ = self.catalog.set(gateway.clone());
        Ok(gateway)
    }
}

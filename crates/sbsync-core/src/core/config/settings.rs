use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use sbsync_domain::DEFAULT_BACKUP_RETENTION;

use super::last_used::LastUsed;
use crate::core::catalog::SplunkbaseSettings;

pub(crate) const DEFAULT_MANIFEST: &str = "Your_apps.json";
pub(crate) const DEFAULT_API_URL: &str = "https://splunkbase.splunk.com";
pub(crate) const DEFAULT_DOWNLOAD_URL: &str = "https://api.splunkbase.splunk.com";
const DEFAULT_HTTP_ATTEMPTS: usize = 3;
const DEFAULT_HTTP_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
    pub manifest: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub backups: Option<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub(crate) fn path(&self, key: &str) -> Option<PathBuf> {
        self.var(key).map(PathBuf::from)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>>
    where
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.var(key)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .with_context(|| format!("{key} must be a non-negative integer (got '{raw}')"))
            })
            .transpose()
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Where a resolved setting came from, reported in `--json` details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettingSource {
    Flag,
    Env,
    LastUsed,
    Default,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) manifest: PathBuf,
    pub(crate) manifest_source: SettingSource,
    pub(crate) output_dir: PathBuf,
    pub(crate) output_dir_source: SettingSource,
    pub(crate) backups: usize,
    pub(crate) catalog: SplunkbaseSettings,
    pub(crate) state_dir: Option<PathBuf>,
}

impl Config {
    /// Resolves every setting as flag, then environment, then last-used record, then default.
    pub(crate) fn from_snapshot(
        snapshot: &EnvSnapshot,
        global: &GlobalOptions,
        last_used: &LastUsed,
    ) -> Result<Self> {
        let (manifest, manifest_source) = resolve_path(
            global.manifest.clone(),
            snapshot.path("SBSYNC_MANIFEST"),
            last_used.manifest.clone(),
            PathBuf::from(DEFAULT_MANIFEST),
        );
        let (output_dir, output_dir_source) = resolve_path(
            global.output_dir.clone(),
            snapshot.path("SBSYNC_OUTDIR"),
            last_used.output_dir.clone(),
            PathBuf::from("."),
        );
        let backups = match global.backups {
            Some(count) => count,
            None => snapshot
                .parsed::<usize>("SBSYNC_BACKUPS")?
                .unwrap_or(DEFAULT_BACKUP_RETENTION),
        };
        let attempts = snapshot
            .parsed::<usize>("SBSYNC_HTTP_ATTEMPTS")?
            .unwrap_or(DEFAULT_HTTP_ATTEMPTS)
            .max(1);
        let backoff = Duration::from_millis(
            snapshot
                .parsed::<u64>("SBSYNC_HTTP_BACKOFF_MS")?
                .unwrap_or(DEFAULT_HTTP_BACKOFF_MS),
        );
        let catalog = SplunkbaseSettings {
            api_url: snapshot
                .var("SBSYNC_API_URL")
                .unwrap_or(DEFAULT_API_URL)
                .trim_end_matches('/')
                .to_string(),
            download_url: snapshot
                .var("SBSYNC_DOWNLOAD_URL")
                .unwrap_or(DEFAULT_DOWNLOAD_URL)
                .trim_end_matches('/')
                .to_string(),
            attempts,
            backoff,
        };
        debug!(
            manifest = %manifest.display(),
            output_dir = %output_dir.display(),
            backups,
            "resolved configuration"
        );
        Ok(Self {
            manifest,
            manifest_source,
            output_dir,
            output_dir_source,
            backups,
            catalog,
            state_dir: LastUsed::state_dir(snapshot),
        })
    }

    #[must_use]
    pub fn manifest(&self) -> &PathBuf {
        &self.manifest
    }

    #[must_use]
    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    #[must_use]
    pub fn backups(&self) -> usize {
        self.backups
    }

    #[must_use]
    pub fn catalog(&self) -> &SplunkbaseSettings {
        &self.catalog
    }

    #[must_use]
    pub fn sources(&self) -> (SettingSource, SettingSource) {
        (self.manifest_source, self.output_dir_source)
    }
}

fn resolve_path(
    flag: Option<PathBuf>,
    env: Option<PathBuf>,
    last_used: Option<PathBuf>,
    default: PathBuf,
) -> (PathBuf, SettingSource) {
    if let Some(path) = flag {
        (path, SettingSource::Flag)
    } else if let Some(path) = env {
        (path, SettingSource::Env)
    } else if let Some(path) = last_used {
        (path, SettingSource::LastUsed)
    } else {
        (default, SettingSource::Default)
    }
}

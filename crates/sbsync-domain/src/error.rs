use std::io;
use std::path::PathBuf;

use crate::manifest::SchemaViolation;

/// Failures raised while reading or writing the manifest and its backups.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("manifest {} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to render manifest {}: {source}", .path.display())]
    Render {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("manifest {} must contain a JSON array of apps (found {found})", .path.display())]
    NotAnArray { path: PathBuf, found: &'static str },
    #[error("manifest {} has {} schema violation(s)", .path.display(), .violations.len())]
    Schema {
        path: PathBuf,
        violations: Vec<SchemaViolation>,
    },
    #[error("no backup named '{name}' next to {}", .path.display())]
    BackupNotFound { path: PathBuf, name: String },
    #[error("no backups exist for {}", .path.display())]
    NoBackups { path: PathBuf },
}

impl ManifestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure comes from the operator's input rather than the system.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Schema { .. } | Self::BackupNotFound { .. } | Self::NoBackups { .. }
        )
    }
}

/// A malformed `--only` / `--exclude` list. Nothing is filtered when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {flag} list: '{token}' is not an integer app uid")]
pub struct FilterError {
    pub flag: &'static str,
    pub token: String,
}

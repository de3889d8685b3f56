//! Access to the remote app catalog.

mod credentials;
mod splunkbase;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use sbsync_domain::AppEntry;

pub use credentials::{load_credentials, Credentials, CredentialsError};
pub use splunkbase::{SplunkbaseGateway, SplunkbaseSettings};

/// The identity of an app as the catalog knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppRef {
    pub uid: u64,
    pub app_id: String,
    pub name: String,
}

impl AppRef {
    #[must_use]
    pub fn from_entry(entry: &AppEntry) -> Self {
        Self {
            uid: entry.uid,
            app_id: entry.app_id.clone(),
            name: entry.name.clone(),
        }
    }
}

/// Opaque token locating one downloadable release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadHandle {
    pub uid: u64,
    pub version: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub version: String,
    pub handle: DownloadHandle,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReceipt {
    pub path: PathBuf,
    pub bytes: u64,
    pub last_modified: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AuthFailure(String),
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Io(String),
    #[error("{0}")]
    Malformed(String),
}

impl GatewayError {
    #[must_use]
    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            Self::NotFound(_) => GatewayErrorKind::NotFound,
            Self::AuthFailure(_) => GatewayErrorKind::AuthFailure,
            Self::Transient(_) => GatewayErrorKind::Transient,
            Self::Io(_) => GatewayErrorKind::Io,
            Self::Malformed(_) => GatewayErrorKind::Malformed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    NotFound,
    AuthFailure,
    Transient,
    Io,
    Malformed,
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "NotFound",
            Self::AuthFailure => "AuthFailure",
            Self::Transient => "TransientNetworkError",
            Self::Io => "IOError",
            Self::Malformed => "MalformedResponse",
        })
    }
}

/// Remote catalog capability used by the reconciler.
pub trait CatalogGateway: Send + Sync {
    fn fetch_latest(&self, app: &AppRef) -> Result<Release, GatewayError>;

    /// Handle for a specific, already known version.
    fn release(&self, app: &AppRef, version: &str) -> DownloadHandle;

    /// Streams the release into `destination`, replacing it atomically.
    fn download(
        &self,
        handle: &DownloadHandle,
        destination: &Path,
    ) -> Result<DownloadReceipt, GatewayError>;
}

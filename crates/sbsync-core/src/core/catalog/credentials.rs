use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::core::config::EnvSnapshot;

const CREDENTIALS_FILE: &str = "login.json";

#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("no Splunkbase credentials: set SBSYNC_USERNAME/SBSYNC_PASSWORD or create {}", .searched.display())]
    Missing { searched: PathBuf },
    #[error("failed to read credentials from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("credentials file {} is not valid: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("credentials file {} has an empty username or password", .path.display())]
    Incomplete { path: PathBuf },
}

/// Environment variables first, then `$SBSYNC_CREDENTIALS`, then `login.json`
/// next to the manifest.
pub fn load_credentials(
    snapshot: &EnvSnapshot,
    manifest: &Path,
) -> Result<Credentials, CredentialsError> {
    if let (Some(username), Some(password)) = (
        snapshot.var("SBSYNC_USERNAME"),
        snapshot.var("SBSYNC_PASSWORD"),
    ) {
        debug!("using Splunkbase credentials from the environment");
        return Ok(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    let path = snapshot.path("SBSYNC_CREDENTIALS").unwrap_or_else(|| {
        manifest
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join(CREDENTIALS_FILE)
    });
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(CredentialsError::Missing { searched: path })
        }
        Err(source) => return Err(CredentialsError::Read { path, source }),
    };
    let credentials: Credentials = serde_json::from_str(&contents)
        .map_err(|source| CredentialsError::Parse {
            path: path.clone(),
            source,
        })?;
    if credentials.username.trim().is_empty() || credentials.password.is_empty() {
        return Err(CredentialsError::Incomplete { path });
    }
    debug!(path = %path.display(), "loaded Splunkbase credentials");
    Ok(credentials)
}

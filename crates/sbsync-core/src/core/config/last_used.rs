use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::settings::EnvSnapshot;

const LAST_USED_FILE: &str = "last_used.json";

/// Manifest and output directory of the last successful sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastUsed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl LastUsed {
    pub(crate) fn state_dir(snapshot: &EnvSnapshot) -> Option<PathBuf> {
        snapshot
            .path("SBSYNC_STATE_DIR")
            .or_else(|| dirs_next::data_local_dir().map(|dir| dir.join("sbsync")))
    }

    /// Reads the record, treating a missing or unreadable file as empty.
    #[must_use]
    pub fn load(state_dir: Option<&Path>) -> Self {
        let Some(path) = state_dir.map(|dir| dir.join(LAST_USED_FILE)) else {
            return Self::default();
        };
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable last-used record");
                return Self::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring corrupt last-used record");
                Self::default()
            }
        }
    }

    pub fn save(&self, state_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("failed to create state directory {}", state_dir.display()))?;
        let path = state_dir.join(LAST_USED_FILE);
        let mut tmp = NamedTempFile::new_in(state_dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "recorded last-used paths");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_record_is_empty() {
        let dir = tempdir().expect("tempdir");
        assert_eq!(LastUsed::load(Some(dir.path())), LastUsed::default());
        assert_eq!(LastUsed::load(None), LastUsed::default());
    }

    #[test]
    fn corrupt_record_is_ignored() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(LAST_USED_FILE), "{not json").expect("write");
        assert_eq!(LastUsed::load(Some(dir.path())), LastUsed::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().expect("tempdir");
        let state = dir.path().join("state");
        let record = LastUsed {
            manifest: Some(PathBuf::from("/srv/apps/Your_apps.json")),
            output_dir: Some(PathBuf::from("/srv/apps/packages")),
        };
        record.save(&state).expect("save");
        assert_eq!(LastUsed::load(Some(&state)), record);
    }

    #[test]
    fn state_dir_prefers_env() {
        let snapshot = EnvSnapshot::testing(&[("SBSYNC_STATE_DIR", "/tmp/sbsync-state")]);
        assert_eq!(
            LastUsed::state_dir(&snapshot),
            Some(PathBuf::from("/tmp/sbsync-state"))
        );
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use time::{macros::format_description, OffsetDateTime};
use tracing::{debug, info, warn};

use super::Manifest;
use crate::error::ManifestError;

pub const DEFAULT_BACKUP_RETENTION: usize = 5;

/// Owns the manifest file on disk along with its rotated backups.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    path: PathBuf,
    retention: usize,
}

impl ManifestStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            path: path.into(),
            retention,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Reads the manifest, creating an empty one when the file is absent.
    pub fn load(&self) -> Result<Manifest, ManifestError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "manifest not found; creating an empty one");
                self.create_empty()?;
                return Ok(Manifest::default());
            }
            Err(err) => return Err(ManifestError::io(&self.path, err)),
        };
        let manifest = parse_manifest(&self.path, &contents)?;
        let violations = manifest.violations();
        if !violations.is_empty() {
            warn!(
                path = %self.path.display(),
                count = violations.len(),
                "manifest contains entries that fail validation"
            );
        }
        debug!(path = %self.path.display(), entries = manifest.len(), "loaded manifest");
        Ok(manifest)
    }

    /// Like [`ManifestStore::load`] but refuses manifests with schema violations.
    pub fn load_strict(&self) -> Result<Manifest, ManifestError> {
        let manifest = self.load()?;
        manifest.require_valid(&self.path)?;
        Ok(manifest)
    }

    /// Replaces the live manifest, keeping a backup of the previous contents.
    pub fn save(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        self.stage(manifest)?.commit()
    }

    /// Writes `manifest` to a durable temp file next to the live one without
    /// touching the live file. Dropping the stage discards it.
    pub fn stage(&self, manifest: &Manifest) -> Result<StagedManifest<'_>, ManifestError> {
        let rendered = render(manifest).map_err(|source| ManifestError::Render {
            path: self.path.clone(),
            source,
        })?;
        self.stage_bytes(rendered.as_bytes())
    }

    fn stage_bytes(&self, bytes: &[u8]) -> Result<StagedManifest<'_>, ManifestError> {
        let parent = self.parent_dir();
        fs::create_dir_all(&parent).map_err(|err| ManifestError::io(&parent, err))?;
        let mut tmp = NamedTempFile::new_in(&parent).map_err(|err| ManifestError::io(&parent, err))?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.flush())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| ManifestError::io(tmp.path(), err))?;
        Ok(StagedManifest { store: self, tmp })
    }

    /// Rewrites the manifest in canonical form.
    pub fn reformat(&self) -> Result<ReformatOutcome, ManifestError> {
        let original = match fs::read_to_string(&self.path) {
            Ok(contents) => Some(contents),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(ManifestError::io(&self.path, err)),
        };
        let manifest = self.load_strict()?;
        let rendered = render(&manifest).map_err(|source| ManifestError::Render {
            path: self.path.clone(),
            source,
        })?;
        if original.as_deref() == Some(rendered.as_str()) {
            return Ok(ReformatOutcome {
                entries: manifest.len(),
                changed: false,
            });
        }
        self.stage_bytes(rendered.as_bytes())?.commit()?;
        Ok(ReformatOutcome {
            entries: manifest.len(),
            changed: true,
        })
    }

    /// Backups of the manifest, oldest first.
    pub fn backups(&self) -> Result<Vec<BackupFile>, ManifestError> {
        let parent = self.parent_dir();
        let prefix = self.backup_prefix();
        let dir = match fs::read_dir(&parent) {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ManifestError::io(&parent, err)),
        };
        let mut backups = Vec::new();
        for entry in dir {
            let entry = entry.map_err(|err| ManifestError::io(&parent, err))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stamp) = name.strip_prefix(&prefix) else {
                continue;
            };
            if stamp.is_empty() || !stamp.bytes().all(|b| b.is_ascii_digit() || b == b'T') {
                continue;
            }
            let bytes = entry.metadata().map(|meta| meta.len()).unwrap_or_default();
            backups.push(BackupFile {
                stamp: stamp.to_string(),
                name,
                path: entry.path(),
                bytes,
            });
        }
        backups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(backups)
    }

    /// Restores the named backup, or the newest one when `name` is `None`.
    /// The current manifest is itself backed up first.
    pub fn restore(&self, name: Option<&str>) -> Result<RestoreOutcome, ManifestError> {
        let backups = self.backups()?;
        let chosen = match name {
            Some(name) => backups
                .iter()
                .find(|backup| backup.name == name || backup.stamp == name)
                .cloned()
                .ok_or_else(|| ManifestError::BackupNotFound {
                    path: self.path.clone(),
                    name: name.to_string(),
                })?,
            None => backups
                .last()
                .cloned()
                .ok_or_else(|| ManifestError::NoBackups {
                    path: self.path.clone(),
                })?,
        };
        let contents =
            fs::read_to_string(&chosen.path).map_err(|err| ManifestError::io(&chosen.path, err))?;
        let manifest = parse_manifest(&chosen.path, &contents)?;
        let staged = self.stage_bytes(contents.as_bytes())?;
        let backup = staged.commit_with_backup()?;
        info!(backup = %chosen.name, path = %self.path.display(), "restored manifest backup");
        Ok(RestoreOutcome {
            restored: chosen,
            entries: manifest.len(),
            previous: backup,
        })
    }

    fn create_empty(&self) -> Result<(), ManifestError> {
        let staged = self.stage_bytes(b"[]\n")?;
        staged.persist()
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| "manifest".to_string(), |name| name.to_string_lossy().into_owned())
    }

    fn backup_prefix(&self) -> String {
        format!("{}.bak-", self.file_name())
    }

    fn backup_live(&self) -> Result<Option<PathBuf>, ManifestError> {
        if self.retention == 0 || !self.path.exists() {
            return Ok(None);
        }
        let stamp = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year][month][day]T[hour][minute][second][subsecond digits:6]"
            ))
            .map_err(|err| ManifestError::io(&self.path, std::io::Error::other(err)))?;
        let prefix = self.backup_prefix();
        let mut suffix = 0u32;
        let mut dest = self.parent_dir().join(backup_file_name(&prefix, &stamp, suffix));
        while dest.exists() {
            suffix += 1;
            dest = self.parent_dir().join(backup_file_name(&prefix, &stamp, suffix));
        }
        fs::copy(&self.path, &dest).map_err(|err| ManifestError::io(&dest, err))?;
        restrict_permissions(&dest)?;
        debug!(backup = %dest.display(), "backed up manifest");
        self.prune()?;
        Ok(Some(dest))
    }

    fn prune(&self) -> Result<(), ManifestError> {
        let backups = self.backups()?;
        let excess = backups.len().saturating_sub(self.retention);
        for backup in backups.into_iter().take(excess) {
            fs::remove_file(&backup.path).map_err(|err| ManifestError::io(&backup.path, err))?;
            debug!(backup = %backup.name, "pruned old manifest backup");
        }
        Ok(())
    }
}

/// A fully written, not yet visible manifest.
#[derive(Debug)]
pub struct StagedManifest<'a> {
    store: &'a ManifestStore,
    tmp: NamedTempFile,
}

impl StagedManifest<'_> {
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        self.tmp.path()
    }

    /// Backs up the live file, then atomically replaces it.
    pub fn commit(self) -> Result<(), ManifestError> {
        self.commit_with_backup().map(|_| ())
    }

    fn commit_with_backup(self) -> Result<Option<PathBuf>, ManifestError> {
        let backup = self.store.backup_live()?;
        self.persist()?;
        Ok(backup)
    }

    fn persist(self) -> Result<(), ManifestError> {
        let dest = self.store.path.clone();
        self.tmp
            .persist(&dest)
            .map_err(|err| ManifestError::io(&dest, err.error))?;
        restrict_permissions(&dest)?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackupFile {
    pub name: String,
    pub stamp: String,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ReformatOutcome {
    pub entries: usize,
    pub changed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    pub restored: BackupFile,
    pub entries: usize,
    pub previous: Option<PathBuf>,
}

impl Manifest {
    pub fn require_valid(&self, path: &Path) -> Result<(), ManifestError> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ManifestError::Schema {
                path: path.to_path_buf(),
                violations,
            })
        }
    }
}

fn parse_manifest(path: &Path, contents: &str) -> Result<Manifest, ManifestError> {
    let root: Value = serde_json::from_str(contents).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match root {
        Value::Array(values) => Ok(Manifest::from_values(values)),
        other => Err(ManifestError::NotAnArray {
            path: path.to_path_buf(),
            found: json_kind(&other),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Collision suffixes are fixed width so names keep sorting in creation order.
fn backup_file_name(prefix: &str, stamp: &str, suffix: u32) -> String {
    if suffix == 0 {
        format!("{prefix}{stamp}")
    } else {
        format!("{prefix}{stamp}{suffix:03}")
    }
}

/// Canonical text: sorted keys, four-space indent, trailing newline.
pub(crate) fn render(manifest: &Manifest) -> Result<String, serde_json::Error> {
    render_value(&manifest.to_json())
}

pub(crate) fn render_value(value: &Value) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    // Serializing through a BTreeMap keeps keys sorted regardless of serde_json features.
    SortedValue(value).serialize(&mut serializer)?;
    let mut text = String::from_utf8(buf).map_err(|err| {
        serde_json::Error::io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    })?;
    text.push('\n');
    Ok(text)
}

struct SortedValue<'a>(&'a Value);

impl Serialize for SortedValue<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        match self.0 {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, SortedValue<'_>> =
                    map.iter().map(|(key, value)| (key, SortedValue(value))).collect();
                sorted.serialize(serializer)
            }
            Value::Array(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(&SortedValue(value))?;
                }
                seq.end()
            }
            other => other.serialize(serializer),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), ManifestError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|err| ManifestError::io(path, err))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), ManifestError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AppEntry, DeclaredVersion, ViolationKind};
    use serde_json::json;
    use tempfile::tempdir;

    fn write(path: &Path, value: &Value) {
        fs::write(path, serde_json::to_string(value).expect("json")).expect("write manifest");
    }

    fn sample_entry(uid: u64, version: &str) -> AppEntry {
        AppEntry::new(uid, format!("App {uid}"), format!("app_{uid}"), DeclaredVersion::parse(version))
    }

    #[test]
    fn load_creates_missing_manifest() {
        let dir = tempdir().expect("tempdir");
        let store = ManifestStore::new(dir.path().join("Your_apps.json"), 5);
        let manifest = store.load().expect("load");
        assert!(manifest.is_empty());
        assert_eq!(
            fs::read_to_string(store.path()).expect("read").trim(),
            "[]"
        );
    }

    #[test]
    fn load_rejects_non_array_root() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        write(&path, &json!({"uid": 742}));
        let err = ManifestStore::new(&path, 5).load().expect_err("object root");
        assert!(matches!(err, ManifestError::NotAnArray { found: "an object", .. }));
        assert!(!err.is_user_error());
    }

    #[test]
    fn load_rejects_invalid_json() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        fs::write(&path, "[{").expect("write");
        let err = ManifestStore::new(&path, 5).load().expect_err("bad json");
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn save_renders_sorted_keys_and_keeps_backup() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        write(&path, &json!([]));
        let store = ManifestStore::new(&path, 5);

        store
            .save(&Manifest::from_entries(vec![sample_entry(742, "9.0.0")]))
            .expect("save");

        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(
            text,
            "[\n    {\n        \"appid\": \"app_742\",\n        \"name\": \"App 742\",\n        \"uid\": 742,\n        \"version\": \"9.0.0\"\n    }\n]\n"
        );
        let backups = store.backups().expect("backups");
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(&backups[0].path).expect("backup").trim(), "[]");
    }

    #[test]
    fn render_sorts_nested_keys() {
        let text = render_value(&json!([{"version": "1.0", "notes": {"z": 1, "a": 2}, "uid": 7}]))
            .expect("render");
        let notes = text.find("\"notes\"").expect("notes");
        let uid = text.find("\"uid\"").expect("uid");
        let version = text.find("\"version\"").expect("version");
        assert!(notes < uid && uid < version);
        assert!(text.find("\"a\"").expect("a") < text.find("\"z\"").expect("z"));
        assert!(text.ends_with("]\n"));
    }

    #[test]
    fn render_failure_names_the_manifest() {
        let source = serde_json::Error::io(std::io::Error::other("disk full"));
        let err = ManifestError::Render {
            path: PathBuf::from("apps.json"),
            source,
        };
        assert!(!err.is_user_error());
        assert!(err.to_string().starts_with("failed to render manifest apps.json"));
    }

    #[test]
    fn colliding_backup_names_sort_in_creation_order() {
        let stamp = "20260101T000000000000";
        let names: Vec<String> = [0, 1, 9, 10, 11]
            .into_iter()
            .map(|suffix| backup_file_name("apps.json.bak-", stamp, suffix))
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, names);
        assert_eq!(names[2], "apps.json.bak-20260101T000000000000009");
    }

    #[test]
    fn dropped_stage_leaves_live_file_intact() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        write(&path, &json!([{"uid": 1, "name": "One", "appid": "one", "version": "1.0"}]));
        let before = fs::read(&path).expect("read");
        let store = ManifestStore::new(&path, 5);

        let staged = store
            .stage(&Manifest::from_entries(vec![sample_entry(2, "2.0")]))
            .expect("stage");
        let tmp = staged.temp_path().to_path_buf();
        assert!(tmp.exists());
        drop(staged);

        assert!(!tmp.exists());
        assert_eq!(fs::read(&path).expect("read"), before);
        assert!(store.backups().expect("backups").is_empty());
    }

    #[test]
    fn backups_rotate_beyond_retention() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        write(&path, &json!([]));
        let store = ManifestStore::new(&path, 2);

        for version in ["1", "2", "3", "4"] {
            store
                .save(&Manifest::from_entries(vec![sample_entry(7, version)]))
                .expect("save");
        }

        let backups = store.backups().expect("backups");
        assert_eq!(backups.len(), 2);
        let newest = fs::read_to_string(&backups[1].path).expect("newest backup");
        assert!(newest.contains("\"3\""));
    }

    #[test]
    fn zero_retention_disables_backups() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        write(&path, &json!([]));
        let store = ManifestStore::new(&path, 0);
        store
            .save(&Manifest::from_entries(vec![sample_entry(7, "1")]))
            .expect("save");
        assert!(store.backups().expect("backups").is_empty());
    }

    #[test]
    fn rejected_entries_are_written_back() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        write(
            &path,
            &json!([
                {"uid": 1, "name": "One", "appid": "one", "version": "1.0"},
                {"uid": "two", "version": ""}
            ]),
        );
        let store = ManifestStore::new(&path, 0);
        let manifest = store.load().expect("load");
        store.save(&manifest).expect("save");

        let reloaded: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(reloaded[1], json!({"uid": "two", "version": ""}));
    }

    #[test]
    fn reformat_refuses_invalid_manifest() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        write(&path, &json!([{"uid": 1}]));
        let before = fs::read(&path).expect("read");
        let err = ManifestStore::new(&path, 5).reformat().expect_err("invalid");
        match &err {
            ManifestError::Schema { violations, .. } => {
                assert!(violations.iter().any(|v| v.kind == ViolationKind::Missing));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_user_error());
        assert_eq!(fs::read(&path).expect("read"), before);
    }

    #[test]
    fn reformat_is_a_no_op_on_canonical_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        fs::write(
            &path,
            r#"[{"version":"latest","uid":5,"name":"Five","appid":"five"}]"#,
        )
        .expect("write");
        let store = ManifestStore::new(&path, 5);

        let first = store.reformat().expect("reformat");
        assert!(first.changed);
        let second = store.reformat().expect("reformat again");
        assert!(!second.changed);
        assert_eq!(store.backups().expect("backups").len(), 1);
    }

    #[test]
    fn restore_newest_backup() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        write(&path, &json!([]));
        let store = ManifestStore::new(&path, 5);
        store
            .save(&Manifest::from_entries(vec![sample_entry(9, "1.0")]))
            .expect("save");

        let outcome = store.restore(None).expect("restore");
        assert_eq!(outcome.entries, 0);
        assert!(outcome.previous.is_some());
        assert_eq!(fs::read_to_string(&path).expect("read").trim(), "[]");
        assert_eq!(store.backups().expect("backups").len(), 2);
    }

    #[test]
    fn restore_unknown_backup_is_user_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        write(&path, &json!([]));
        let err = ManifestStore::new(&path, 5)
            .restore(Some("apps.json.bak-nope"))
            .expect_err("missing backup");
        assert!(matches!(err, ManifestError::BackupNotFound { .. }));
        assert!(err.is_user_error());
    }

    #[cfg(unix)]
    #[test]
    fn saved_manifest_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        let store = ManifestStore::new(&path, 5);
        store.save(&Manifest::default()).expect("save");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

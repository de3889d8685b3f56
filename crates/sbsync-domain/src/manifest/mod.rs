//! The declarative list of tracked apps.
//!
//! A manifest is an ordered JSON array. Each element is checked against
//! [`APP_ENTRY_SCHEMA`] when loaded; elements that fail are kept as
//! [`RejectedEntry`] values and written back untouched, so a mutating run can
//! never drop or rewrite an entry it could not understand.

mod io;
mod schema;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

pub use io::{
    BackupFile, ManifestStore, ReformatOutcome, RestoreOutcome, StagedManifest,
    DEFAULT_BACKUP_RETENTION,
};
pub use schema::{check_entry, FieldKind, FieldSpec, SchemaViolation, ViolationKind, APP_ENTRY_SCHEMA};

/// Sentinel declared version meaning "whatever the catalog currently ships".
pub const LATEST: &str = "latest";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeclaredVersion {
    Latest,
    Pinned(String),
}

impl DeclaredVersion {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw == LATEST {
            Self::Latest
        } else {
            Self::Pinned(raw.to_string())
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Latest => LATEST,
            Self::Pinned(version) => version,
        }
    }

    #[must_use]
    pub fn is_latest(&self) -> bool {
        matches!(self, Self::Latest)
    }
}

impl fmt::Display for DeclaredVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timezone-aware instant that remembers the exact text it was read from,
/// so saving an untouched entry reproduces the operator's spelling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timestamp {
    raw: String,
    at: OffsetDateTime,
}

impl Timestamp {
    pub fn parse(raw: &str) -> Result<Self, time::error::Parse> {
        let at = OffsetDateTime::parse(raw, &Rfc3339)?;
        Ok(Self {
            raw: raw.to_string(),
            at,
        })
    }

    /// Normalizes `at` to UTC and renders it as RFC 3339.
    #[must_use]
    pub fn from_datetime(at: OffsetDateTime) -> Self {
        let at = at.to_offset(UtcOffset::UTC);
        let raw = at.format(&Rfc3339).unwrap_or_else(|_| at.to_string());
        Self { raw, at }
    }

    #[must_use]
    pub fn now_utc() -> Self {
        Self::from_datetime(OffsetDateTime::now_utc())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn datetime(&self) -> OffsetDateTime {
        self.at
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One tracked package.
#[derive(Clone, Debug, PartialEq)]
pub struct AppEntry {
    pub uid: u64,
    pub name: String,
    pub app_id: String,
    pub declared_version: DeclaredVersion,
    pub updated_time: Option<Timestamp>,
    /// Concrete catalog version last downloaded for a `latest` entry.
    pub resolved_version: Option<String>,
    /// Keys the schema does not know about, preserved verbatim.
    pub extra: BTreeMap<String, Value>,
}

impl AppEntry {
    #[must_use]
    pub fn new(
        uid: u64,
        name: impl Into<String>,
        app_id: impl Into<String>,
        declared_version: DeclaredVersion,
    ) -> Self {
        Self {
            uid,
            name: name.into(),
            app_id: app_id.into(),
            declared_version,
            updated_time: None,
            resolved_version: None,
            extra: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut fields = self.extra.clone();
        fields.insert("uid".into(), Value::from(self.uid));
        fields.insert("name".into(), Value::from(self.name.clone()));
        fields.insert("appid".into(), Value::from(self.app_id.clone()));
        fields.insert(
            "version".into(),
            Value::from(self.declared_version.as_str()),
        );
        if let Some(updated) = &self.updated_time {
            fields.insert("updated_time".into(), Value::from(updated.as_str()));
        }
        if let Some(resolved) = &self.resolved_version {
            fields.insert("resolved_version".into(), Value::from(resolved.clone()));
        }
        Value::Object(fields.into_iter().collect::<Map<String, Value>>())
    }
}

/// An element that failed the schema, kept so it can be reported and saved back.
#[derive(Clone, Debug, PartialEq)]
pub struct RejectedEntry {
    pub index: usize,
    pub uid: Option<u64>,
    pub name: Option<String>,
    pub raw: Value,
    pub violations: Vec<SchemaViolation>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ManifestItem {
    Entry(AppEntry),
    Rejected(RejectedEntry),
}

impl ManifestItem {
    #[must_use]
    pub fn uid(&self) -> Option<u64> {
        match self {
            Self::Entry(entry) => Some(entry.uid),
            Self::Rejected(rejected) => rejected.uid,
        }
    }

    #[must_use]
    pub fn as_entry(&self) -> Option<&AppEntry> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Rejected(_) => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Entry(entry) => entry.to_value(),
            Self::Rejected(rejected) => rejected.raw.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Manifest {
    items: Vec<ManifestItem>,
}

impl Manifest {
    #[must_use]
    pub fn from_entries(entries: Vec<AppEntry>) -> Self {
        Self {
            items: entries.into_iter().map(ManifestItem::Entry).collect(),
        }
    }

    /// Checks every element against the schema, then rejects every element
    /// whose uid is shared with another element.
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        let mut uid_counts: HashMap<u64, usize> = HashMap::new();
        for value in &values {
            if let Some(uid) = schema::readable_uid(value) {
                *uid_counts.entry(uid).or_default() += 1;
            }
        }

        let items = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let uid = schema::readable_uid(&value);
                let duplicate = uid.is_some_and(|uid| uid_counts.get(&uid).copied() > Some(1));
                let mut violations = match check_entry(index, &value) {
                    Ok(entry) if !duplicate => return ManifestItem::Entry(entry),
                    Ok(_) => Vec::new(),
                    Err(violations) => violations,
                };
                if duplicate {
                    violations.push(SchemaViolation {
                        index,
                        uid,
                        field: Some("uid"),
                        kind: ViolationKind::DuplicateUid,
                    });
                }
                let name = value
                    .get("name")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned);
                ManifestItem::Rejected(RejectedEntry {
                    index,
                    uid,
                    name,
                    raw: value,
                    violations,
                })
            })
            .collect();
        Self { items }
    }

    #[must_use]
    pub fn items(&self) -> &[ManifestItem] {
        &self.items
    }

    pub fn entries(&self) -> impl Iterator<Item = &AppEntry> {
        self.items.iter().filter_map(ManifestItem::as_entry)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn entry(&self, uid: u64) -> Option<&AppEntry> {
        self.entries().find(|entry| entry.uid == uid)
    }

    pub fn entry_mut(&mut self, uid: u64) -> Option<&mut AppEntry> {
        self.items.iter_mut().find_map(|item| match item {
            ManifestItem::Entry(entry) if entry.uid == uid => Some(entry),
            _ => None,
        })
    }

    #[must_use]
    pub fn violations(&self) -> Vec<SchemaViolation> {
        self.items
            .iter()
            .filter_map(|item| match item {
                ManifestItem::Rejected(rejected) => Some(rejected.violations.iter().cloned()),
                ManifestItem::Entry(_) => None,
            })
            .flatten()
            .collect()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(self.items.iter().map(ManifestItem::to_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_uids_reject_every_sharing_entry() {
        let manifest = Manifest::from_values(vec![
            json!({"uid": 742, "name": "A", "appid": "a", "version": "9.0.0"}),
            json!({"uid": 833, "name": "B", "appid": "b", "version": "latest"}),
            json!({"uid": 742, "name": "C", "appid": "c", "version": "1.0.0"}),
        ]);

        assert_eq!(manifest.entries().count(), 1);
        let violations = manifest.violations();
        assert_eq!(violations.len(), 2);
        assert!(violations
            .iter()
            .all(|v| v.kind == ViolationKind::DuplicateUid && v.uid == Some(742)));
    }

    #[test]
    fn unknown_keys_survive_rendering() {
        let manifest = Manifest::from_values(vec![json!({
            "uid": 1,
            "name": "Add-on",
            "appid": "TA-addon",
            "version": "latest",
            "notes": {"owner": "soc"}
        })]);
        let rendered = manifest.to_json();
        assert_eq!(rendered[0]["notes"]["owner"], "soc");
        assert_eq!(rendered[0]["version"], "latest");
    }

    #[test]
    fn from_datetime_normalizes_to_utc() {
        let parsed = Timestamp::parse("2025-11-10T10:00:00+02:00").expect("timestamp");
        let normalized = Timestamp::from_datetime(parsed.datetime());
        assert_eq!(normalized.as_str(), "2025-11-10T08:00:00Z");
    }
}

//! Per-entry reconciliation of the manifest against disk and catalog.
//!
//! Entries are visited in manifest order and each yields exactly one
//! [`ReconciliationResult`]. Catalog and filesystem failures are recorded on
//! the entry they happened to and never abort the run. Mutations are applied
//! to a copy of the manifest; the caller decides whether to persist it.

use std::fs;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use sbsync_domain::{
    hash_archive, is_safe_version, probe, select, Action, AppEntry, DeclaredVersion, IdFilter,
    Manifest, ManifestItem, Probe, ReconciliationResult, RejectedEntry, Timestamp,
};

use crate::core::catalog::{AppRef, CatalogGateway, DownloadHandle, GatewayError};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Validate,
    Sync,
}

#[derive(Debug, Clone, Copy)]
#[allow(clippy::struct_excessive_bools)]
pub struct ReconcileOptions {
    pub mode: Mode,
    pub dry_run: bool,
    /// Consult the catalog for entries whose archive is present.
    pub check_updates: bool,
    pub upgrade_missing: bool,
    pub fix_missing: bool,
    pub hash: bool,
}

impl ReconcileOptions {
    #[must_use]
    pub fn validate(hash: bool) -> Self {
        Self {
            mode: Mode::Validate,
            dry_run: true,
            check_updates: false,
            upgrade_missing: false,
            fix_missing: false,
            hash,
        }
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Sync,
            dry_run: false,
            check_updates: true,
            upgrade_missing: false,
            fix_missing: false,
            hash: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results: Vec<ReconciliationResult>,
    /// The manifest with every applied action folded in.
    pub manifest: Manifest,
    pub mutated: bool,
}

pub struct Reconciler<'a> {
    output_dir: &'a Path,
    gateway: Option<&'a dyn CatalogGateway>,
    options: ReconcileOptions,
    now: fn() -> OffsetDateTime,
}

/// What happened to one entry, before it is turned into a result.
struct Step {
    action: Action,
    reason: String,
    latest: Option<String>,
    file: Probe,
    replacement: Option<AppEntry>,
}

impl Step {
    fn new(action: Action, reason: impl Into<String>, file: Probe) -> Self {
        Self {
            action,
            reason: reason.into(),
            latest: None,
            file,
            replacement: None,
        }
    }

    fn latest(mut self, version: impl Into<String>) -> Self {
        self.latest = Some(version.into());
        self
    }

    fn replacing(mut self, entry: AppEntry) -> Self {
        self.replacement = Some(entry);
        self
    }
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(
        output_dir: &'a Path,
        gateway: Option<&'a dyn CatalogGateway>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            output_dir,
            gateway,
            options,
            now: OffsetDateTime::now_utc,
        }
    }

    pub fn run(&self, manifest: &Manifest, filter: &IdFilter) -> RunOutcome {
        let mut next = manifest.clone();
        let mut mutated = false;
        let selected = select(manifest, filter);
        info!(
            selected = selected.len(),
            total = manifest.len(),
            mode = ?self.options.mode,
            dry_run = self.options.dry_run,
            "reconciling manifest"
        );

        let mut results = Vec::with_capacity(selected.len());
        for item in selected {
            let result = match item {
                ManifestItem::Rejected(rejected) => self.rejected(rejected),
                ManifestItem::Entry(entry)
                    if !is_safe_version(entry.declared_version.as_str()) =>
                {
                    self.unsafe_version(entry)
                }
                ManifestItem::Entry(entry) => {
                    let step = self.entry(entry);
                    if let Some(replacement) = &step.replacement {
                        if let Some(slot) = next.entry_mut(entry.uid) {
                            *slot = replacement.clone();
                            mutated = true;
                        }
                    }
                    self.finish(entry, step)
                }
            };
            debug!(
                uid = ?result.uid,
                action = %result.action,
                reason = %result.reason,
                "entry reconciled"
            );
            results.push(result);
        }

        RunOutcome {
            results,
            manifest: next,
            mutated,
        }
    }

    fn rejected(&self, rejected: &RejectedEntry) -> ReconciliationResult {
        let reason = rejected
            .violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!(index = rejected.index, uid = ?rejected.uid, "{reason}");
        let declared_version = rejected
            .raw
            .get("version")
            .and_then(serde_json::Value::as_str)
            .map(ToOwned::to_owned);
        // Presence is still reported when the archive name can be formed safely.
        let archive = match (rejected.uid, declared_version.as_deref()) {
            (Some(uid), Some(version)) if is_safe_version(version) => {
                Some(probe(uid, version, self.output_dir))
            }
            _ => None,
        };
        let file_present = archive.as_ref().is_some_and(|file| file.present);
        let content_hash = archive
            .as_ref()
            .and_then(|file| self.content_hash(&file.path, file_present));
        ReconciliationResult {
            uid: rejected.uid,
            name: rejected.name.clone().unwrap_or_default(),
            declared_version,
            latest_version: None,
            action: Action::Invalid,
            reason,
            file_present,
            file_path: archive.map(|file| file.path),
            content_hash,
        }
    }

    fn unsafe_version(&self, entry: &AppEntry) -> ReconciliationResult {
        let declared = entry.declared_version.as_str();
        warn!(uid = entry.uid, version = declared, "version cannot be used in a file name");
        let action = match self.options.mode {
            Mode::Validate => Action::Invalid,
            Mode::Sync => Action::Error,
        };
        ReconciliationResult {
            uid: Some(entry.uid),
            name: entry.name.clone(),
            declared_version: Some(declared.to_string()),
            latest_version: None,
            action,
            reason: format!("MalformedEntry: version '{declared}' cannot be used in a file name"),
            file_present: false,
            file_path: None,
            content_hash: None,
        }
    }

    fn entry(&self, entry: &AppEntry) -> Step {
        let declared = entry.declared_version.as_str();
        let current = probe(entry.uid, declared, self.output_dir);
        if self.options.mode == Mode::Validate {
            let reason = if current.present {
                "entry is valid; archive present"
            } else {
                "entry is valid; archive missing"
            };
            return Step::new(Action::Valid, reason, current);
        }

        match (&entry.declared_version, current.present) {
            (DeclaredVersion::Pinned(version), true) => self.present_pinned(entry, version, current),
            (DeclaredVersion::Latest, true) => self.present_latest(entry, current),
            (DeclaredVersion::Latest, false) => self.absent_latest(entry, current),
            (DeclaredVersion::Pinned(version), false) => self.absent_pinned(entry, version, current),
        }
    }

    fn present_pinned(&self, entry: &AppEntry, version: &str, current: Probe) -> Step {
        if !self.options.check_updates {
            return Step::new(Action::UpToDate, "archive present; update check skipped", current);
        }
        let app = AppRef::from_entry(entry);
        let release = match self.catalog().and_then(|gateway| gateway.fetch_latest(&app)) {
            Ok(release) => release,
            Err(err) => return failed(&err, current),
        };
        if release.version == version {
            return Step::new(Action::UpToDate, "archive present and current", current)
                .latest(release.version);
        }
        if !is_safe_version(&release.version) {
            return unusable_release(&release.version, current);
        }
        if self.options.dry_run {
            return Step::new(
                Action::UpdateAvailable,
                format!("catalog offers {} (dry run)", release.version),
                current,
            )
            .latest(release.version);
        }

        let target = probe(entry.uid, &release.version, self.output_dir);
        match self.fetch(&release.handle, &target.path) {
            Ok(updated_time) => {
                let mut replacement = entry.clone();
                replacement.declared_version = DeclaredVersion::Pinned(release.version.clone());
                replacement.updated_time = Some(updated_time);
                Step::new(
                    Action::Updated,
                    format!("updated from {version} to {}", release.version),
                    present(target.path),
                )
                .latest(release.version)
                .replacing(replacement)
            }
            Err(err) => failed(&err, current).latest(release.version),
        }
    }

    fn present_latest(&self, entry: &AppEntry, current: Probe) -> Step {
        let Some(resolved) = entry.resolved_version.as_deref() else {
            return Step::new(
                Action::UpToDate,
                "archive present; no resolved version recorded",
                current,
            );
        };
        if !self.options.check_updates {
            return Step::new(Action::UpToDate, "archive present; update check skipped", current)
                .latest(resolved);
        }
        let app = AppRef::from_entry(entry);
        let release = match self.catalog().and_then(|gateway| gateway.fetch_latest(&app)) {
            Ok(release) => release,
            Err(err) => return failed(&err, current),
        };
        if release.version == resolved {
            return Step::new(Action::UpToDate, "archive present and current", current)
                .latest(release.version);
        }
        if self.options.dry_run {
            return Step::new(
                Action::UpdateAvailable,
                format!(
                    "catalog offers {} over resolved {resolved} (dry run)",
                    release.version
                ),
                current,
            )
            .latest(release.version);
        }
        match self.fetch(&release.handle, &current.path) {
            Ok(updated_time) => {
                let mut replacement = entry.clone();
                replacement.resolved_version = Some(release.version.clone());
                replacement.updated_time = Some(updated_time);
                Step::new(
                    Action::Updated,
                    format!("refreshed latest from {resolved} to {}", release.version),
                    present(current.path),
                )
                .latest(release.version)
                .replacing(replacement)
            }
            Err(err) => failed(&err, current).latest(release.version),
        }
    }

    fn absent_latest(&self, entry: &AppEntry, current: Probe) -> Step {
        if self.options.dry_run {
            return Step::new(
                Action::PlanRedownload,
                "archive missing; would download the latest release (dry run)",
                current,
            );
        }
        let app = AppRef::from_entry(entry);
        let release = match self.catalog().and_then(|gateway| gateway.fetch_latest(&app)) {
            Ok(release) => release,
            Err(err) => return failed(&err, current),
        };
        match self.fetch(&release.handle, &current.path) {
            Ok(updated_time) => {
                let mut replacement = entry.clone();
                replacement.resolved_version = Some(release.version.clone());
                replacement.updated_time = Some(updated_time);
                Step::new(
                    Action::Redownloaded,
                    format!("archive missing; downloaded release {}", release.version),
                    present(current.path),
                )
                .latest(release.version)
                .replacing(replacement)
            }
            Err(err) => failed(&err, current).latest(release.version),
        }
    }

    fn absent_pinned(&self, entry: &AppEntry, version: &str, current: Probe) -> Step {
        if self.options.upgrade_missing {
            return self.upgrade_missing(entry, version, current);
        }
        if !self.options.fix_missing {
            return Step::new(
                Action::MissingOutdated,
                format!(
                    "archive {} missing; pass --upgrade-missing or --fix-missing to repair",
                    file_name(&current.path)
                ),
                current,
            );
        }
        if self.options.dry_run {
            return Step::new(
                Action::PlanRedownload,
                format!("archive missing; would download {version} again (dry run)"),
                current,
            );
        }
        let Some(gateway) = self.gateway else {
            return failed(&catalog_unavailable(), current);
        };
        let handle = gateway.release(&AppRef::from_entry(entry), version);
        match self.fetch(&handle, &current.path) {
            Ok(updated_time) => {
                let mut replacement = entry.clone();
                replacement.updated_time = Some(updated_time);
                Step::new(
                    Action::Redownloaded,
                    format!("archive missing; downloaded {version} again"),
                    present(current.path),
                )
                .replacing(replacement)
            }
            Err(err) => failed(&err, current),
        }
    }

    fn upgrade_missing(&self, entry: &AppEntry, version: &str, current: Probe) -> Step {
        if self.options.dry_run {
            return Step::new(
                Action::PlanUpgrade,
                "archive missing; would download the latest release (dry run)",
                current,
            );
        }
        let app = AppRef::from_entry(entry);
        let release = match self.catalog().and_then(|gateway| gateway.fetch_latest(&app)) {
            Ok(release) => release,
            Err(err) => return failed(&err, current),
        };
        if !is_safe_version(&release.version) {
            return unusable_release(&release.version, current);
        }
        let target = probe(entry.uid, &release.version, self.output_dir);
        match self.fetch(&release.handle, &target.path) {
            Ok(updated_time) => {
                let mut replacement = entry.clone();
                replacement.updated_time = Some(updated_time);
                let step = if release.version == version {
                    Step::new(
                        Action::Redownloaded,
                        format!("archive missing; {version} is still the latest release"),
                        present(target.path),
                    )
                } else {
                    replacement.declared_version =
                        DeclaredVersion::Pinned(release.version.clone());
                    Step::new(
                        Action::Upgraded,
                        format!("archive missing; upgraded {version} to {}", release.version),
                        present(target.path),
                    )
                };
                step.latest(release.version).replacing(replacement)
            }
            Err(err) => failed(&err, current).latest(release.version),
        }
    }

    fn catalog(&self) -> Result<&'a dyn CatalogGateway, GatewayError> {
        self.gateway.ok_or_else(catalog_unavailable)
    }

    /// Downloads into `destination` and returns the timestamp to record.
    fn fetch(&self, handle: &DownloadHandle, destination: &Path) -> Result<Timestamp, GatewayError> {
        let gateway = self.catalog()?;
        fs::create_dir_all(self.output_dir).map_err(|err| {
            GatewayError::Io(format!(
                "cannot create output directory {}: {err}",
                self.output_dir.display()
            ))
        })?;
        let receipt = gateway.download(handle, destination)?;
        let at = receipt.last_modified.unwrap_or_else(self.now);
        info!(
            uid = handle.uid,
            version = %handle.version,
            bytes = receipt.bytes,
            "stored archive"
        );
        Ok(Timestamp::from_datetime(at))
    }

    fn finish(&self, entry: &AppEntry, step: Step) -> ReconciliationResult {
        let file_present = step.file.path.is_file();
        let content_hash = self.content_hash(&step.file.path, file_present);
        let declared_version = step
            .replacement
            .as_ref()
            .map_or(&entry.declared_version, |replacement| {
                &replacement.declared_version
            })
            .to_string();
        ReconciliationResult {
            uid: Some(entry.uid),
            name: entry.name.clone(),
            declared_version: Some(declared_version),
            latest_version: step.latest,
            action: step.action,
            reason: step.reason,
            file_present,
            file_path: Some(step.file.path),
            content_hash,
        }
    }
}

impl Reconciler<'_> {
    fn content_hash(&self, path: &Path, file_present: bool) -> Option<String> {
        if !self.options.hash || !file_present {
            return None;
        }
        match hash_archive(path) {
            Ok(digest) => digest,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to hash archive");
                None
            }
        }
    }
}

fn present(path: PathBuf) -> Probe {
    Probe {
        present: true,
        path,
    }
}

fn failed(err: &GatewayError, file: Probe) -> Step {
    warn!(kind = %err.kind(), error = %err, "catalog operation failed");
    Step::new(Action::Error, format!("{}: {err}", err.kind()), file)
}

fn unusable_release(version: &str, file: Probe) -> Step {
    failed(
        &GatewayError::Malformed(format!(
            "catalog version '{version}' cannot be used in a file name"
        )),
        file,
    )
    .latest(version)
}

fn catalog_unavailable() -> GatewayError {
    GatewayError::Transient("no catalog connection is available".into())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

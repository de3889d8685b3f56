#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod archive;
pub mod error;
pub mod manifest;
pub mod report;
pub mod selection;

pub use archive::{archive_file_name, hash_archive, is_safe_version, probe, Probe};
pub use error::{FilterError, ManifestError};
pub use manifest::{
    check_entry, AppEntry, BackupFile, DeclaredVersion, FieldKind, FieldSpec, Manifest,
    ManifestItem, ManifestStore, ReformatOutcome, RejectedEntry, RestoreOutcome, SchemaViolation,
    StagedManifest, Timestamp, ViolationKind, APP_ENTRY_SCHEMA, DEFAULT_BACKUP_RETENTION, LATEST,
};
pub use report::{Action, ReconciliationResult, RunReport, Summary};
pub use selection::{parse_id_list, select, IdFilter};

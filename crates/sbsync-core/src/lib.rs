#![deny(clippy::all)]

mod core;

pub use crate::core::catalog::{
    AppRef, CatalogGateway, Credentials, CredentialsError, DownloadHandle, DownloadReceipt,
    GatewayError, GatewayErrorKind, Release, SplunkbaseGateway, SplunkbaseSettings,
};
pub use crate::core::commands::{
    list_backups, reformat_manifest, restore_backup, run_sync, run_validate, ReportOptions,
    summary_line, RestoreRequest, SyncRequest, ValidateRequest,
};
pub use crate::core::config::context::CommandContext;
pub use crate::core::config::{Config, GlobalOptions, LastUsed, SettingSource};
pub use crate::core::reconcile::{Mode, ReconcileOptions, Reconciler, RunOutcome};
pub use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome};

pub use sbsync_domain as domain;

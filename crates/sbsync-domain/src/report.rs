//! Aggregation of per-entry outcomes into the run report.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    UpToDate,
    Valid,
    Invalid,
    UpdateAvailable,
    Updated,
    MissingOutdated,
    PlanUpgrade,
    Upgraded,
    PlanRedownload,
    Redownloaded,
    Error,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpToDate => "up-to-date",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::UpdateAvailable => "update-available",
            Self::Updated => "updated",
            Self::MissingOutdated => "missing-outdated",
            Self::PlanUpgrade => "plan-upgrade",
            Self::Upgraded => "upgraded",
            Self::PlanRedownload => "plan-redownload",
            Self::Redownloaded => "redownloaded",
            Self::Error => "error",
        }
    }

    /// Whether the action rewrote the manifest entry.
    #[must_use]
    pub fn mutates(self) -> bool {
        matches!(self, Self::Updated | Self::Upgraded | Self::Redownloaded)
    }

    fn counts_as_update(self) -> bool {
        matches!(
            self,
            Self::UpdateAvailable | Self::Updated | Self::PlanUpgrade | Self::Upgraded
        )
    }

    fn counts_as_current(self) -> bool {
        matches!(self, Self::UpToDate | Self::Valid)
    }

    fn counts_as_error(self) -> bool {
        matches!(self, Self::Error | Self::Invalid)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub uid: Option<u64>,
    pub name: String,
    pub declared_version: Option<String>,
    pub latest_version: Option<String>,
    pub action: Action,
    pub reason: String,
    pub file_present: bool,
    pub file_path: Option<PathBuf>,
    pub content_hash: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub to_update: usize,
    pub up_to_date: usize,
    pub missing_files: usize,
    pub errors: usize,
    pub invalid: usize,
}

impl Summary {
    #[must_use]
    pub fn from_results(results: &[ReconciliationResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, result| {
            summary.total += 1;
            if result.action.counts_as_update() {
                summary.to_update += 1;
            }
            if result.action.counts_as_current() {
                summary.up_to_date += 1;
            }
            if result.action.counts_as_error() {
                summary.errors += 1;
            }
            if result.action == Action::Invalid {
                summary.invalid += 1;
            }
            if !result.file_present {
                summary.missing_files += 1;
            }
            summary
        })
    }

    #[must_use]
    pub fn has_findings(&self) -> bool {
        self.errors > 0 || self.missing_files > 0 || self.invalid > 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub generated_at: String,
    pub summary: Summary,
    pub results: Vec<ReconciliationResult>,
}

impl RunReport {
    #[must_use]
    pub fn build(results: Vec<ReconciliationResult>, generated_at: OffsetDateTime) -> Self {
        let at = generated_at.to_offset(UtcOffset::UTC);
        let generated_at = at.format(&Rfc3339).unwrap_or_else(|_| at.to_string());
        Self {
            generated_at,
            summary: Summary::from_results(&results),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn result(uid: u64, action: Action, file_present: bool) -> ReconciliationResult {
        ReconciliationResult {
            uid: Some(uid),
            name: format!("App {uid}"),
            declared_version: Some("1.0.0".into()),
            latest_version: None,
            action,
            reason: String::new(),
            file_present,
            file_path: None,
            content_hash: None,
        }
    }

    #[test]
    fn counts_each_bucket() {
        let results = vec![
            result(1, Action::Updated, true),
            result(2, Action::UpToDate, true),
            result(3, Action::MissingOutdated, false),
            result(4, Action::Error, false),
            result(5, Action::Invalid, false),
            result(6, Action::PlanRedownload, false),
            result(7, Action::UpdateAvailable, true),
        ];
        let summary = Summary::from_results(&results);
        assert_eq!(
            summary,
            Summary {
                total: 7,
                to_update: 2,
                up_to_date: 1,
                missing_files: 4,
                errors: 2,
                invalid: 1,
            }
        );
        assert!(summary.has_findings());
    }

    #[test]
    fn clean_run_has_no_findings() {
        let summary = Summary::from_results(&[result(1, Action::UpToDate, true)]);
        assert!(!summary.has_findings());
        assert!(!Summary::default().has_findings());
    }

    #[test]
    fn report_is_deterministic_and_ordered() {
        let at = datetime!(2025-11-10 10:00:00 +02:00);
        let results = vec![result(9, Action::Valid, true), result(3, Action::Valid, true)];
        let first = RunReport::build(results.clone(), at);
        let second = RunReport::build(results, at);
        assert_eq!(first, second);
        assert_eq!(first.generated_at, "2025-11-10T08:00:00Z");
        assert_eq!(first.results[0].uid, Some(9));

        let json = serde_json::to_value(&first).expect("serialize");
        assert_eq!(json["results"][1]["action"], "valid");
        assert_eq!(json["summary"]["up_to_date"], 2);
    }
}

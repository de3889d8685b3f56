use std::collections::BTreeSet;

use crate::error::FilterError;
use crate::manifest::{Manifest, ManifestItem};

/// Parses a comma separated uid list such as `"742, 833,"`.
pub fn parse_id_list(flag: &'static str, raw: &str) -> Result<Vec<u64>, FilterError> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<u64>().map_err(|_| FilterError {
                flag,
                token: token.to_string(),
            })
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdFilter {
    only: BTreeSet<u64>,
    exclude: BTreeSet<u64>,
}

impl IdFilter {
    /// An empty `only` list places no restriction.
    #[must_use]
    pub fn new(only: impl IntoIterator<Item = u64>, exclude: impl IntoIterator<Item = u64>) -> Self {
        Self {
            only: only.into_iter().collect(),
            exclude: exclude.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.only.is_empty() && self.exclude.is_empty()
    }

    #[must_use]
    pub fn admits(&self, uid: Option<u64>) -> bool {
        match uid {
            Some(uid) => {
                (self.only.is_empty() || self.only.contains(&uid)) && !self.exclude.contains(&uid)
            }
            None => self.only.is_empty(),
        }
    }
}

/// Items admitted by `filter`, in manifest order.
#[must_use]
pub fn select<'a>(manifest: &'a Manifest, filter: &IdFilter) -> Vec<&'a ManifestItem> {
    manifest
        .items()
        .iter()
        .filter(|item| filter.admits(item.uid()))
        .collect()
}

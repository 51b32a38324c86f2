use super::record::{format_timestamp, JobStatus, RegistryId, MULTI_REGISTRY_TYPE};
use crate::storage::runs::{ScanFilter, TextMatch};
use anyhow::Result;
use chrono::NaiveDateTime;

/// Exact or range comparison on a single field. Ranges are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match<T> {
    Exact(T),
    Between(T, T),
    AtLeast(T),
    AtMost(T),
}

impl<T> Match<T> {
    fn map<U>(&self, f: impl Fn(&T) -> U) -> Match<U> {
        match self {
            Match::Exact(value) => Match::Exact(f(value)),
            Match::Between(from, to) => Match::Between(f(from), f(to)),
            Match::AtLeast(value) => Match::AtLeast(f(value)),
            Match::AtMost(value) => Match::AtMost(f(value)),
        }
    }
}

impl From<Match<String>> for TextMatch {
    fn from(value: Match<String>) -> Self {
        match value {
            Match::Exact(value) => TextMatch::Exact(value),
            Match::Between(from, to) => TextMatch::Between(from, to),
            Match::AtLeast(value) => TextMatch::AtLeast(value),
            Match::AtMost(value) => TextMatch::AtMost(value),
        }
    }
}

/// Predicates for a full scan. Every populated filter must hold; unset filters and empty lists are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilters {
    pub pipeline_name: Option<Match<String>>,
    /// Any of these hash ids.
    pub hash_ids: Vec<String>,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub pipeline_version: Option<String>,
    pub registry_type: Option<String>,
    /// Any of these registry ids. When `registry_type` is "multi" the ids instead name one sorted set that must
    /// match a record's ids exactly.
    pub registry_ids: Vec<String>,
    pub date_start: Option<Match<NaiveDateTime>>,
    pub date_end: Option<Match<NaiveDateTime>>,
    pub job_status: Option<JobStatus>,
    pub default: Option<bool>,
    pub tag: Option<String>,
    pub removed: Option<bool>,
}

impl TryFrom<&ScanFilters> for ScanFilter {
    type Error = anyhow::Error;

    fn try_from(value: &ScanFilters) -> Result<Self> {
        let registry_ids = if value.registry_ids.is_empty() {
            vec![]
        } else if value.registry_type.as_deref() == Some(MULTI_REGISTRY_TYPE) {
            vec![RegistryId::multi(value.registry_ids.iter().cloned()).to_storage()?]
        } else {
            value
                .registry_ids
                .iter()
                .map(|id| RegistryId::Single(id.clone()).to_storage())
                .collect::<Result<Vec<_>>>()?
        };

        Ok(ScanFilter {
            pipeline_name: value.pipeline_name.clone().map(TextMatch::from),
            hash_ids: value.hash_ids.clone(),
            user_id: value.user_id.clone(),
            user_email: value.user_email.clone(),
            pipeline_version: value.pipeline_version.clone(),
            registry_type: value.registry_type.clone(),
            registry_ids,
            date_start: value
                .date_start
                .as_ref()
                .map(|matcher| matcher.map(format_timestamp).into()),
            date_end: value
                .date_end
                .as_ref()
                .map(|matcher| matcher.map(format_timestamp).into()),
            job_status: value.job_status.map(|status| status.to_string()),
            is_default: value.default,
            tag: value.tag.clone(),
            removed: value.removed,
        })
    }
}

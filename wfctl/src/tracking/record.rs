use crate::storage;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use strum::{Display, EnumString};

/// Every timestamp in the tracking store is kept in this layout.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `registry_type` value marking a record that pertains to several registry objects at once.
pub const MULTI_REGISTRY_TYPE: &str = "multi";

/// Current UTC wall clock truncated to whole seconds.
pub fn now() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
}

fn serialize_timestamp<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(value))
}

fn serialize_optional_timestamp<S: Serializer>(
    value: &Option<NaiveDateTime>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) => s.serialize_str(&format_timestamp(value)),
        None => s.serialize_none(),
    }
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
    let value = String::deserialize(d)?;
    parse_timestamp(&value).map_err(serde::de::Error::custom)
}

fn deserialize_optional_timestamp<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<NaiveDateTime>, D::Error> {
    match Option::<String>::deserialize(d)? {
        Some(value) if !value.is_empty() => parse_timestamp(&value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

/// Lifecycle of a job as reported by the batch backend.
#[derive(
    Debug, Clone, Copy, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum JobStatus {
    /// Accepted by the backend and recorded; nothing has run yet.
    #[default]
    Submitted,
    Pending,
    Runnable,
    Starting,
    Running,
    Succeeded,
    Failed,
}

/// The external object(s) a run pertains to. Several ids are always kept sorted so the same set always
/// compares equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistryId {
    Single(String),
    Multi(Vec<String>),
}

impl RegistryId {
    pub fn multi<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        ids.sort();
        RegistryId::Multi(ids)
    }

    /// Sorts the multi form in place of whatever order it was built with.
    pub fn normalized(&self) -> Self {
        match self {
            RegistryId::Single(id) => RegistryId::Single(id.clone()),
            RegistryId::Multi(ids) => RegistryId::multi(ids.iter().cloned()),
        }
    }

    /// Checks this id against the run's registry type. Lists of ids are only found by a scan when the type is
    /// "multi", and a "multi" run always holds a list.
    pub fn check_type(&self, registry_type: &str) -> Result<(), String> {
        match (self, registry_type == MULTI_REGISTRY_TYPE) {
            (RegistryId::Multi(_), true) | (RegistryId::Single(_), false) => Ok(()),
            (RegistryId::Single(_), true) => Err(format!(
                "registry_type '{MULTI_REGISTRY_TYPE}' requires a list of registry ids"
            )),
            (RegistryId::Multi(_), false) => Err(format!(
                "a list of registry ids requires registry_type '{MULTI_REGISTRY_TYPE}', got '{registry_type}'"
            )),
        }
    }

    /// The exact text this id is stored as.
    pub fn to_storage(&self) -> Result<String> {
        serde_json::to_string(&self.normalized()).context("Could not encode registry id")
    }
}

/// One tracked execution of a named pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    /// Which pipeline definition was run. Partition key.
    pub pipeline_name: String,
    /// Unique per execution. Sort key.
    pub hash_id: String,
    /// Revision or tag of the pipeline definition executed.
    pub pipeline_version: String,
    /// What kind of object `registry_id` names (e.g. experiment, library or sample identifiers).
    pub registry_type: String,
    pub registry_id: RegistryId,
    #[serde(serialize_with = "serialize_timestamp")]
    pub date_start: NaiveDateTime,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub date_end: Option<NaiveDateTime>,
    /// Full command line handed to the compute backend.
    pub command: String,
    pub job_status: JobStatus,
    /// Whether this run is the one returned by default for its registry id.
    pub default: bool,
    /// User label, used to pick out a run that is not the default.
    pub tag: String,
    pub output_path: String,
    pub pipeline_tools_submit_parameters: Option<serde_json::Value>,
    /// Everything a frontend needs to clone this run.
    pub cloning_parameters: Option<serde_json::Value>,
    pub scheduler_job_id: String,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub removed: bool,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub removed_date: Option<NaiveDateTime>,
    pub error_data: Option<serde_json::Value>,
    /// Where the backend keeps this run's logs.
    pub log_stream: Option<String>,
}

/// Everything needed to create a run record. The soft delete pair, `error_data` and `log_stream` always start
/// out empty.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewRun {
    pub pipeline_name: String,
    pub hash_id: String,
    pub pipeline_version: String,
    pub registry_type: String,
    pub registry_id: RegistryId,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub date_start: NaiveDateTime,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub date_end: Option<NaiveDateTime>,
    pub command: String,
    #[serde(default)]
    pub job_status: JobStatus,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub tag: String,
    pub output_path: String,
    #[serde(default)]
    pub pipeline_tools_submit_parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub cloning_parameters: Option<serde_json::Value>,
    pub scheduler_job_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

impl From<NewRun> for RunRecord {
    fn from(run: NewRun) -> Self {
        RunRecord {
            pipeline_name: run.pipeline_name,
            hash_id: run.hash_id,
            pipeline_version: run.pipeline_version,
            registry_type: run.registry_type,
            registry_id: run.registry_id.normalized(),
            date_start: run.date_start,
            date_end: run.date_end,
            command: run.command,
            job_status: run.job_status,
            default: run.default,
            tag: run.tag,
            output_path: run.output_path,
            pipeline_tools_submit_parameters: run.pipeline_tools_submit_parameters,
            cloning_parameters: run.cloning_parameters,
            scheduler_job_id: run.scheduler_job_id,
            user_id: run.user_id,
            user_email: run.user_email,
            removed: false,
            removed_date: None,
            error_data: None,
            log_stream: None,
        }
    }
}

fn parse_json(column: &str, value: Option<String>) -> Result<Option<serde_json::Value>> {
    value
        .map(|value| {
            serde_json::from_str(&value).with_context(|| {
                format!("Could not parse field '{column}' from storage value '{value}'")
            })
        })
        .transpose()
}

fn parse_optional_timestamp(column: &str, value: Option<String>) -> Result<Option<NaiveDateTime>> {
    match value {
        // Older records mark a restored run with an empty removal date.
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => parse_timestamp(&value).map(Some).with_context(|| {
            format!("Could not parse field '{column}' from storage value '{value}'")
        }),
        None => Ok(None),
    }
}

impl TryFrom<storage::runs::Run> for RunRecord {
    type Error = anyhow::Error;

    fn try_from(value: storage::runs::Run) -> Result<Self> {
        let registry_id: RegistryId =
            serde_json::from_str(&value.registry_id).with_context(|| {
                format!(
                    "Could not parse field 'registry_id' from storage value '{}'",
                    value.registry_id
                )
            })?;

        let date_start = parse_timestamp(&value.date_start).with_context(|| {
            format!(
                "Could not parse field 'date_start' from storage value '{}'",
                value.date_start
            )
        })?;

        let job_status = JobStatus::from_str(&value.job_status).with_context(|| {
            format!(
                "Could not parse field 'job_status' from storage value '{}'",
                value.job_status
            )
        })?;

        Ok(RunRecord {
            pipeline_name: value.pipeline_name,
            hash_id: value.hash_id,
            pipeline_version: value.pipeline_version,
            registry_type: value.registry_type,
            registry_id,
            date_start,
            date_end: parse_optional_timestamp("date_end", value.date_end)?,
            command: value.command,
            job_status,
            default: value.is_default,
            tag: value.tag,
            output_path: value.output_path,
            pipeline_tools_submit_parameters: parse_json(
                "pipeline_tools_submit_parameters",
                value.pipeline_tools_submit_parameters,
            )?,
            cloning_parameters: parse_json("cloning_parameters", value.cloning_parameters)?,
            scheduler_job_id: value.scheduler_job_id,
            user_id: value.user_id,
            user_email: value.user_email,
            removed: value.removed,
            removed_date: parse_optional_timestamp("removed_date", value.removed_date)?,
            error_data: parse_json("error_data", value.error_data)?,
            log_stream: value.log_stream,
        })
    }
}

impl TryFrom<&RunRecord> for storage::runs::Run {
    type Error = anyhow::Error;

    fn try_from(value: &RunRecord) -> Result<Self> {
        Ok(storage::runs::Run {
            pipeline_name: value.pipeline_name.clone(),
            hash_id: value.hash_id.clone(),
            pipeline_version: value.pipeline_version.clone(),
            registry_type: value.registry_type.clone(),
            registry_id: value.registry_id.to_storage()?,
            date_start: format_timestamp(&value.date_start),
            date_end: value.date_end.as_ref().map(format_timestamp),
            command: value.command.clone(),
            job_status: value.job_status.to_string(),
            is_default: value.default,
            tag: value.tag.clone(),
            output_path: value.output_path.clone(),
            pipeline_tools_submit_parameters: value
                .pipeline_tools_submit_parameters
                .as_ref()
                .map(|v| v.to_string()),
            cloning_parameters: value.cloning_parameters.as_ref().map(|v| v.to_string()),
            scheduler_job_id: value.scheduler_job_id.clone(),
            user_id: value.user_id.clone(),
            user_email: value.user_email.clone(),
            removed: value.removed,
            removed_date: value.removed_date.as_ref().map(format_timestamp),
            error_data: value.error_data.as_ref().map(|v| v.to_string()),
            log_stream: value.log_stream.clone(),
        })
    }
}

/// A partial update. Only populated fields are written; everything else keeps its stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<RegistryId>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_timestamp"
    )]
    pub date_start: Option<NaiveDateTime>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_timestamp"
    )]
    pub date_end: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_tools_submit_parameters: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloning_parameters: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_stream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_timestamp"
    )]
    pub removed_date: Option<NaiveDateTime>,
}

impl RunUpdate {
    /// Rejects updates that would leave a run inconsistent whatever it currently holds.
    pub fn validate(&self) -> Result<(), String> {
        if self.removed.is_none() && self.removed_date.is_some() {
            return Err("removed_date can only be written together with removed".into());
        }

        match (self.registry_type.as_deref(), &self.registry_id) {
            (Some(registry_type), Some(registry_id)) => registry_id.check_type(registry_type),
            (Some(MULTI_REGISTRY_TYPE), None) => Err(format!(
                "registry_type '{MULTI_REGISTRY_TYPE}' requires a list of registry ids"
            )),
            (None, Some(RegistryId::Multi(_))) => Err(format!(
                "a list of registry ids requires registry_type '{MULTI_REGISTRY_TYPE}'"
            )),
            _ => Ok(()),
        }
    }

    /// Keeps the soft delete pair consistent: removing without a date stamps `now`, restoring clears the date.
    pub fn normalized(mut self, now: NaiveDateTime) -> Self {
        match self.removed {
            Some(true) if self.removed_date.is_none() => self.removed_date = Some(now),
            Some(false) => self.removed_date = None,
            _ => {}
        }
        if let Some(registry_id) = &self.registry_id {
            self.registry_id = Some(registry_id.normalized());
        }
        self
    }

    /// The fields this update writes, by name, with their new values.
    pub fn changes(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut changes = match serde_json::to_value(self).context("Could not encode update")? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        if self.removed == Some(false) {
            changes.insert("removed_date".into(), serde_json::Value::Null);
        }

        Ok(changes)
    }
}

impl TryFrom<&RunUpdate> for storage::runs::UpdatableFields {
    type Error = anyhow::Error;

    fn try_from(value: &RunUpdate) -> Result<Self> {
        let removed_date = match (value.removed, &value.removed_date) {
            (Some(false), _) => Some(storage::runs::FieldValue::Null),
            (_, Some(date)) => Some(storage::runs::FieldValue::Text(format_timestamp(date))),
            (_, None) => None,
        };

        Ok(storage::runs::UpdatableFields {
            pipeline_version: value.pipeline_version.clone(),
            registry_type: value.registry_type.clone(),
            registry_id: value
                .registry_id
                .as_ref()
                .map(RegistryId::to_storage)
                .transpose()?,
            date_start: value.date_start.as_ref().map(format_timestamp),
            date_end: value.date_end.as_ref().map(format_timestamp),
            command: value.command.clone(),
            job_status: value.job_status.map(|status| status.to_string()),
            is_default: value.default,
            tag: value.tag.clone(),
            output_path: value.output_path.clone(),
            pipeline_tools_submit_parameters: value
                .pipeline_tools_submit_parameters
                .as_ref()
                .map(|v| v.to_string()),
            cloning_parameters: value.cloning_parameters.as_ref().map(|v| v.to_string()),
            scheduler_job_id: value.scheduler_job_id.clone(),
            user_id: value.user_id.clone(),
            user_email: value.user_email.clone(),
            removed: value.removed,
            removed_date,
            error_data: value.error_data.as_ref().map(|v| v.to_string()),
            log_stream: value.log_stream.clone(),
        })
    }
}

use crate::{object_store, scheduler};
use anyhow::{anyhow, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use rust_embed::RustEmbed;
use serde::Deserialize;
use std::borrow::Cow;
use strum::{Display, EnumString};

#[derive(RustEmbed)]
#[folder = "src/conf/"]
#[include = "*.toml"]
struct EmbeddedConfigFS;

/// Path searched for a configuration file when the user does not give one.
const DEFAULT_CONFIG_PATH: &str = "/etc/wfctl/wfctl.toml";

/// Environment variables with this prefix override file values. Nested keys are separated by `__`,
/// e.g. `WFCTL_BATCH__MASTER_QUEUE`.
const ENV_PREFIX: &str = "WFCTL_";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub general: General,
    pub tracking: Tracking,
    pub batch: Batch,
    pub staging: Staging,
    pub pipeline: Pipeline,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct General {
    pub log_level: String,
    pub log_format: LogFormat,
    /// The deployment stage as given by the environment (e.g. "prod", "dev").
    pub stage: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tracking {
    /// Sqlite file backing the tracking store. Each stage should point at its own file.
    pub storage_path: String,
    /// Rows read per internal page while scanning.
    pub scan_page_size: u64,
    /// Provisioned read capacity; bounds the read connection pool.
    pub read_capacity: u32,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub engine: scheduler::Engine,
    pub region: String,
    pub master_queue: String,
    pub job_definition: String,
    pub gpu_queue: String,
    pub docker: Option<scheduler::docker::Config>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Staging {
    pub engine: object_store::Engine,
    /// How the compute backend addresses the staging store; prefixed onto every staged key.
    pub public_url: String,
    /// Where callers upload input files before submitting.
    pub upload_prefix: String,
    pub inputs_dir: String,
    pub outputs_dir: String,
    pub filesystem: Option<object_store::filesystem::Config>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub name: String,
    /// Repository reference handed to the workflow runner.
    pub repository: String,
    pub profile: String,
    pub with_gpu: bool,
}

/// A required configuration value is missing.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("missing required configuration: {}", .missing.join(", "))]
pub struct MissingConfig {
    pub missing: Vec<&'static str>,
}

/// Returns the embedded default configuration file.
fn default_config() -> Result<Cow<'static, [u8]>> {
    EmbeddedConfigFS::get("default_config.toml")
        .map(|file| file.data)
        .ok_or_else(|| anyhow!("embedded default configuration not found"))
}

impl Config {
    /// Builds the configuration from, in increasing priority: embedded defaults, the config file at
    /// `path_override` (or the default path), and `WFCTL_` environment variables.
    pub fn load(path_override: Option<&str>) -> Result<Self> {
        let default_config_raw = default_config()?;
        let default_config = std::str::from_utf8(&default_config_raw)?;

        let path = path_override.unwrap_or(DEFAULT_CONFIG_PATH);

        let config = Figment::new()
            .merge(Toml::string(default_config))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract::<Config>()?;

        Ok(config)
    }

    /// Checks everything a job submission needs before any external call is made.
    pub fn validate_submission(&self) -> Result<(), MissingConfig> {
        let mut missing = vec![];

        if self.batch.region.trim().is_empty() {
            missing.push("batch.region");
        }
        if self.batch.master_queue.trim().is_empty() {
            missing.push("batch.master_queue");
        }
        if self.batch.job_definition.trim().is_empty() {
            missing.push("batch.job_definition");
        }
        if self.pipeline.with_gpu && self.batch.gpu_queue.trim().is_empty() {
            missing.push("batch.gpu_queue");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingConfig { missing })
        }
    }
}

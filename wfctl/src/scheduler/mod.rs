pub mod docker;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use strum::{Display, EnumString};

/// Represents different scheduler failure possibilities.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// Failed to start scheduler due to misconfigured settings, usually from a misconfigured settings file.
    #[error("could not init scheduler; {0}")]
    FailedSchedulerPrecondition(String),

    /// Failed to communicate with scheduler due to network error or other.
    #[error("could not connect to scheduler; {0}")]
    Connection(String),

    /// The job definition could not be resolved to something runnable.
    #[error("job definition not found; {0}")]
    NoSuchJobDefinition(String),

    /// The scheduler answered but refused the request. Code and message are passed through untouched.
    #[error("scheduler rejected request; [{code}] {message}")]
    Backend { code: String, message: String },

    /// An expected and unknown error has occurred.
    #[error("unexpected scheduler error occurred; {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitJobRequest {
    /// Name the job is registered under; downstream log filtering keys off of it.
    pub job_name: String,
    pub job_queue: String,
    /// What to run; for container based schedulers this is the image.
    pub job_definition: String,
    /// Replaces the job definition's command.
    pub command: Vec<String>,
    /// Environment variables passed to the job on top of the definition's own.
    pub environment: HashMap<String, String>,
    /// Total attempts the scheduler may make. 1 means the job is never retried.
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitJobResponse {
    /// The scheduler's identifier for the submitted job.
    pub job_id: String,
}

/// The scheduler trait defines what the interface between wfctl and a batch compute backend should look like.
#[async_trait]
pub trait Scheduler: Debug + Send + Sync {
    /// Submit a single job. Returns once the backend has accepted (or refused) it; does not wait for the job.
    async fn submit_job(&self, request: SubmitJobRequest)
        -> Result<SubmitJobResponse, SchedulerError>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Engine {
    #[default]
    Docker,
}

pub async fn init_scheduler(
    config: &crate::conf::Batch,
) -> Result<Arc<dyn Scheduler>, SchedulerError> {
    #[allow(clippy::match_single_binding)]
    match config.engine {
        Engine::Docker => {
            if let Some(config) = &config.docker {
                let engine = docker::Scheduler::new(config).await?;
                Ok(Arc::new(engine))
            } else {
                Err(SchedulerError::FailedSchedulerPrecondition(
                    "docker engine settings not found in config".into(),
                ))
            }
        }
    }
}

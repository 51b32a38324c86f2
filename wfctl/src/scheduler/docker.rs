use super::{SchedulerError, SubmitJobRequest, SubmitJobResponse};
use async_trait::async_trait;
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use futures::stream::TryStreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Label carrying the queue a job was submitted to, so jobs can be filtered per queue.
const QUEUE_LABEL: &str = "wfctl.queue";

fn format_env_var(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The total amount of time any request is allowed to be pending for in seconds.
    pub timeout: u64,
}

impl From<bollard::errors::Error> for SchedulerError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => SchedulerError::Backend {
                code: status_code.to_string(),
                message,
            },
            bollard::errors::Error::RequestTimeoutError => {
                SchedulerError::Connection("request to docker daemon timed out".into())
            }
            _ => SchedulerError::Unknown(err.to_string()),
        }
    }
}

/// Maps an attempt budget onto a docker restart policy. Docker counts retries, not attempts.
fn restart_policy(retry_attempts: u32) -> RestartPolicy {
    if retry_attempts <= 1 {
        RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: None,
        }
    } else {
        RestartPolicy {
            name: Some(RestartPolicyNameEnum::ON_FAILURE),
            maximum_retry_count: Some(i64::from(retry_attempts - 1)),
        }
    }
}

/// Runs each job as a local container, treating the job definition as the image to run.
#[derive(Debug, Clone)]
pub struct Scheduler {
    client: bollard::Docker,
}

impl Scheduler {
    #[instrument(fields(origin = "scheduler::docker"))]
    pub async fn new(config: &Config) -> Result<Self, SchedulerError> {
        let client = bollard::Docker::connect_with_socket_defaults().map_err(|e| {
            SchedulerError::Connection(format!(
                "{}; Make sure the Docker daemon is installed and running.",
                e
            ))
        })?;
        let client = client.with_timeout(tokio::time::Duration::from_secs(config.timeout));

        // Check that we can actually get a connection.
        let version = client.version().await.map_err(|e| {
            SchedulerError::Connection(format!(
                "{}; Make sure the Docker daemon is installed and running.",
                e
            ))
        })?;

        debug!(
            version = %version.version.unwrap_or_default(),
            "Local docker scheduler successfully connected"
        );

        Ok(Self { client })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SchedulerError> {
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![image.to_string()]);

        let images = self
            .client
            .list_images(Some(bollard::image::ListImagesOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        if images.is_empty() {
            self.client
                .create_image(
                    Some(bollard::image::CreateImageOptions {
                        from_image: image.to_string(),
                        ..Default::default()
                    }),
                    None,
                    None,
                )
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| SchedulerError::NoSuchJobDefinition(format!("{image}; {e}")))?;
        }

        Ok(())
    }
}

#[async_trait]
impl super::Scheduler for Scheduler {
    #[instrument(skip(self), fields(origin = "scheduler::docker"))]
    async fn submit_job(
        &self,
        request: SubmitJobRequest,
    ) -> Result<SubmitJobResponse, SchedulerError> {
        self.ensure_image(&request.job_definition).await?;

        let mut labels = HashMap::new();
        labels.insert(QUEUE_LABEL.to_string(), request.job_queue.clone());

        let container_config = bollard::container::Config {
            image: Some(request.job_definition.clone()),
            cmd: Some(request.command.clone()),
            env: Some(
                request
                    .environment
                    .iter()
                    .map(|(key, value)| format_env_var(key, value))
                    .collect(),
            ),
            labels: Some(labels),
            host_config: Some(HostConfig {
                restart_policy: Some(restart_policy(request.retry_attempts)),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created_container = self
            .client
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name: request.job_name.as_str(),
                    platform: None,
                }),
                container_config,
            )
            .await?;

        self.client
            .start_container::<String>(&created_container.id, None)
            .await?;

        debug!(
            job_name = %request.job_name,
            job_id = %created_container.id,
            "Submitted job to docker"
        );

        Ok(SubmitJobResponse {
            job_id: created_container.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_attempt_never_restarts() {
        assert_eq!(
            restart_policy(1),
            RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }
        );
        assert_eq!(restart_policy(0), restart_policy(1));
    }

    #[test]
    fn extra_attempts_become_retries() {
        assert_eq!(
            restart_policy(3),
            RestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: Some(2),
            }
        );
    }

    #[test]
    fn daemon_errors_keep_code_and_message() {
        let err = SchedulerError::from(bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "Conflict. The container name is already in use".into(),
        });

        assert_eq!(
            err,
            SchedulerError::Backend {
                code: "409".into(),
                message: "Conflict. The container name is already in use".into(),
            }
        );
    }
}

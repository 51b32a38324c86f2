//! Turns a pipeline revision and an uploaded input file into a running batch job plus its initial run record.

pub mod command;
pub mod mnemonic;
pub mod staging;

use crate::{
    conf,
    object_store::ObjectStore,
    scheduler::{Scheduler, SchedulerError, SubmitJobRequest},
    tracking::{
        self, DefaultAssignment, JobStatus, Match, NewRun, RegistryId, RunRecord, ScanFilters,
        TrackingError, TrackingStore,
    },
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, error, info, instrument};

/// `registry_type` of runs created by a submission; the registry id names the submitted file.
pub const SUBMISSION_REGISTRY_TYPE: &str = "hash_id";

/// Total attempts the backend gets for a submitted job. A failed job is never retried automatically.
pub const SUBMISSION_ATTEMPTS: u32 = 1;

/// Environment variable telling the job which region it runs in.
const JOB_REGION_ENV: &str = "NF_JOB_REGION";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmitRequest {
    /// Tag or commit of the pipeline to run.
    pub revision: String,
    /// Key of the uploaded input, relative to the upload prefix.
    pub input_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitResponse {
    pub status: String,
    pub hash_id: String,
    pub scheduler_job_id: String,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// The request or the configuration is unusable. Nothing external was touched.
    #[error("invalid submission; {0}")]
    Validation(String),

    #[error("could not stage input files; {0}")]
    Staging(#[from] staging::StagingError),

    /// The compute backend refused or failed the submission; no run record was written.
    #[error("job submission failed; [{code}] {message}")]
    Backend { code: String, message: String },

    #[error(transparent)]
    Tracking(#[from] TrackingError),
}

impl From<SchedulerError> for SubmitError {
    fn from(value: SchedulerError) -> Self {
        let code = match &value {
            SchedulerError::Backend { code, message } => {
                return SubmitError::Backend {
                    code: code.clone(),
                    message: message.clone(),
                }
            }
            SchedulerError::FailedSchedulerPrecondition(_) => "FailedPrecondition",
            SchedulerError::Connection(_) => "Connection",
            SchedulerError::NoSuchJobDefinition(_) => "NoSuchJobDefinition",
            SchedulerError::Unknown(_) => "Unknown",
        };

        SubmitError::Backend {
            code: code.into(),
            message: value.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: conf::Config,
    object_store: Arc<dyn ObjectStore>,
    scheduler: Arc<dyn Scheduler>,
    tracking: TrackingStore,
}

impl Orchestrator {
    pub fn new(
        config: conf::Config,
        object_store: Arc<dyn ObjectStore>,
        scheduler: Arc<dyn Scheduler>,
        tracking: TrackingStore,
    ) -> Self {
        Orchestrator {
            config,
            object_store,
            scheduler,
            tracking,
        }
    }

    /// Everything that can be checked without touching the object store, the backend or the tracking store.
    fn validate(&self, request: &SubmitRequest) -> Result<String, SubmitError> {
        self.config
            .validate_submission()
            .map_err(|e| SubmitError::Validation(e.to_string()))?;

        if request.revision.trim().is_empty() {
            return Err(SubmitError::Validation("revision must not be empty".into()));
        }
        if request.input_file.trim().is_empty() {
            return Err(SubmitError::Validation("input_file must not be empty".into()));
        }

        command::registry_id_from_filename(&request.input_file)
            .filter(|registry_id| !registry_id.is_empty())
            .ok_or_else(|| {
                SubmitError::Validation(format!(
                    "could not derive a registry id from input file '{}'",
                    request.input_file
                ))
            })
    }

    /// Makes `record` the only live default among the runs of its pipeline that share its registry id.
    async fn claim_default(&self, record: &RunRecord) -> Result<(), TrackingError> {
        // A list of ids is only matched as a whole under its registry type.
        let (registry_type, registry_ids) = match &record.registry_id {
            RegistryId::Single(id) => (None, vec![id.clone()]),
            RegistryId::Multi(ids) => (Some(record.registry_type.clone()), ids.clone()),
        };

        let siblings = self
            .tracking
            .scan_entries(&ScanFilters {
                pipeline_name: Some(Match::Exact(record.pipeline_name.clone())),
                registry_type,
                registry_ids,
                default: Some(true),
                removed: Some(false),
                ..Default::default()
            })
            .await?;

        let mut assignments = vec![DefaultAssignment {
            pipeline_name: record.pipeline_name.clone(),
            hash_id: record.hash_id.clone(),
            default: true,
        }];
        assignments.extend(
            siblings
                .into_iter()
                .filter(|sibling| sibling.hash_id != record.hash_id)
                .map(|sibling| DefaultAssignment {
                    pipeline_name: sibling.pipeline_name,
                    hash_id: sibling.hash_id,
                    default: false,
                }),
        );

        if assignments.len() == 1 {
            return Ok(());
        }

        debug!(
            hash_id = %record.hash_id,
            previous = assignments.len() - 1,
            "Moving default to new run"
        );

        self.tracking.update_batch_default_field(&assignments).await
    }

    /// Stages the input, submits the job and records the run.
    ///
    /// Configuration and request problems are caught before any external call. A job the backend does not
    /// accept leaves no run record behind.
    #[instrument(skip(self), fields(origin = "orchestrator"))]
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, SubmitError> {
        let registry_id = self.validate(&request)?;

        let hash_id =
            mnemonic::mnemonic_hash().map_err(|e| SubmitError::Validation(e.to_string()))?;

        let staged = staging::setup_files(
            self.object_store.as_ref(),
            &self.config,
            &request.input_file,
            &hash_id,
        )
        .await
        .map_err(|e| {
            error!(%hash_id, input_file = %request.input_file, error = %e, "Could not stage input files");
            e
        })?;

        debug!(%hash_id, input = %staged.input, samplesheet = %staged.samplesheet, "Inputs staged");

        let pipeline = &self.config.pipeline;
        let batch = &self.config.batch;
        let stage = &self.config.general.stage;

        let output_root = staging::public_url(&self.config.staging, &self.config.staging.outputs_dir);
        let gpu_queue = pipeline.with_gpu.then_some(batch.gpu_queue.as_str());

        let command_line = command::get_command_string(&command::CommandOptions {
            repository: &pipeline.repository,
            profile: &pipeline.profile,
            revision: &request.revision,
            output_path: &output_root,
            pipeline_name: &pipeline.name,
            hash_id: &hash_id,
            input: &staged.samplesheet,
            stage,
            gpu_queue,
        });

        let argv = shlex::split(&command_line).ok_or_else(|| {
            SubmitError::Validation(format!("could not tokenize command '{command_line}'"))
        })?;

        let job_name = command::get_job_name(
            &pipeline.name,
            &hash_id,
            command::stage_name(stage),
            &registry_id,
        );

        let date_start = tracking::record::now();

        let submitted = self
            .scheduler
            .submit_job(SubmitJobRequest {
                job_name: job_name.clone(),
                job_queue: batch.master_queue.clone(),
                job_definition: batch.job_definition.clone(),
                command: argv,
                environment: HashMap::from([(JOB_REGION_ENV.to_string(), batch.region.clone())]),
                retry_attempts: SUBMISSION_ATTEMPTS,
            })
            .await
            .map_err(|e| {
                let err = SubmitError::from(e);
                if let SubmitError::Backend { code, message } = &err {
                    error!(%job_name, %code, %message, "Error when submitting job");
                }
                err
            })?;

        debug!(%job_name, job_id = %submitted.job_id, "Job submitted");

        let record = self
            .tracking
            .add_entry(NewRun {
                pipeline_name: pipeline.name.clone(),
                hash_id: hash_id.clone(),
                pipeline_version: request.revision.clone(),
                registry_type: SUBMISSION_REGISTRY_TYPE.into(),
                registry_id: RegistryId::Single(registry_id),
                date_start,
                date_end: None,
                command: command_line,
                job_status: JobStatus::Submitted,
                default: true,
                tag: "".into(),
                output_path: format!("{output_root}/{}/{hash_id}", pipeline.name),
                pipeline_tools_submit_parameters: None,
                cloning_parameters: None,
                scheduler_job_id: submitted.job_id.clone(),
                user_id: None,
                user_email: None,
            })
            .await
            .map_err(|e| {
                error!(
                    %hash_id,
                    job_id = %submitted.job_id,
                    error = %e,
                    "Job was submitted but its run could not be recorded"
                );
                e
            })?;

        self.claim_default(&record).await.map_err(|e| {
            error!(
                %hash_id,
                error = %e,
                "Run was recorded but earlier runs of the same input could not lose their default flag"
            );
            e
        })?;

        info!(
            pipeline_name = %record.pipeline_name,
            hash_id = %record.hash_id,
            job_id = %record.scheduler_job_id,
            "Run submitted"
        );

        Ok(SubmitResponse {
            status: "success".into(),
            hash_id,
            scheduler_job_id: submitted.job_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        object_store::Store,
        scheduler::SubmitJobResponse,
        storage::tests::TestHarness,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use figment::Jail;
    use object_store::memory::InMemory;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Records every request; answers with a fixed job id or a backend refusal.
    #[derive(Debug, Default)]
    struct RecordingScheduler {
        requests: Mutex<Vec<SubmitJobRequest>>,
        refuse: bool,
    }

    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn submit_job(
            &self,
            request: SubmitJobRequest,
        ) -> Result<SubmitJobResponse, SchedulerError> {
            self.requests.lock().unwrap().push(request);

            if self.refuse {
                return Err(SchedulerError::Backend {
                    code: "ClientException".into(),
                    message: "job queue is disabled".into(),
                });
            }

            Ok(SubmitJobResponse {
                job_id: "job-0001".into(),
            })
        }
    }

    fn test_config() -> conf::Config {
        let mut config = None;
        Jail::expect_with(|_jail| {
            config = Some(conf::Config::load(Some("does_not_exist.toml")).unwrap());
            Ok(())
        });

        let mut config = config.unwrap();
        config.general.stage = "prod".into();
        config.batch.region = "eu-west-2".into();
        config.batch.master_queue = "master-queue".into();
        config.batch.job_definition = "nextflow:3".into();
        config.batch.gpu_queue = "gpu-queue".into();
        config.staging.public_url = "s3://bucket".into();
        config
    }

    struct Setup {
        _harness: TestHarness,
        object_store: Arc<Store<InMemory>>,
        scheduler: Arc<RecordingScheduler>,
        tracking: TrackingStore,
        orchestrator: Orchestrator,
    }

    async fn setup(config: conf::Config, refuse: bool) -> Setup {
        let harness = TestHarness::new().await;
        let tracking = TrackingStore::new(harness.db.clone(), &config.tracking);

        let object_store = Arc::new(Store::new(InMemory::new()));
        object_store
            .put("uploads/SE-001.tsv", Bytes::from("sequence\nEVQLVESGG\n"), false)
            .await
            .unwrap();

        let scheduler = Arc::new(RecordingScheduler {
            refuse,
            ..Default::default()
        });

        let orchestrator = Orchestrator::new(
            config,
            object_store.clone(),
            scheduler.clone(),
            tracking.clone(),
        );

        Setup {
            _harness: harness,
            object_store,
            scheduler,
            tracking,
            orchestrator,
        }
    }

    fn request(input_file: &str) -> SubmitRequest {
        SubmitRequest {
            revision: "v1.2.0".into(),
            input_file: input_file.into(),
        }
    }

    #[tokio::test]
    async fn submit_stages_submits_and_records() {
        let setup = setup(test_config(), false).await;

        let response = setup
            .orchestrator
            .submit(request("SE-001.tsv"))
            .await
            .unwrap();

        assert_eq!(response.status, "success");
        assert_eq!(response.scheduler_job_id, "job-0001");
        let hash_id = response.hash_id.clone();

        let samplesheet_url = format!("s3://bucket/inputs/autoantibodyclassifier/{hash_id}/samplesheet.csv");
        assert!(setup
            .object_store
            .exists(&format!("inputs/autoantibodyclassifier/{hash_id}/input_file.tsv"))
            .await
            .unwrap());

        let requests = setup.scheduler.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        let submitted = &requests[0];

        assert_eq!(
            submitted.job_name,
            format!("wf-production-autoantibodyclassifier-{hash_id}-SE001")
        );
        assert_eq!(submitted.job_queue, "master-queue");
        assert_eq!(submitted.job_definition, "nextflow:3");
        assert_eq!(submitted.retry_attempts, 1);
        assert_eq!(
            submitted.environment,
            HashMap::from([("NF_JOB_REGION".to_string(), "eu-west-2".to_string())])
        );

        let expected_command = format!(
            "https://github.com/alchemab/wf-nf-autoantibodyclassifier.git -profile awsbatch -revision v1.2.0 \
            --outdir s3://bucket/outputs/autoantibodyclassifier/{hash_id} --input {samplesheet_url} \
            --with_gpu true --stage prod --awsgpuqueue gpu-queue"
        );
        assert_eq!(submitted.command.join(" "), expected_command);

        let record = setup
            .tracking
            .get_entry("autoantibodyclassifier", &hash_id)
            .await
            .unwrap()
            .expect("run should have been recorded");

        assert_eq!(record.job_status, JobStatus::Submitted);
        assert_eq!(record.pipeline_version, "v1.2.0");
        assert_eq!(record.registry_type, "hash_id");
        assert_eq!(record.registry_id, RegistryId::Single("SE001".into()));
        assert_eq!(record.command, expected_command);
        assert_eq!(record.scheduler_job_id, "job-0001");
        assert_eq!(
            record.output_path,
            format!("s3://bucket/outputs/autoantibodyclassifier/{hash_id}")
        );
        assert!(record.default);
        assert_eq!(record.tag, "");
        assert!(!record.removed);
        assert_eq!(record.removed_date, None);
        assert_eq!(record.date_end, None);
    }

    #[tokio::test]
    async fn resubmitting_an_input_moves_the_default() {
        let setup = setup(test_config(), false).await;

        let first = setup
            .orchestrator
            .submit(request("SE-001.tsv"))
            .await
            .unwrap();
        let second = setup
            .orchestrator
            .submit(request("SE-001.tsv"))
            .await
            .unwrap();
        assert_ne!(first.hash_id, second.hash_id);

        let defaults = setup
            .tracking
            .scan_entries(&ScanFilters {
                registry_ids: vec!["SE001".into()],
                default: Some(true),
                removed: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        let hash_ids: Vec<_> = defaults.into_iter().map(|run| run.hash_id).collect();
        assert_eq!(hash_ids, vec![second.hash_id.clone()]);

        let earlier = setup
            .tracking
            .get_entry("autoantibodyclassifier", &first.hash_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!earlier.default);
    }

    #[tokio::test]
    async fn refused_submission_writes_no_record() {
        let setup = setup(test_config(), true).await;

        let err = setup
            .orchestrator
            .submit(request("SE-001.tsv"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SubmitError::Backend {
                code: "ClientException".into(),
                message: "job queue is disabled".into()
            }
        );
        assert_eq!(setup.scheduler.requests.lock().unwrap().len(), 1);
        assert!(setup
            .tracking
            .scan_entries(&ScanFilters::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn missing_configuration_aborts_before_external_calls() {
        let mut config = test_config();
        config.batch.master_queue = "".into();
        let setup = setup(config, false).await;

        let err = setup
            .orchestrator
            .submit(request("SE-001.tsv"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SubmitError::Validation("missing required configuration: batch.master_queue".into())
        );
        assert!(setup.scheduler.requests.lock().unwrap().is_empty());
        assert!(setup
            .tracking
            .scan_entries(&ScanFilters::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn gpu_queue_is_only_required_with_gpus() {
        let mut config = test_config();
        config.batch.gpu_queue = "".into();
        config.pipeline.with_gpu = false;
        let setup = setup(config, false).await;

        setup
            .orchestrator
            .submit(request("SE-001.tsv"))
            .await
            .unwrap();

        let requests = setup.scheduler.requests.lock().unwrap().clone();
        let command = requests[0].command.join(" ");
        assert!(command.contains("--with_gpu false"));
        assert!(!command.contains("--awsgpuqueue"));
    }

    #[tokio::test]
    async fn unusable_requests_are_rejected() {
        let setup = setup(test_config(), false).await;

        for request in [
            request("no_extension"),
            SubmitRequest {
                revision: " ".into(),
                input_file: "SE-001.tsv".into(),
            },
        ] {
            let err = setup.orchestrator.submit(request).await.unwrap_err();
            assert!(matches!(err, SubmitError::Validation(_)), "{err}");
        }

        let err = setup
            .orchestrator
            .submit(request("never_uploaded.tsv"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Staging(_)), "{err}");

        assert!(setup.scheduler.requests.lock().unwrap().is_empty());
    }
}

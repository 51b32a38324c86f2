use crate::{
    conf,
    object_store::{ObjectStore, ObjectStoreError},
};
use bytes::Bytes;
use tracing::{debug, instrument};

pub const SAMPLESHEET_NAME: &str = "samplesheet.csv";

/// Where a run's staged inputs live, as the compute backend addresses them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFiles {
    pub input: String,
    pub samplesheet: String,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StagingError {
    #[error("input file '{0}' is not a valid upload key")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

/// Joins key segments with `/`, dropping empty segments and stray separators.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Turns a store key into the URL the compute backend reads it from.
pub fn public_url(config: &conf::Staging, key: &str) -> String {
    format!("{}/{}", config.public_url.trim_end_matches('/'), key)
}

/// The extension the staged copy of `input_file` keeps.
pub fn input_extension(input_file: &str) -> Option<&str> {
    let filename = input_file.rsplit('/').next()?;
    let (_, extension) = filename.rsplit_once('.')?;

    if extension.is_empty() {
        None
    } else {
        Some(extension)
    }
}

fn samplesheet(input_url: &str, hash_id: &str) -> Bytes {
    Bytes::from(format!("input_file,hash_id\n{input_url},{hash_id}\n"))
}

/// Stages an uploaded input for a run.
///
/// The upload at `{upload_prefix}/{input_file}` is copied to `{inputs_dir}/{pipeline}/{hash_id}/input_file.{ext}`
/// so every run presents the same layout, and a single row samplesheet pointing at that copy is written next to
/// it.
#[instrument(skip(store, config), fields(origin = "orchestrator"))]
pub async fn setup_files(
    store: &dyn ObjectStore,
    config: &conf::Config,
    input_file: &str,
    hash_id: &str,
) -> Result<StagedFiles, StagingError> {
    if input_file.split('/').any(|segment| segment == "..") {
        return Err(StagingError::InvalidInput(input_file.into()));
    }

    let extension =
        input_extension(input_file).ok_or_else(|| StagingError::InvalidInput(input_file.into()))?;

    let staging = &config.staging;
    let run_dir = join_key(&[&staging.inputs_dir, &config.pipeline.name, hash_id]);

    let upload_key = join_key(&[&staging.upload_prefix, input_file]);
    let input_key = join_key(&[&run_dir, &format!("input_file.{extension}")]);
    let samplesheet_key = join_key(&[&run_dir, SAMPLESHEET_NAME]);

    store.copy(&upload_key, &input_key).await?;

    let input_url = public_url(staging, &input_key);
    store
        .put(&samplesheet_key, samplesheet(&input_url, hash_id), true)
        .await?;

    debug!(from = %upload_key, to = %input_key, "Staged input files");

    Ok(StagedFiles {
        input: input_url,
        samplesheet: public_url(staging, &samplesheet_key),
    })
}

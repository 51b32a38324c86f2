//! The tracking store: durable, queryable records of every pipeline run.
//!
//! Runs are keyed by `(pipeline_name, hash_id)`. Creation is the only operation that materializes a key; every
//! other write is conditional on the key already existing and fails with [`TrackingError::NotFound`] otherwise,
//! leaving the store untouched. Records are never physically deleted, only soft deleted and restored.

pub mod filters;
pub mod record;

pub use filters::{Match, ScanFilters};
pub use record::{JobStatus, NewRun, RegistryId, RunRecord, RunUpdate};

use crate::{
    conf,
    storage::{self, map_sqlx_error, runs, Db, StorageError},
};
use tracing::{debug, error, instrument};

/// Rows returned by a search when the caller gives no limit.
pub const DEFAULT_SEARCH_LIMIT: u64 = 20;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TrackingError {
    /// The run a conditional operation targets does not exist.
    #[error("run '{hash_id}' of pipeline '{pipeline_name}' not found")]
    NotFound {
        pipeline_name: String,
        hash_id: String,
    },

    /// The backing store failed or could not be reached. Callers decide whether to retry.
    #[error("tracking store unavailable; {0}")]
    StoreUnavailable(String),

    #[error("invalid request; {0}")]
    Validation(String),

    /// A stored row could not be read back into a run record.
    #[error("stored run could not be read; {0}")]
    Corrupt(String),
}

/// Requested value of the default flag for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultAssignment {
    pub pipeline_name: String,
    pub hash_id: String,
    pub default: bool,
}

/// Logs a storage failure with the run and operation it happened during, then maps it into the tracking
/// taxonomy.
fn store_error(
    operation: &str,
    pipeline_name: &str,
    hash_id: &str,
    err: StorageError,
) -> TrackingError {
    match err {
        StorageError::NotFound => TrackingError::NotFound {
            pipeline_name: pipeline_name.into(),
            hash_id: hash_id.into(),
        },
        StorageError::Parse { .. } => {
            error!(pipeline_name, hash_id, operation, error = %err, "Could not parse stored run");
            TrackingError::Corrupt(err.to_string())
        }
        _ => {
            error!(pipeline_name, hash_id, operation, error = %err, "Tracking store operation failed");
            TrackingError::StoreUnavailable(err.to_string())
        }
    }
}

fn to_record(run: runs::Run) -> Result<RunRecord, TrackingError> {
    let pipeline_name = run.pipeline_name.clone();
    let hash_id = run.hash_id.clone();

    RunRecord::try_from(run).map_err(|e| {
        error!(%pipeline_name, %hash_id, error = %e, "Could not parse stored run");
        TrackingError::Corrupt(format!("{e:#}"))
    })
}

fn validate_key(pipeline_name: &str, hash_id: &str) -> Result<(), TrackingError> {
    if pipeline_name.trim().is_empty() {
        return Err(TrackingError::Validation("pipeline_name must not be empty".into()));
    }
    if hash_id.trim().is_empty() {
        return Err(TrackingError::Validation("hash_id must not be empty".into()));
    }

    Ok(())
}

fn validate_new_run(run: &NewRun) -> Result<(), TrackingError> {
    validate_key(&run.pipeline_name, &run.hash_id)?;
    run.registry_id
        .check_type(&run.registry_type)
        .map_err(TrackingError::Validation)
}

#[derive(Debug, Clone)]
pub struct TrackingStore {
    db: Db,
    scan_page_size: u64,
}

impl TrackingStore {
    pub fn new(db: Db, config: &conf::Tracking) -> Self {
        TrackingStore {
            db,
            scan_page_size: config.scan_page_size.clamp(1, storage::MAX_ROW_LIMIT),
        }
    }

    /// Opens the store named by the configuration, provisioning it if it does not exist yet.
    pub async fn open(config: &conf::Tracking) -> Result<Self, TrackingError> {
        let db = Db::new(&config.storage_path, config.read_capacity)
            .await
            .map_err(|e| {
                error!(path = %config.storage_path, error = %e, "Could not open tracking store");
                TrackingError::StoreUnavailable(e.to_string())
            })?;

        Ok(Self::new(db, config))
    }

    /// Writes a new run. The key is not checked; a run that already holds it is replaced.
    #[instrument(skip(self), fields(origin = "tracking"))]
    pub async fn add_entry(&self, run: NewRun) -> Result<RunRecord, TrackingError> {
        validate_new_run(&run)?;

        let record = RunRecord::from(run);
        let row = runs::Run::try_from(&record)
            .map_err(|e| TrackingError::Validation(format!("{e:#}")))?;

        let mut conn = self
            .db
            .write_conn()
            .await
            .map_err(|e| store_error("add_entry", &record.pipeline_name, &record.hash_id, e))?;

        runs::insert(&mut conn, &row)
            .await
            .map_err(|e| store_error("add_entry", &record.pipeline_name, &record.hash_id, e))?;

        debug!(
            pipeline_name = %record.pipeline_name,
            hash_id = %record.hash_id,
            "Added run"
        );

        Ok(record)
    }

    /// Writes many runs at once. Either all of them land or none do.
    #[instrument(skip_all, fields(origin = "tracking"))]
    pub async fn write_batch(&self, new_runs: Vec<NewRun>) -> Result<(), TrackingError> {
        let mut rows = Vec::with_capacity(new_runs.len());
        for run in new_runs {
            validate_new_run(&run)?;
            let record = RunRecord::from(run);
            rows.push(
                runs::Run::try_from(&record)
                    .map_err(|e| TrackingError::Validation(format!("{e:#}")))?,
            );
        }

        let mut tx = self
            .db
            .open_tx()
            .await
            .map_err(|e| store_error("write_batch", "", "", e))?;

        for row in &rows {
            runs::insert(&mut tx, row)
                .await
                .map_err(|e| store_error("write_batch", &row.pipeline_name, &row.hash_id, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| store_error("write_batch", "", "", map_sqlx_error(e, "COMMIT;")))?;

        debug!(count = rows.len(), "Wrote batch of runs");

        Ok(())
    }

    /// Returns the run, or `None` if it does not exist.
    #[instrument(skip(self), fields(origin = "tracking"))]
    pub async fn get_entry(
        &self,
        pipeline_name: &str,
        hash_id: &str,
    ) -> Result<Option<RunRecord>, TrackingError> {
        let mut conn = self
            .db
            .read_conn()
            .await
            .map_err(|e| store_error("get_entry", pipeline_name, hash_id, e))?;

        match runs::get(&mut conn, pipeline_name, hash_id).await {
            Ok(run) => to_record(run).map(Some),
            Err(StorageError::NotFound) => Ok(None),
            Err(e) => Err(store_error("get_entry", pipeline_name, hash_id, e)),
        }
    }

    /// Writes every populated field of `update` to an existing run in a single statement.
    ///
    /// Returns the fields written, by name, with their new values. An empty update writes nothing but still
    /// requires the run to exist.
    #[instrument(skip(self), fields(origin = "tracking"))]
    pub async fn update_entry(
        &self,
        pipeline_name: &str,
        hash_id: &str,
        update: RunUpdate,
    ) -> Result<serde_json::Map<String, serde_json::Value>, TrackingError> {
        update.validate().map_err(TrackingError::Validation)?;
        let update = update.normalized(record::now());

        let fields = runs::UpdatableFields::try_from(&update)
            .map_err(|e| TrackingError::Validation(format!("{e:#}")))?;
        let changes = update
            .changes()
            .map_err(|e| TrackingError::Validation(format!("{e:#}")))?;

        let mut conn = self
            .db
            .write_conn()
            .await
            .map_err(|e| store_error("update_entry", pipeline_name, hash_id, e))?;

        runs::update(&mut conn, pipeline_name, hash_id, &fields)
            .await
            .map_err(|e| store_error("update_entry", pipeline_name, hash_id, e))?;

        Ok(changes)
    }

    /// Every run of a single pipeline.
    #[instrument(skip(self), fields(origin = "tracking"))]
    pub async fn query_entries(&self, pipeline_name: &str) -> Result<Vec<RunRecord>, TrackingError> {
        let mut conn = self
            .db
            .read_conn()
            .await
            .map_err(|e| store_error("query_entries", pipeline_name, "", e))?;

        let rows = runs::query(&mut conn, pipeline_name)
            .await
            .map_err(|e| store_error("query_entries", pipeline_name, "", e))?;

        rows.into_iter().map(to_record).collect()
    }

    /// Every run matching all of `filters`, read page by page until the table is exhausted. Removed runs are
    /// included unless `filters.removed` says otherwise.
    #[instrument(skip(self), fields(origin = "tracking"))]
    pub async fn scan_entries(&self, filters: &ScanFilters) -> Result<Vec<RunRecord>, TrackingError> {
        let filter = runs::ScanFilter::try_from(filters)
            .map_err(|e| TrackingError::Validation(format!("{e:#}")))?;

        let mut conn = self
            .db
            .read_conn()
            .await
            .map_err(|e| store_error("scan_entries", "", "", e))?;

        let mut records = vec![];
        let mut start_key: Option<runs::RunKey> = None;
        let mut pages = 0;

        loop {
            let page = runs::scan_page(&mut conn, &filter, start_key.as_ref(), self.scan_page_size)
                .await
                .map_err(|e| {
                    let (pipeline_name, hash_id) = start_key
                        .as_ref()
                        .map(|key| (key.pipeline_name.as_str(), key.hash_id.as_str()))
                        .unwrap_or_default();
                    store_error("scan_entries", pipeline_name, hash_id, e)
                })?;

            pages += 1;

            for row in page.runs {
                records.push(to_record(row)?);
            }

            match page.last_evaluated_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }

        debug!(pages, count = records.len(), "Scan complete");

        Ok(records)
    }

    /// Runs whose hash id contains `search`, oldest first.
    #[instrument(skip(self), fields(origin = "tracking"))]
    pub async fn search_entries(
        &self,
        search: &str,
        limit: Option<u64>,
    ) -> Result<Vec<RunRecord>, TrackingError> {
        let limit = limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .min(storage::MAX_ROW_LIMIT);

        let mut conn = self
            .db
            .read_conn()
            .await
            .map_err(|e| store_error("search_entries", "", search, e))?;

        let rows = runs::search(&mut conn, search, limit)
            .await
            .map_err(|e| store_error("search_entries", "", search, e))?;

        rows.into_iter().map(to_record).collect()
    }

    /// Soft deletes a run, stamping the removal time.
    #[instrument(skip(self), fields(origin = "tracking"))]
    pub async fn remove_entry(&self, pipeline_name: &str, hash_id: &str) -> Result<(), TrackingError> {
        let removed_date = record::format_timestamp(&record::now());

        let mut conn = self
            .db
            .write_conn()
            .await
            .map_err(|e| store_error("remove_entry", pipeline_name, hash_id, e))?;

        runs::set_removed(&mut conn, pipeline_name, hash_id, true, Some(&removed_date))
            .await
            .map_err(|e| store_error("remove_entry", pipeline_name, hash_id, e))?;

        debug!(pipeline_name, hash_id, %removed_date, "Removed run");

        Ok(())
    }

    /// Reverses a soft delete; the removal time is cleared with the flag.
    #[instrument(skip(self), fields(origin = "tracking"))]
    pub async fn restore_entry(&self, pipeline_name: &str, hash_id: &str) -> Result<(), TrackingError> {
        let mut conn = self
            .db
            .write_conn()
            .await
            .map_err(|e| store_error("restore_entry", pipeline_name, hash_id, e))?;

        runs::set_removed(&mut conn, pipeline_name, hash_id, false, None)
            .await
            .map_err(|e| store_error("restore_entry", pipeline_name, hash_id, e))?;

        debug!(pipeline_name, hash_id, "Restored run");

        Ok(())
    }

    /// Applies every assignment in one transaction. If any targeted run does not exist nothing changes and
    /// `NotFound` names the first missing run.
    #[instrument(skip(self), fields(origin = "tracking"))]
    pub async fn update_batch_default_field(
        &self,
        assignments: &[DefaultAssignment],
    ) -> Result<(), TrackingError> {
        if assignments.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .db
            .open_tx()
            .await
            .map_err(|e| store_error("update_batch_default_field", "", "", e))?;

        for assignment in assignments {
            // Returning early drops the transaction, which rolls back anything already applied.
            runs::set_default(
                &mut tx,
                &assignment.pipeline_name,
                &assignment.hash_id,
                assignment.default,
            )
            .await
            .map_err(|e| {
                store_error(
                    "update_batch_default_field",
                    &assignment.pipeline_name,
                    &assignment.hash_id,
                    e,
                )
            })?;
        }

        tx.commit().await.map_err(|e| {
            store_error(
                "update_batch_default_field",
                "",
                "",
                map_sqlx_error(e, "COMMIT;"),
            )
        })?;

        debug!(count = assignments.len(), "Reassigned default runs");

        Ok(())
    }
}

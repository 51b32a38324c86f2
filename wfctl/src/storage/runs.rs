use crate::storage::{map_sqlx_error, StorageError};
use futures::TryFutureExt;
use sqlx::{Execute, FromRow, QueryBuilder, Sqlite, SqliteConnection};

const COLUMNS: &str = "pipeline_name, hash_id, pipeline_version, registry_type, registry_id, \
    date_start, date_end, command, job_status, is_default, tag, output_path, \
    pipeline_tools_submit_parameters, cloning_parameters, scheduler_job_id, user_id, user_email, \
    removed, removed_date, error_data, log_stream";

/// A single pipeline run row. Structured columns (`registry_id`, the parameter blobs and `error_data`)
/// are stored as JSON text.
#[derive(Clone, Debug, Default, FromRow, PartialEq, Eq)]
pub struct Run {
    pub pipeline_name: String,
    pub hash_id: String,
    pub pipeline_version: String,
    pub registry_type: String,
    pub registry_id: String,
    pub date_start: String,
    pub date_end: Option<String>,
    pub command: String,
    pub job_status: String,
    pub is_default: bool,
    pub tag: String,
    pub output_path: String,
    pub pipeline_tools_submit_parameters: Option<String>,
    pub cloning_parameters: Option<String>,
    pub scheduler_job_id: String,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub removed: bool,
    pub removed_date: Option<String>,
    pub error_data: Option<String>,
    pub log_stream: Option<String>,
}

/// The composite primary key of a run row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunKey {
    pub pipeline_name: String,
    pub hash_id: String,
}

/// A value written by an update. `Null` clears a nullable column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    Null,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdatableFields {
    pub pipeline_version: Option<String>,
    pub registry_type: Option<String>,
    pub registry_id: Option<String>,
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    pub command: Option<String>,
    pub job_status: Option<String>,
    pub is_default: Option<bool>,
    pub tag: Option<String>,
    pub output_path: Option<String>,
    pub pipeline_tools_submit_parameters: Option<String>,
    pub cloning_parameters: Option<String>,
    pub scheduler_job_id: Option<String>,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub removed: Option<bool>,
    pub removed_date: Option<FieldValue>,
    pub error_data: Option<String>,
    pub log_stream: Option<String>,
}

impl UpdatableFields {
    /// Every updatable column paired with the value it should take. `None` leaves the column untouched.
    fn assignments(&self) -> [(&'static str, Option<FieldValue>); 19] {
        let text = |value: &Option<String>| value.clone().map(FieldValue::Text);
        let boolean = |value: &Option<bool>| value.map(FieldValue::Bool);

        [
            ("pipeline_version", text(&self.pipeline_version)),
            ("registry_type", text(&self.registry_type)),
            ("registry_id", text(&self.registry_id)),
            ("date_start", text(&self.date_start)),
            ("date_end", text(&self.date_end)),
            ("command", text(&self.command)),
            ("job_status", text(&self.job_status)),
            ("is_default", boolean(&self.is_default)),
            ("tag", text(&self.tag)),
            ("output_path", text(&self.output_path)),
            (
                "pipeline_tools_submit_parameters",
                text(&self.pipeline_tools_submit_parameters),
            ),
            ("cloning_parameters", text(&self.cloning_parameters)),
            ("scheduler_job_id", text(&self.scheduler_job_id)),
            ("user_id", text(&self.user_id)),
            ("user_email", text(&self.user_email)),
            ("removed", boolean(&self.removed)),
            ("removed_date", self.removed_date.clone()),
            ("error_data", text(&self.error_data)),
            ("log_stream", text(&self.log_stream)),
        ]
    }
}

/// How a text column is compared during a scan. Timestamps are stored as `YYYY-MM-DD HH:MM:SS` so ranges
/// compare correctly as text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextMatch {
    Exact(String),
    Between(String, String),
    AtLeast(String),
    AtMost(String),
}

/// Column predicates for a full table scan. Every populated predicate must hold for a row to be returned.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub pipeline_name: Option<TextMatch>,
    pub hash_ids: Vec<String>,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub pipeline_version: Option<String>,
    pub registry_type: Option<String>,
    /// Exact stored (JSON encoded) registry id values, any of which may match.
    pub registry_ids: Vec<String>,
    pub date_start: Option<TextMatch>,
    pub date_end: Option<TextMatch>,
    pub job_status: Option<String>,
    pub is_default: Option<bool>,
    pub tag: Option<String>,
    pub removed: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub runs: Vec<Run>,
    /// Present when more rows may follow; pass it back as the exclusive start key of the next page.
    pub last_evaluated_key: Option<RunKey>,
}

fn push_text_match(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, matcher: &TextMatch) {
    builder.push(format!(" AND {column}"));
    match matcher {
        TextMatch::Exact(value) => {
            builder.push(" = ").push_bind(value.clone());
        }
        TextMatch::Between(from, to) => {
            builder
                .push(" BETWEEN ")
                .push_bind(from.clone())
                .push(" AND ")
                .push_bind(to.clone());
        }
        TextMatch::AtLeast(value) => {
            builder.push(" >= ").push_bind(value.clone());
        }
        TextMatch::AtMost(value) => {
            builder.push(" <= ").push_bind(value.clone());
        }
    }
}

fn push_any_of(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }

    builder.push(format!(" AND {column} IN ("));
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}

fn push_equals<T>(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, value: &Option<T>)
where
    T: Clone + for<'q> sqlx::Encode<'q, Sqlite> + sqlx::Type<Sqlite> + Send + 'static,
{
    if let Some(value) = value {
        builder.push(format!(" AND {column} = ")).push_bind(value.clone());
    }
}

/// Writes the run, replacing any row that already holds the same key.
pub async fn insert(conn: &mut SqliteConnection, run: &Run) -> Result<(), StorageError> {
    let query_str = format!(
        "INSERT OR REPLACE INTO pipeline_runs ({COLUMNS}) VALUES \
        (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);"
    );

    let query = sqlx::query(&query_str)
        .bind(&run.pipeline_name)
        .bind(&run.hash_id)
        .bind(&run.pipeline_version)
        .bind(&run.registry_type)
        .bind(&run.registry_id)
        .bind(&run.date_start)
        .bind(&run.date_end)
        .bind(&run.command)
        .bind(&run.job_status)
        .bind(run.is_default)
        .bind(&run.tag)
        .bind(&run.output_path)
        .bind(&run.pipeline_tools_submit_parameters)
        .bind(&run.cloning_parameters)
        .bind(&run.scheduler_job_id)
        .bind(&run.user_id)
        .bind(&run.user_email)
        .bind(run.removed)
        .bind(&run.removed_date)
        .bind(&run.error_data)
        .bind(&run.log_stream);

    let sql = query.sql();

    query
        .execute(conn)
        .map_ok(|_| ())
        .map_err(|e| map_sqlx_error(e, sql))
        .await
}

pub async fn get(
    conn: &mut SqliteConnection,
    pipeline_name: &str,
    hash_id: &str,
) -> Result<Run, StorageError> {
    let query_str =
        format!("SELECT {COLUMNS} FROM pipeline_runs WHERE pipeline_name = ? AND hash_id = ?;");

    let query = sqlx::query_as::<_, Run>(&query_str)
        .bind(pipeline_name)
        .bind(hash_id);

    let sql = query.sql();

    query
        .fetch_one(conn)
        .map_err(|e| map_sqlx_error(e, sql))
        .await
}

pub async fn exists(
    conn: &mut SqliteConnection,
    pipeline_name: &str,
    hash_id: &str,
) -> Result<bool, StorageError> {
    let query =
        sqlx::query_as::<_, (i64,)>("SELECT 1 FROM pipeline_runs WHERE pipeline_name = ? AND hash_id = ?;")
            .bind(pipeline_name)
            .bind(hash_id);

    let sql = query.sql();

    query
        .fetch_optional(conn)
        .map_ok(|row| row.is_some())
        .map_err(|e| map_sqlx_error(e, sql))
        .await
}

/// Applies every populated field in a single statement, but only if the row already exists.
///
/// Returns the column assignments that were written. When no field is populated nothing is written, yet the
/// row must still exist.
pub async fn update(
    conn: &mut SqliteConnection,
    pipeline_name: &str,
    hash_id: &str,
    fields: &UpdatableFields,
) -> Result<Vec<(&'static str, FieldValue)>, StorageError> {
    let assignments: Vec<(&'static str, FieldValue)> = fields
        .assignments()
        .into_iter()
        .filter_map(|(column, value)| value.map(|value| (column, value)))
        .collect();

    if assignments.is_empty() {
        if !exists(conn, pipeline_name, hash_id).await? {
            return Err(StorageError::NotFound);
        }
        return Ok(assignments);
    }

    let mut update_query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE pipeline_runs SET ");

    {
        let mut separated = update_query.separated(", ");
        for (column, value) in &assignments {
            separated.push(format!("{column} = "));
            match value {
                FieldValue::Text(text) => separated.push_bind_unseparated(text.clone()),
                FieldValue::Bool(flag) => separated.push_bind_unseparated(*flag),
                FieldValue::Null => separated.push_unseparated("NULL"),
            };
        }
    }

    update_query.push(" WHERE pipeline_name = ");
    update_query.push_bind(pipeline_name.to_string());
    update_query.push(" AND hash_id = ");
    update_query.push_bind(hash_id.to_string());
    update_query.push(";");

    let update_query = update_query.build();

    let sql = update_query.sql();

    let result = update_query
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error(e, sql))?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }

    Ok(assignments)
}

/// Sets the soft delete pair together; the row must exist.
pub async fn set_removed(
    conn: &mut SqliteConnection,
    pipeline_name: &str,
    hash_id: &str,
    removed: bool,
    removed_date: Option<&str>,
) -> Result<(), StorageError> {
    let query = sqlx::query(
        "UPDATE pipeline_runs SET removed = ?, removed_date = ? WHERE pipeline_name = ? AND hash_id = ?;",
    )
    .bind(removed)
    .bind(removed_date)
    .bind(pipeline_name)
    .bind(hash_id);

    let sql = query.sql();

    let result = query
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error(e, sql))?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }

    Ok(())
}

/// Sets the default flag of a single row; the row must exist. Meant to be called inside a transaction
/// alongside its siblings.
pub async fn set_default(
    conn: &mut SqliteConnection,
    pipeline_name: &str,
    hash_id: &str,
    is_default: bool,
) -> Result<(), StorageError> {
    let query = sqlx::query(
        "UPDATE pipeline_runs SET is_default = ? WHERE pipeline_name = ? AND hash_id = ?;",
    )
    .bind(is_default)
    .bind(pipeline_name)
    .bind(hash_id);

    let sql = query.sql();

    let result = query
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error(e, sql))?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }

    Ok(())
}

/// Every run sharing the partition key. Sorted by hash_id ascending.
pub async fn query(
    conn: &mut SqliteConnection,
    pipeline_name: &str,
) -> Result<Vec<Run>, StorageError> {
    let query_str =
        format!("SELECT {COLUMNS} FROM pipeline_runs WHERE pipeline_name = ? ORDER BY hash_id ASC;");

    let query = sqlx::query_as::<_, Run>(&query_str).bind(pipeline_name);

    let sql = query.sql();

    query
        .fetch_all(conn)
        .map_err(|e| map_sqlx_error(e, sql))
        .await
}

/// Reads at most `limit` rows matching `filter` whose key sorts after `start_key`.
pub async fn scan_page(
    conn: &mut SqliteConnection,
    filter: &ScanFilter,
    start_key: Option<&RunKey>,
    limit: u64,
) -> Result<ScanPage, StorageError> {
    let mut scan_query: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {COLUMNS} FROM pipeline_runs WHERE 1 = 1"));

    if let Some(matcher) = &filter.pipeline_name {
        push_text_match(&mut scan_query, "pipeline_name", matcher);
    }
    push_any_of(&mut scan_query, "hash_id", &filter.hash_ids);
    push_equals(&mut scan_query, "user_id", &filter.user_id);
    push_equals(&mut scan_query, "user_email", &filter.user_email);
    push_equals(&mut scan_query, "pipeline_version", &filter.pipeline_version);
    push_equals(&mut scan_query, "registry_type", &filter.registry_type);
    push_any_of(&mut scan_query, "registry_id", &filter.registry_ids);
    if let Some(matcher) = &filter.date_start {
        push_text_match(&mut scan_query, "date_start", matcher);
    }
    if let Some(matcher) = &filter.date_end {
        push_text_match(&mut scan_query, "date_end", matcher);
    }
    push_equals(&mut scan_query, "job_status", &filter.job_status);
    push_equals(&mut scan_query, "is_default", &filter.is_default);
    push_equals(&mut scan_query, "tag", &filter.tag);
    push_equals(&mut scan_query, "removed", &filter.removed);

    if let Some(key) = start_key {
        scan_query
            .push(" AND (pipeline_name, hash_id) > (")
            .push_bind(key.pipeline_name.clone())
            .push(", ")
            .push_bind(key.hash_id.clone())
            .push(")");
    }

    scan_query
        .push(" ORDER BY pipeline_name ASC, hash_id ASC LIMIT ")
        .push_bind(limit as i64)
        .push(";");

    let scan_query = scan_query.build_query_as::<Run>();

    let sql = scan_query.sql();

    let runs = scan_query
        .fetch_all(conn)
        .map_err(|e| map_sqlx_error(e, sql))
        .await?;

    let last_evaluated_key = if limit > 0 && runs.len() as u64 == limit {
        runs.last().map(|run| RunKey {
            pipeline_name: run.pipeline_name.clone(),
            hash_id: run.hash_id.clone(),
        })
    } else {
        None
    };

    Ok(ScanPage {
        runs,
        last_evaluated_key,
    })
}

/// Runs whose hash_id contains `search`, oldest first.
pub async fn search(
    conn: &mut SqliteConnection,
    search: &str,
    limit: u64,
) -> Result<Vec<Run>, StorageError> {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");

    let query_str = format!(
        "SELECT {COLUMNS} FROM pipeline_runs WHERE hash_id LIKE ? ESCAPE '\\' \
        ORDER BY date_start ASC, hash_id ASC LIMIT ?;"
    );

    let query = sqlx::query_as::<_, Run>(&query_str)
        .bind(format!("%{escaped}%"))
        .bind(limit as i64);

    let sql = query.sql();

    query
        .fetch_all(conn)
        .map_err(|e| map_sqlx_error(e, sql))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{tests::TestHarness, MAX_ROW_LIMIT};
    use pretty_assertions::assert_eq;
    use sqlx::{pool::PoolConnection, Sqlite};

    fn test_run(pipeline_name: &str, hash_id: &str) -> Run {
        Run {
            pipeline_name: pipeline_name.into(),
            hash_id: hash_id.into(),
            pipeline_version: "v1.0.0".into(),
            registry_type: "hash_id".into(),
            registry_id: "\"SE001\"".into(),
            date_start: "2024-03-01 10:00:00".into(),
            date_end: None,
            command: "run --input samplesheet.csv".into(),
            job_status: "SUBMITTED".into(),
            is_default: false,
            tag: "".into(),
            output_path: "file:///tmp/outputs".into(),
            pipeline_tools_submit_parameters: None,
            cloning_parameters: None,
            scheduler_job_id: "job-1".into(),
            user_id: Some("user_a".into()),
            user_email: None,
            removed: false,
            removed_date: None,
            error_data: None,
            log_stream: None,
        }
    }

    async fn setup() -> Result<(TestHarness, PoolConnection<Sqlite>), Box<dyn std::error::Error>> {
        let harness = TestHarness::new().await;
        let mut conn = harness.write_conn().await?;

        let mut run1 = test_run("wf1", "abc123");
        run1.job_status = "SUCCEEDED".into();
        run1.date_start = "2024-01-05 08:00:00".into();

        let mut run2 = test_run("wf1", "def456");
        run2.date_start = "2024-02-10 12:30:00".into();

        let mut run3 = test_run("wf2", "abc789");
        run3.job_status = "SUCCEEDED".into();
        run3.registry_id = "[\"SE001\",\"SE002\"]".into();
        run3.registry_type = "multi".into();

        insert(&mut conn, &run1).await?;
        insert(&mut conn, &run2).await?;
        insert(&mut conn, &run3).await?;

        Ok((harness, conn))
    }

    #[tokio::test]
    async fn test_get_run() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let run = get(&mut conn, "wf1", "abc123")
            .await
            .expect("Failed to get run");

        assert_eq!(run.job_status, "SUCCEEDED");
        assert_eq!(run.user_id, Some("user_a".to_string()));

        let err = get(&mut conn, "wf1", "missing").await.unwrap_err();
        assert_eq!(err, StorageError::NotFound);
    }

    #[tokio::test]
    async fn test_insert_overwrites_existing_key() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let mut replacement = test_run("wf1", "abc123");
        replacement.tag = "rerun".into();
        insert(&mut conn, &replacement).await.unwrap();

        let run = get(&mut conn, "wf1", "abc123").await.unwrap();
        assert_eq!(run, replacement);
    }

    #[tokio::test]
    async fn test_update_run_only_touches_given_fields() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let before = get(&mut conn, "wf1", "def456").await.unwrap();

        let written = update(
            &mut conn,
            "wf1",
            "def456",
            &UpdatableFields {
                job_status: Some("RUNNING".into()),
                removed_date: Some(FieldValue::Null),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to update run");

        assert_eq!(
            written,
            vec![
                ("job_status", FieldValue::Text("RUNNING".into())),
                ("removed_date", FieldValue::Null)
            ]
        );

        let after = get(&mut conn, "wf1", "def456").await.unwrap();
        assert_eq!(
            after,
            Run {
                job_status: "RUNNING".into(),
                ..before
            }
        );
    }

    #[tokio::test]
    async fn test_update_missing_run_is_not_found() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let err = update(
            &mut conn,
            "wf1",
            "missing",
            &UpdatableFields {
                tag: Some("x".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err, StorageError::NotFound);

        let err = update(&mut conn, "wf1", "missing", &UpdatableFields::default())
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound);

        let written = update(&mut conn, "wf1", "abc123", &UpdatableFields::default())
            .await
            .unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn test_set_removed_and_default() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        set_removed(&mut conn, "wf1", "abc123", true, Some("2024-04-01 00:00:00"))
            .await
            .unwrap();
        set_default(&mut conn, "wf1", "abc123", true).await.unwrap();

        let run = get(&mut conn, "wf1", "abc123").await.unwrap();
        assert!(run.removed);
        assert!(run.is_default);
        assert_eq!(run.removed_date, Some("2024-04-01 00:00:00".to_string()));

        assert_eq!(
            set_removed(&mut conn, "wf1", "missing", false, None)
                .await
                .unwrap_err(),
            StorageError::NotFound
        );
        assert_eq!(
            set_default(&mut conn, "wf1", "missing", true)
                .await
                .unwrap_err(),
            StorageError::NotFound
        );
    }

    #[tokio::test]
    async fn test_query_by_partition_key() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let runs = query(&mut conn, "wf1").await.unwrap();
        let hash_ids: Vec<_> = runs.iter().map(|run| run.hash_id.as_str()).collect();
        assert_eq!(hash_ids, vec!["abc123", "def456"]);

        assert!(query(&mut conn, "nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_page_filters() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let filter = ScanFilter {
            pipeline_name: Some(TextMatch::Exact("wf1".into())),
            job_status: Some("SUCCEEDED".into()),
            ..Default::default()
        };
        let page = scan_page(&mut conn, &filter, None, MAX_ROW_LIMIT).await.unwrap();
        assert_eq!(page.runs.len(), 1);
        assert_eq!(page.runs[0].hash_id, "abc123");
        assert_eq!(page.last_evaluated_key, None);

        let filter = ScanFilter {
            date_start: Some(TextMatch::Between(
                "2024-02-01 00:00:00".into(),
                "2024-02-28 23:59:59".into(),
            )),
            ..Default::default()
        };
        let page = scan_page(&mut conn, &filter, None, MAX_ROW_LIMIT).await.unwrap();
        assert_eq!(page.runs.len(), 1);
        assert_eq!(page.runs[0].hash_id, "def456");

        let filter = ScanFilter {
            registry_ids: vec!["[\"SE001\",\"SE002\"]".into()],
            ..Default::default()
        };
        let page = scan_page(&mut conn, &filter, None, MAX_ROW_LIMIT).await.unwrap();
        assert_eq!(page.runs.len(), 1);
        assert_eq!(page.runs[0].hash_id, "abc789");

        let filter = ScanFilter {
            hash_ids: vec!["abc123".into(), "abc789".into()],
            date_end: Some(TextMatch::AtLeast("2000-01-01 00:00:00".into())),
            ..Default::default()
        };
        let page = scan_page(&mut conn, &filter, None, MAX_ROW_LIMIT).await.unwrap();
        assert!(page.runs.is_empty(), "null date_end never matches a range");
    }

    #[tokio::test]
    async fn test_scan_page_continuation() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let filter = ScanFilter::default();

        let first = scan_page(&mut conn, &filter, None, 2).await.unwrap();
        assert_eq!(first.runs.len(), 2);
        let key = first.last_evaluated_key.clone().expect("expected more pages");
        assert_eq!(
            key,
            RunKey {
                pipeline_name: "wf1".into(),
                hash_id: "def456".into()
            }
        );

        let second = scan_page(&mut conn, &filter, Some(&key), 2).await.unwrap();
        assert_eq!(second.runs.len(), 1);
        assert_eq!(second.runs[0].hash_id, "abc789");
        assert_eq!(second.last_evaluated_key, None);
    }

    #[tokio::test]
    async fn test_search_escapes_wildcards() {
        let (_harness, mut conn) = setup().await.expect("Failed to set up DB");

        let runs = search(&mut conn, "abc", 20).await.unwrap();
        let hash_ids: Vec<_> = runs.iter().map(|run| run.hash_id.as_str()).collect();
        assert_eq!(hash_ids, vec!["abc123", "abc789"]);

        assert!(search(&mut conn, "%", 20).await.unwrap().is_empty());
        assert!(search(&mut conn, "' OR 1=1 --", 20).await.unwrap().is_empty());
        assert_eq!(search(&mut conn, "", 1).await.unwrap().len(), 1);
    }
}

pub mod runs;

#[cfg(test)]
pub mod tests;

use sqlx::{
    pool::PoolConnection, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, Pool, Sqlite,
    Transaction,
};
use std::{fs::File, io, ops::Deref, path::Path, str::FromStr};
use tracing::{debug, instrument};

/// The maximum amount of rows that can be returned by any single scan page.
pub const MAX_ROW_LIMIT: u64 = 200;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StorageError {
    #[error("could not establish connection to database; {0}")]
    Connection(String),

    #[error("requested entity not found")]
    NotFound,

    #[error("entity already exists")]
    Exists,

    #[error("could not parse value '{value}' for column '{column}' from database; {err}")]
    Parse {
        value: String,
        column: String,
        err: String,
    },

    #[error("unexpected storage error occurred; {0}")]
    Internal(String),
}

/// Sqlite Errors are determined by database error code. We map these to the specific code so that
/// when we come back with a database error we can detect which one happened.
/// See the codes here: https://www.sqlite.org/rescode.html
pub fn map_sqlx_error(e: sqlx::Error, query: &str) -> StorageError {
    match e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Database(database_err) => {
            if let Some(err_code) = database_err.code() {
                match err_code.deref() {
                    "1555" | "2067" => StorageError::Exists,
                    _ => StorageError::Internal(format!(
                        "Error occurred while running query; [{err_code}] {database_err}; query: {query}"
                    )),
                }
            } else {
                StorageError::Internal(format!(
                    "Error occurred while running query; {database_err}; query: {query}"
                ))
            }
        }
        sqlx::Error::ColumnDecode { index, source } => StorageError::Parse {
            value: "".into(),
            column: index,
            err: format!("{source}; query: {query}"),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::Connection(format!("{e}; query: {query}"))
        }
        _ => StorageError::Internal(format!(
            "Error occurred while running query; {:#?}; query: {query}",
            e
        )),
    }
}

#[derive(Debug, Clone)]
pub struct Db {
    write_pool: Pool<Sqlite>,
    read_pool: Pool<Sqlite>,
}

// Create file if not exists.
fn touch_file(path: &Path) -> io::Result<()> {
    if !path.exists() {
        File::create(path)?;
    }

    Ok(())
}

impl Db {
    /// Opens (and provisions if needed) the tracking database at `path`.
    ///
    /// `read_connections` bounds the read pool. Writes always go through a single connection.
    #[instrument(fields(origin = "storage"))]
    pub async fn new(path: &str, read_connections: u32) -> Result<Self, StorageError> {
        touch_file(Path::new(path)).map_err(|e| {
            StorageError::Connection(format!("could not create database file '{path}'; {e}"))
        })?;

        // We create two different pools of connections. The read pool has many connections and is high concurrency.
        // The write pool is essentially a single connection in which only one write can be made at a time.
        // Not using this paradigm may result in sqlite "database is locked(error: 5)" errors because of the
        // manner in which sqlite handles transactions.
        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(|e| StorageError::Connection(format!("{:?}", e)))?
            // * journal_mode: Turns on WAL mode which increases concurrency and reliability.
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // * synchronous: Tells sqlite to not sync to disk as often and specifically only focus on syncing at critcal
            //   junctures. This makes sqlite speedier and also has no downside because we have WAL mode.
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // * busy_timeout: How long should a sqlite query try before it returns an error.
            .busy_timeout(std::time::Duration::from_secs(5));

        let read_pool = SqlitePoolOptions::new()
            .max_connections(read_connections.max(1))
            .connect_with(connect_options.clone())
            .await
            .map_err(|e| StorageError::Connection(format!("{:?}", e)))?;

        let write_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::Connection(format!("{:?}", e)))?;

        let schema = r#"
            CREATE TABLE IF NOT EXISTS transaction_mutex (
                id          INTEGER NOT NULL,
                lock        INTEGER NOT NULL CHECK (lock IN (0, 1)),
                PRIMARY KEY (id)
            ) STRICT;

            CREATE TABLE IF NOT EXISTS pipeline_runs (
                pipeline_name                    TEXT    NOT NULL,
                hash_id                          TEXT    NOT NULL,
                pipeline_version                 TEXT    NOT NULL,
                registry_type                    TEXT    NOT NULL,
                registry_id                      TEXT    NOT NULL,
                date_start                       TEXT    NOT NULL,
                date_end                         TEXT,
                command                          TEXT    NOT NULL,
                job_status                       TEXT    NOT NULL,
                is_default                       INTEGER NOT NULL CHECK (is_default IN (0, 1)),
                tag                              TEXT    NOT NULL,
                output_path                      TEXT    NOT NULL,
                pipeline_tools_submit_parameters TEXT,
                cloning_parameters               TEXT,
                scheduler_job_id                 TEXT    NOT NULL,
                user_id                          TEXT,
                user_email                       TEXT,
                removed                          INTEGER NOT NULL CHECK (removed IN (0, 1)),
                removed_date                     TEXT,
                error_data                       TEXT,
                log_stream                       TEXT,
                PRIMARY KEY (pipeline_name, hash_id)
            ) STRICT;

            CREATE INDEX IF NOT EXISTS idx_pipeline_runs_date_start ON pipeline_runs (date_start);"#;

        sqlx::query(schema)
            .execute(&write_pool)
            .await
            .map_err(|e| map_sqlx_error(e, schema))?;

        debug!(path, "Tracking database ready");

        Ok(Db {
            write_pool,
            read_pool,
        })
    }

    pub async fn write_conn(&self) -> Result<PoolConnection<Sqlite>, StorageError> {
        self.write_pool
            .acquire()
            .await
            .map_err(|e| StorageError::Connection(format!("{:?}", e)))
    }

    pub async fn read_conn(&self) -> Result<PoolConnection<Sqlite>, StorageError> {
        self.read_pool
            .acquire()
            .await
            .map_err(|e| StorageError::Connection(format!("{:?}", e)))
    }

    /// Opens a write transaction that holds the database write lock from the start.
    pub async fn open_tx(&self) -> Result<Transaction<'_, Sqlite>, StorageError> {
        let mut tx = self
            .write_pool
            .begin()
            .await
            .map_err(|e| StorageError::Connection(format!("{:?}", e)))?;

        // Sqlite opens all transactions as deferred, so no lock is held until the first write. If another writer
        // slips in before then the whole transaction fails with "database is busy". sqlx cannot open IMMEDIATE
        // transactions, so we force a write to a dummy table to take the lock before anything else runs.
        //
        // Relevant ticket here: https://github.com/launchbadge/sqlx/issues/481
        sqlx::query("INSERT OR REPLACE INTO transaction_mutex (id, lock) VALUES (1, 1);")
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                StorageError::Connection(format!(
                    "Error while attempting to start transaction using transaction_mutex table; {:?}",
                    e
                ))
            })?;

        Ok(tx)
    }
}

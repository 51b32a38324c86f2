use super::*;
use rand::prelude::*;
use std::ops::Deref;

pub struct TestHarness {
    pub db: Db,
    pub storage_path: String,
}

impl TestHarness {
    pub async fn new() -> Self {
        let mut rng = rand::thread_rng();
        let append_num: u64 = rng.gen();
        let storage_path = format!("/tmp/wfctl_tests_storage{}.db", append_num);

        let db = Db::new(&storage_path, 4).await.unwrap();

        Self { db, storage_path }
    }
}

impl Deref for TestHarness {
    type Target = Db;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.storage_path);
        let _ = std::fs::remove_file(format!("{}{}", &self.storage_path, "-shm"));
        let _ = std::fs::remove_file(format!("{}{}", &self.storage_path, "-wal"));
    }
}

#[tokio::test]
/// The schema is provisioned idempotently when a database is reopened.
async fn reopen_existing_database() {
    let harness = TestHarness::new().await;

    let reopened = Db::new(&harness.storage_path, 1).await;
    assert!(reopened.is_ok());
}

#[tokio::test]
/// A transaction that is dropped without commit leaves no trace.
async fn transaction_rolls_back_on_drop() {
    let harness = TestHarness::new().await;

    {
        let mut tx = harness.open_tx().await.unwrap();
        let run = runs::Run {
            pipeline_name: "wf".into(),
            hash_id: "rolled_back".into(),
            registry_id: "\"SE001\"".into(),
            ..Default::default()
        };
        runs::insert(&mut tx, &run).await.unwrap();
    }

    let mut conn = harness.read_conn().await.unwrap();
    assert!(!runs::exists(&mut conn, "wf", "rolled_back").await.unwrap());
}

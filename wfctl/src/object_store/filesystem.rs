use super::{ObjectStoreError, Store};
use object_store::local::LocalFileSystem;
use serde::Deserialize;

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The path of the directory that should contain the object files.
    pub path: String,
}

/// Opens a store rooted at the configured directory, creating the directory if needed.
pub fn new(config: &Config) -> Result<Store<LocalFileSystem>, ObjectStoreError> {
    std::fs::create_dir_all(&config.path).map_err(|e| {
        ObjectStoreError::FailedPrecondition(format!(
            "could not create object store directory '{}'; {e}",
            config.path
        ))
    })?;

    let store = LocalFileSystem::new_with_prefix(&config.path)
        .map_err(|e| ObjectStoreError::FailedPrecondition(e.to_string()))?;

    Ok(Store::new(store))
}

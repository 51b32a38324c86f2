pub mod filesystem;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{memory::InMemory, path::Path, ObjectStore as ObjStore, PutPayload};
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::debug;

/// Represents different object store failure possibilities.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("requested object '{0}' not found")]
    NotFound(String),

    #[error("object '{0}' already exists")]
    Exists(String),

    #[error("unexpected object store error occurred; {0}")]
    Internal(String),

    /// Failed to start due to misconfigured settings, usually from a misconfigured settings file.
    #[error("could not init object store; {0}")]
    FailedPrecondition(String),
}

impl From<object_store::Error> for ObjectStoreError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => ObjectStoreError::NotFound(path),
            object_store::Error::AlreadyExists { path, .. } => ObjectStoreError::Exists(path),
            _ => ObjectStoreError::Internal(err.to_string()),
        }
    }
}

/// The store that input artifacts are staged into so the compute backend can read them.
#[async_trait]
pub trait ObjectStore: Debug + Send + Sync + 'static {
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    /// Writes the object. Without `force` an existing object is left alone and `Exists` is returned.
    async fn put(&self, key: &str, content: Bytes, force: bool) -> Result<(), ObjectStoreError>;
    /// Copies an object to a new key, replacing whatever lives there.
    async fn copy(&self, from: &str, to: &str) -> Result<(), ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")] // This handles case insensitivity during deserialization
#[strum(serialize_all = "snake_case")]
pub enum Engine {
    #[default]
    Filesystem,
    Memory,
}

/// Adapts any `object_store` backend to our store interface.
#[derive(Debug)]
pub struct Store<S>(S);

impl<S: ObjStore> Store<S> {
    pub fn new(inner: S) -> Self {
        Store(inner)
    }
}

#[async_trait]
impl<S: ObjStore> ObjectStore for Store<S> {
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = Path::from(key);

        match self.0.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(ObjectStoreError::from(e)),
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = Path::from(key);

        let result = self.0.get(&path).await.map_err(ObjectStoreError::from)?;

        let object = result.bytes().await.map_err(ObjectStoreError::from)?;

        Ok(object)
    }

    async fn put(&self, key: &str, content: Bytes, force: bool) -> Result<(), ObjectStoreError> {
        // We've found an object, but the user did not pass force, return an error.
        if !force && self.exists(key).await? {
            return Err(ObjectStoreError::Exists(key.to_string()));
        }

        let path = Path::from(key);
        let payload = PutPayload::from_bytes(content);

        self.0
            .put(&path, payload)
            .await
            .map_err(ObjectStoreError::from)?;

        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), ObjectStoreError> {
        let from_path = Path::from(from);
        let to_path = Path::from(to);

        self.0
            .copy(&from_path, &to_path)
            .await
            .map_err(ObjectStoreError::from)?;

        debug!(from, to, "Copied object");

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = Path::from(key);

        self.0.delete(&path).await.map_err(ObjectStoreError::from)?;

        Ok(())
    }
}

pub fn new(config: &crate::conf::Staging) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
    match config.engine {
        Engine::Filesystem => {
            let Some(filesystem) = &config.filesystem else {
                return Err(ObjectStoreError::FailedPrecondition(
                    "filesystem engine settings not found in config".into(),
                ));
            };

            let engine = filesystem::new(filesystem)?;
            Ok(Arc::new(engine))
        }
        Engine::Memory => Ok(Arc::new(Store::new(InMemory::new()))),
    }
}

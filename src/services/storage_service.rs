//! src/services/storage_service.rs
//!
//! Storage abstraction shared by every backend. A backend hands out writers
//! for single keys; an object only becomes visible once its writer is closed
//! successfully.

use crate::{
    config::AppConfig,
    models::object::{ObjectAttributes, StoredObject},
    services::{disk_backend::DiskBackend, object_store_backend::ObjectStoreBackend},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("writing object `{key}`: {source}")]
    Write {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("committing object `{key}`: {source}")]
    Commit {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("deleting object `{key}`: {source}")]
    Delete {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("configuring storage backend: {0}")]
    Config(String),
    #[error("encoding object attributes: {0}")]
    Attributes(#[from] serde_json::Error),
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Streaming writer for a single object.
///
/// Bytes written are invisible to readers until [`ObjectWriter::close`]
/// returns `Ok`. Dropping a writer without closing it never publishes the
/// object.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Append a chunk to the object being written.
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Commit the object, making it visible at its key.
    async fn close(self: Box<Self>) -> StorageResult<StoredObject>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// An object store reduced to what the uploader needs.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Open a writer for `key`, applying `attributes` on commit.
    async fn create_writer(
        &self,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> StorageResult<Box<dyn ObjectWriter>>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Whether a committed object exists at `key`.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Build the backend selected by configuration: local disk when a storage
/// directory is set, Google Cloud Storage otherwise.
pub async fn create_backend(cfg: &AppConfig) -> StorageResult<Arc<dyn ObjectBackend>> {
    let backend: Arc<dyn ObjectBackend> = match &cfg.storage_dir {
        Some(dir) => Arc::new(DiskBackend::new(dir.join(&cfg.bucket)).await?),
        None => Arc::new(ObjectStoreBackend::gcs(
            &cfg.bucket,
            cfg.service_account_json.as_deref(),
        )?),
    };

    info!(backend = backend.name(), bucket = %cfg.bucket, "storage backend ready");
    Ok(backend)
}

//! src/services/upload_service.rs
//!
//! UploadService: names an incoming file, streams it into the backend and
//! builds the public URL. A key is only reported once its writer has
//! committed; on any failure the key is deleted again on a detached task.

use crate::{
    config::AppConfig,
    models::{
        object::{IMMUTABLE_CACHE_CONTROL, ObjectAttributes, StoredObject},
        upload::{UploadRequest, UploadedFile},
    },
    services::{
        naming,
        storage_service::{ObjectBackend, ObjectWriter, StorageError},
    },
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{collections::BTreeMap, fmt, sync::Arc};
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("reading upload: {0}")]
    Read(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct UploadService {
    backend: Arc<dyn ObjectBackend>,
    bucket_path: String,
    base_url: String,
    object_metadata: BTreeMap<String, String>,
}

impl UploadService {
    pub fn new(backend: Arc<dyn ObjectBackend>, cfg: &AppConfig) -> Self {
        Self {
            backend,
            bucket_path: cfg.bucket_path.clone(),
            base_url: cfg.base_url.clone(),
            object_metadata: cfg.object_metadata.clone(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ObjectBackend> {
        &self.backend
    }

    /// Attributes every object is written with.
    pub fn attributes_for(&self, content_type: &str) -> ObjectAttributes {
        ObjectAttributes {
            content_type: content_type.to_string(),
            cache_control: IMMUTABLE_CACHE_CONTROL.to_string(),
            metadata: self.object_metadata.clone(),
        }
    }

    /// Store `body` under a freshly generated key.
    ///
    /// - Extension from the original filename, else from the content type.
    /// - Bytes are streamed chunk by chunk; nothing is buffered here.
    /// - Read, write or commit failures abort the writer and delete the key.
    pub async fn upload<S, E>(
        &self,
        request: &UploadRequest,
        body: S,
    ) -> Result<UploadedFile, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let content_type = request.content_type_or_default();
        let extension =
            naming::choose_extension(request.original_filename.as_deref(), content_type);
        let filename = naming::generate_filename(&extension);
        let key = naming::object_key(&self.bucket_path, &filename);
        let attributes = self.attributes_for(content_type);

        let mut cleanup = CleanupGuard::new(self.backend.clone(), key.clone());
        let result = match self.backend.create_writer(&key, &attributes).await {
            Ok(writer) => copy_and_commit(writer, body).await,
            Err(err) => Err(err.into()),
        };

        match result {
            Ok(stored) => {
                cleanup.disarm();
                info!(
                    filename = %filename,
                    key = %stored.key,
                    size_bytes = stored.size_bytes,
                    "uploaded"
                );
                Ok(UploadedFile {
                    url: format!("{}{}", self.base_url, filename),
                    filename,
                    key,
                    size_bytes: stored.size_bytes,
                })
            }
            Err(err) => {
                warn!(key = %key, error = %err, "upload failed");
                cleanup.run().await;
                Err(err)
            }
        }
    }
}

async fn copy_and_commit<S, E>(
    mut writer: Box<dyn ObjectWriter>,
    body: S,
) -> Result<StoredObject, UploadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    pin_mut!(body);
    while let Some(chunk) = body.next().await {
        let written = match chunk {
            Ok(chunk) => writer.write(chunk).await.map_err(UploadError::from),
            Err(err) => Err(UploadError::Read(err.to_string())),
        };
        if let Err(err) = written {
            if let Err(abort_err) = writer.abort().await {
                debug!(error = %abort_err, "aborting writer failed");
            }
            return Err(err);
        }
    }

    Ok(writer.close().await?)
}

/// Deletes a key unless disarmed.
///
/// The deletion runs on its own task so it finishes even when the request
/// future is dropped mid-upload (client disconnect): in that case `Drop`
/// spawns it.
struct CleanupGuard {
    backend: Arc<dyn ObjectBackend>,
    key: Option<String>,
}

impl CleanupGuard {
    fn new(backend: Arc<dyn ObjectBackend>, key: String) -> Self {
        Self {
            backend,
            key: Some(key),
        }
    }

    fn disarm(&mut self) {
        self.key = None;
    }

    /// Delete now and wait for the detached task to finish.
    async fn run(mut self) {
        if let Some(key) = self.key.take() {
            if let Some(task) = spawn_delete(self.backend.clone(), key) {
                let _ = task.await;
            }
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            spawn_delete(self.backend.clone(), key);
        }
    }
}

fn spawn_delete(backend: Arc<dyn ObjectBackend>, key: String) -> Option<JoinHandle<()>> {
    let Ok(runtime) = Handle::try_current() else {
        warn!(key = %key, "no runtime available to remove partially written object");
        return None;
    };

    Some(runtime.spawn(async move {
        match backend.delete(&key).await {
            Ok(()) => debug!(key = %key, "removed partially written object"),
            Err(err) => warn!(key = %key, error = %err, "cleanup of partially written object failed"),
        }
    }))
}

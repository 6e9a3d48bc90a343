//! Backend over any `object_store::ObjectStore`, Google Cloud Storage in
//! production.
//!
//! Small objects are buffered and committed with one PUT. Once the buffer
//! reaches [`PART_SIZE`] the writer switches to a multipart upload whose parts
//! are sent while the request body is still streaming in. Either way the
//! object is only published by the final PUT or multipart completion.

use crate::{
    models::object::{ObjectAttributes, StoredObject},
    services::storage_service::{ObjectBackend, ObjectWriter, StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use object_store::{
    Attribute, Attributes, MultipartUpload, ObjectStore, ObjectStoreExt, PutMultipartOptions,
    PutOptions, PutPayload, PutResult, gcp::GoogleCloudStorageBuilder, path::Path,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// GCS and S3 require every part but the last to be at least 5 MiB.
const PART_SIZE: usize = 8 * 1024 * 1024;
const MAX_INFLIGHT_PARTS: usize = 4;

#[derive(Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    name: &'static str,
}

impl ObjectStoreBackend {
    /// Wrap an already-built store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            name: "object-store",
        }
    }

    /// Google Cloud Storage bucket. Without an explicit service-account key
    /// the builder falls back to the ambient `GOOGLE_*` environment.
    pub fn gcs(bucket: &str, service_account_json: Option<&str>) -> StorageResult<Self> {
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(key) = service_account_json {
            builder = builder.with_service_account_key(key);
        }

        let store = builder
            .build()
            .map_err(|err| StorageError::Config(err.to_string()))?;

        Ok(Self {
            store: Arc::new(store),
            name: "gcs",
        })
    }
}

fn location(key: &str) -> StorageResult<Path> {
    Path::parse(key).map_err(|_| StorageError::InvalidObjectKey(key.to_string()))
}

fn to_store_attributes(attributes: &ObjectAttributes) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert(Attribute::ContentType, attributes.content_type.clone().into());
    attrs.insert(Attribute::CacheControl, attributes.cache_control.clone().into());
    for (key, value) in &attributes.metadata {
        attrs.insert(Attribute::Metadata(key.clone().into()), value.clone().into());
    }
    attrs
}

#[async_trait]
impl ObjectBackend for ObjectStoreBackend {
    async fn create_writer(
        &self,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> StorageResult<Box<dyn ObjectWriter>> {
        Ok(Box::new(StoreWriter {
            store: self.store.clone(),
            key: key.to_string(),
            location: location(key)?,
            attributes: attributes.clone(),
            buffer: BytesMut::new(),
            upload: None,
            size_bytes: 0,
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        match self.store.delete(&location(key)?).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => {
                debug!(key, "object already absent");
                Ok(())
            }
            Err(source) => Err(StorageError::Delete {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.store.head(&location(key)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(StorageError::ObjectStore(err)),
        }
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

struct StoreWriter {
    store: Arc<dyn ObjectStore>,
    key: String,
    location: Path,
    attributes: ObjectAttributes,
    buffer: BytesMut,
    upload: Option<PartUploader>,
    size_bytes: u64,
}

impl StoreWriter {
    fn write_error(&self, source: object_store::Error) -> StorageError {
        StorageError::Write {
            key: self.key.clone(),
            source,
        }
    }

    /// Ship one full part, opening the multipart upload on first use.
    async fn send_part(&mut self, part: Bytes) -> StorageResult<()> {
        if self.upload.is_none() {
            let opts = PutMultipartOptions {
                attributes: to_store_attributes(&self.attributes),
                ..Default::default()
            };
            let upload = self
                .store
                .put_multipart_opts(&self.location, opts)
                .await
                .map_err(|source| self.write_error(source))?;
            debug!(key = %self.key, "switched to multipart upload");
            self.upload = Some(PartUploader::new(upload));
        }

        let sent = match self.upload.as_mut() {
            Some(upload) => upload.send(part).await,
            None => Ok(()),
        };
        sent.map_err(|source| self.write_error(source))
    }
}

#[async_trait]
impl ObjectWriter for StoreWriter {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.size_bytes += chunk.len() as u64;
        self.buffer.extend_from_slice(&chunk);
        while self.buffer.len() >= PART_SIZE {
            let part = self.buffer.split_to(PART_SIZE).freeze();
            self.send_part(part).await?;
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> StorageResult<StoredObject> {
        let Self {
            store,
            key,
            location,
            attributes,
            buffer,
            upload,
            size_bytes,
        } = *self;

        let committed = match upload {
            Some(upload) => upload.finish(buffer.freeze()).await,
            None => {
                let opts = PutOptions {
                    attributes: to_store_attributes(&attributes),
                    ..Default::default()
                };
                store
                    .put_opts(&location, PutPayload::from(buffer.freeze()), opts)
                    .await
            }
        };

        let result = committed.map_err(|source| StorageError::Commit {
            key: key.clone(),
            source,
        })?;

        Ok(StoredObject {
            key,
            size_bytes,
            etag: result.e_tag,
            attributes,
            created_at: Utc::now(),
        })
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        let Self { key, upload, .. } = *self;
        match upload {
            Some(upload) => upload
                .abort()
                .await
                .map_err(|source| StorageError::Write { key, source }),
            None => Ok(()),
        }
    }
}

/// In-flight multipart upload. Parts are numbered in the order they are
/// sent and uploaded concurrently, at most [`MAX_INFLIGHT_PARTS`] at a time.
/// Any failure while finishing aborts the upload so no parts are left
/// behind in the bucket.
struct PartUploader {
    upload: Box<dyn MultipartUpload>,
    parts: JoinSet<object_store::Result<()>>,
}

impl PartUploader {
    fn new(upload: Box<dyn MultipartUpload>) -> Self {
        Self {
            upload,
            parts: JoinSet::new(),
        }
    }

    async fn send(&mut self, part: Bytes) -> object_store::Result<()> {
        self.wait_below(MAX_INFLIGHT_PARTS).await?;
        self.parts.spawn(self.upload.put_part(PutPayload::from(part)));
        Ok(())
    }

    /// Wait until fewer than `limit` parts are in flight.
    async fn wait_below(&mut self, limit: usize) -> object_store::Result<()> {
        while self.parts.len() >= limit {
            match self.parts.join_next().await {
                Some(Ok(result)) => result?,
                Some(Err(join_err)) => {
                    return Err(object_store::Error::Generic {
                        store: "multipart",
                        source: Box::new(join_err),
                    });
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Upload the trailing bytes, wait for every part and complete.
    async fn finish(mut self, tail: Bytes) -> object_store::Result<PutResult> {
        if !tail.is_empty() {
            self.parts.spawn(self.upload.put_part(PutPayload::from(tail)));
        }

        let completed = match self.wait_below(1).await {
            Ok(()) => self.upload.complete().await,
            Err(err) => Err(err),
        };
        if completed.is_err() {
            self.parts.shutdown().await;
            if let Err(err) = self.upload.abort().await {
                warn!(error = %err, "aborting failed multipart upload");
            }
        }
        completed
    }

    async fn abort(mut self) -> object_store::Result<()> {
        self.parts.shutdown().await;
        self.upload.abort().await
    }
}

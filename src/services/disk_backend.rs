//! src/services/disk_backend.rs
//!
//! Local-disk backend. Object payloads live at `root/{key}`; attributes are
//! kept as JSON sidecars under `root/.meta/{key}.json`. Bytes stream into a
//! temp file under `root/.tmp/` which is fsynced and renamed into place on
//! close, so a key is either absent or complete.

use crate::{
    models::object::{ObjectAttributes, StoredObject},
    services::storage_service::{ObjectBackend, ObjectWriter, StorageError, StorageResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const TMP_DIR: &str = ".tmp";
const META_DIR: &str = ".meta";
const PARENT_DIR_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct DiskBackend {
    /// Directory standing in for the bucket.
    root: PathBuf,
}

impl DiskBackend {
    /// Create the backend, making sure the root and scratch directories exist.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        fs::create_dir_all(root.join(META_DIR)).await?;
        Ok(Self { root })
    }

    /// Reject keys that could escape the root or collide with scratch space.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        let invalid = || StorageError::InvalidObjectKey(key.to_string());
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(invalid());
        }
        if key.starts_with('/') || key.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
            return Err(invalid());
        }
        if matches!(key.split('/').next(), Some(TMP_DIR | META_DIR)) {
            return Err(invalid());
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key))
    }

    /// Remove empty directories from `start` upwards, stopping at `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Run `op` once the parent of `path` exists. A concurrent delete may prune
/// an emptied prefix directory between creating it and using it, so the
/// directory is recreated and `op` retried on `NotFound`.
async fn in_parent_dir<F, Fut>(path: &Path, mut op: F) -> io::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let mut attempt = 1;
    loop {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        match op().await {
            Err(err) if err.kind() == ErrorKind::NotFound && attempt < PARENT_DIR_ATTEMPTS => {
                debug!("{} vanished, retrying: {}", path.display(), err);
                attempt += 1;
            }
            result => return result,
        }
    }
}

async fn remove_if_present(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StorageError::Io(err)),
    }
}

#[async_trait]
impl ObjectBackend for DiskBackend {
    async fn create_writer(
        &self,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> StorageResult<Box<dyn ObjectWriter>> {
        self.ensure_key_safe(key)?;

        let tmp_path = self.root.join(TMP_DIR).join(Uuid::new_v4().to_string());
        let file = File::create(&tmp_path).await?;

        Ok(Box::new(DiskWriter {
            key: key.to_string(),
            file,
            tmp_path,
            final_path: self.object_path(key),
            sidecar_path: self.sidecar_path(key),
            attributes: attributes.clone(),
            digest: Context::new(),
            size_bytes: 0,
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        if remove_if_present(&file_path).await? {
            debug!("removed physical file {}", file_path.display());
        } else {
            debug!("file {} already missing", file_path.display());
        }
        remove_if_present(&self.sidecar_path(key)).await?;

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.root).await;
        }
        if let Some(parent) = self.sidecar_path(key).parent() {
            self.prune_empty_dirs(parent, &self.root.join(META_DIR)).await;
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.ensure_key_safe(key)?;
        Ok(fs::try_exists(self.object_path(key)).await?)
    }

    fn name(&self) -> &'static str {
        "disk"
    }
}

struct DiskWriter {
    key: String,
    file: File,
    tmp_path: PathBuf,
    final_path: PathBuf,
    sidecar_path: PathBuf,
    attributes: ObjectAttributes,
    digest: Context,
    size_bytes: u64,
}

impl DiskWriter {
    async fn commit(&mut self) -> StorageResult<StoredObject> {
        self.file.flush().await?;
        self.file.sync_all().await?;

        let stored = StoredObject {
            key: self.key.clone(),
            size_bytes: self.size_bytes,
            etag: Some(format!(
                "{:x}",
                std::mem::replace(&mut self.digest, Context::new()).compute()
            )),
            attributes: self.attributes.clone(),
            created_at: Utc::now(),
        };

        let sidecar_json = serde_json::to_vec_pretty(&stored)?;
        let (sidecar, sidecar_path, tmp_path, final_path) = (
            &sidecar_json,
            &self.sidecar_path,
            &self.tmp_path,
            &self.final_path,
        );
        in_parent_dir(sidecar_path, move || fs::write(sidecar_path, sidecar)).await?;
        in_parent_dir(final_path, move || fs::rename(tmp_path, final_path)).await?;
        Ok(stored)
    }
}

#[async_trait]
impl ObjectWriter for DiskWriter {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.digest.consume(&chunk);
        self.size_bytes += chunk.len() as u64;
        self.file.write_all(&chunk).await?;
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> StorageResult<StoredObject> {
        match self.commit().await {
            Ok(stored) => Ok(stored),
            Err(err) => {
                let _ = fs::remove_file(&self.tmp_path).await;
                let _ = fs::remove_file(&self.sidecar_path).await;
                Err(err)
            }
        }
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        let Self { file, tmp_path, .. } = *self;
        drop(file);
        remove_if_present(&tmp_path).await?;
        Ok(())
    }
}

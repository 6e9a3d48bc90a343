#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::TestServer;
use base64::{Engine as _, engine::general_purpose};
use bucket_uploader::{
    config::{AppConfig, Args},
    models::object::{ObjectAttributes, StoredObject},
    routes::{AppState, routes::routes},
    services::{
        object_store_backend::ObjectStoreBackend,
        storage_service::{ObjectBackend, ObjectWriter, StorageError, StorageResult},
        upload_service::UploadService,
    },
};
use bytes::Bytes;
use object_store::{ObjectStoreExt, memory::InMemory, path::Path};
use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

pub const BASE_URL: &str = "https://cdn.example.test/files";

/// Where an [`InstrumentedBackend`] should fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailAt {
    /// Forward the first chunk, then fail the write.
    Write,
    /// Commit to the inner store, then report failure anyway.
    Commit,
}

/// Wraps a real backend, records every call and optionally injects failures.
pub struct InstrumentedBackend {
    inner: Arc<dyn ObjectBackend>,
    fail_at: Option<FailAt>,
    pub opened: Mutex<Vec<(String, ObjectAttributes)>>,
    pub deleted: Mutex<Vec<String>>,
}

impl InstrumentedBackend {
    pub fn new(inner: Arc<dyn ObjectBackend>, fail_at: Option<FailAt>) -> Self {
        Self {
            inner,
            fail_at,
            opened: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn opened_keys(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

fn injected() -> StorageError {
    StorageError::Io(io::Error::other("injected backend failure"))
}

#[async_trait]
impl ObjectBackend for InstrumentedBackend {
    async fn create_writer(
        &self,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> StorageResult<Box<dyn ObjectWriter>> {
        self.opened
            .lock()
            .unwrap()
            .push((key.to_string(), attributes.clone()));
        let inner = self.inner.create_writer(key, attributes).await?;
        Ok(Box::new(InstrumentedWriter {
            inner,
            fail_at: self.fail_at,
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.deleted.lock().unwrap().push(key.to_string());
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    fn name(&self) -> &'static str {
        "instrumented"
    }
}

struct InstrumentedWriter {
    inner: Box<dyn ObjectWriter>,
    fail_at: Option<FailAt>,
}

#[async_trait]
impl ObjectWriter for InstrumentedWriter {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.inner.write(chunk).await?;
        if self.fail_at == Some(FailAt::Write) {
            return Err(injected());
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> StorageResult<StoredObject> {
        let Self { inner, fail_at } = *self;
        let stored = inner.close().await?;
        if fail_at == Some(FailAt::Commit) {
            return Err(injected());
        }
        Ok(stored)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        let Self { inner, .. } = *self;
        inner.abort().await
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<InMemory>,
    pub backend: Arc<InstrumentedBackend>,
    pub config: AppConfig,
}

impl TestApp {
    /// Read back a committed object straight from the in-memory store.
    pub async fn object_bytes(&self, key: &str) -> Option<Bytes> {
        match self.store.get(&Path::from(key)).await {
            Ok(result) => Some(result.bytes().await.expect("read object body")),
            Err(object_store::Error::NotFound { .. }) => None,
            Err(err) => panic!("unexpected store error: {err}"),
        }
    }

    pub async fn object_exists(&self, key: &str) -> bool {
        self.backend.exists(key).await.expect("exists check")
    }

    /// Key for a URL returned by the service.
    pub fn key_for_url(&self, url: &str) -> String {
        let filename = url
            .strip_prefix(&self.config.base_url)
            .expect("url starts with the base url");
        if self.config.bucket_path.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", self.config.bucket_path, filename)
        }
    }
}

pub fn test_config(overrides: &[(&str, &str)]) -> AppConfig {
    let mut env: HashMap<String, String> = HashMap::from([
        ("BUCKET".to_string(), "uploads-test".to_string()),
        ("BASE_URL".to_string(), BASE_URL.to_string()),
    ]);
    for (key, value) in overrides {
        env.insert(key.to_string(), value.to_string());
    }
    AppConfig::from_sources(Args::default(), |name| env.get(name).cloned())
        .expect("valid test configuration")
}

pub fn setup_test_app_with(overrides: &[(&str, &str)], fail_at: Option<FailAt>) -> TestApp {
    let config = test_config(overrides);
    let store = Arc::new(InMemory::new());
    let backend = Arc::new(InstrumentedBackend::new(
        Arc::new(ObjectStoreBackend::new(store.clone())),
        fail_at,
    ));

    let uploads = UploadService::new(backend.clone(), &config);
    let app = routes(AppState::new(uploads, config.credentials.clone()));
    let server =
        TestServer::new(app.into_make_service()).expect("Failed to create test server");

    TestApp {
        server,
        store,
        backend,
        config,
    }
}

pub fn setup_test_app() -> TestApp {
    setup_test_app_with(&[], None)
}

pub fn basic_header(user: &str, password: &str) -> String {
    format!(
        "Basic {}",
        general_purpose::STANDARD.encode(format!("{user}:{password}"))
    )
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

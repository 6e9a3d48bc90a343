use crate::middleware::basic_auth::Credentials;
use clap::Parser;
use std::{collections::BTreeMap, env, fmt, num::ParseIntError, path::PathBuf};
use thiserror::Error;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} env required")]
    Missing(&'static str),
    #[error("parsing PORT value `{value}`: {source}")]
    InvalidPort {
        value: String,
        source: ParseIntError,
    },
    #[error("unmarshaling object metadata: {0}")]
    InvalidMetadata(#[source] serde_json::Error),
    #[error("bucket path `{0}` must not contain `..` segments")]
    InvalidBucketPath(String),
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; built once at startup
/// and never mutated afterwards.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub bucket: String,
    /// Key prefix inside the bucket, without leading or trailing slashes.
    pub bucket_path: String,
    /// Always ends with exactly one `/`.
    pub base_url: String,
    pub credentials: Option<Credentials>,
    pub object_metadata: BTreeMap<String, String>,
    pub service_account_json: Option<String>,
    /// When set, objects are written to local disk instead of GCS.
    pub storage_dir: Option<PathBuf>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Upload files to a bucket and get back a public URL")]
pub struct Args {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Target bucket (overrides BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Key prefix inside the bucket (overrides BUCKET_PATH)
    #[arg(long)]
    pub bucket_path: Option<String>,

    /// Base URL used to build returned links (overrides BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Store objects on local disk under this directory (overrides STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self, ConfigError> {
        let args = Args::parse();
        Self::from_sources(args, |name| env::var(name).ok())
    }

    /// Merge CLI args over values looked up by name. Empty values count as unset.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let port = match args.port {
            Some(port) => port,
            None => match var("PORT") {
                Some(value) => value
                    .parse::<u16>()
                    .map_err(|source| ConfigError::InvalidPort { value, source })?,
                None => DEFAULT_PORT,
            },
        };

        let bucket = args
            .bucket
            .filter(|b| !b.is_empty())
            .or_else(|| var("BUCKET"))
            .ok_or(ConfigError::Missing("BUCKET"))?;

        let base_url = args
            .base_url
            .filter(|u| !u.is_empty())
            .or_else(|| var("BASE_URL"))
            .ok_or(ConfigError::Missing("BASE_URL"))?;

        let bucket_path = args
            .bucket_path
            .or_else(|| var("BUCKET_PATH"))
            .unwrap_or_default();

        let object_metadata = match var("OBJECT_METADATA") {
            Some(raw) => serde_json::from_str(&raw).map_err(ConfigError::InvalidMetadata)?,
            None => BTreeMap::new(),
        };

        let credentials = Credentials::from_pair(
            &var("AUTH_USER").unwrap_or_default(),
            &var("AUTH_PASSWORD").unwrap_or_default(),
        );

        Ok(Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| DEFAULT_HOST.into()),
            port,
            bucket,
            bucket_path: normalize_bucket_path(&bucket_path)?,
            base_url: normalize_base_url(&base_url),
            credentials,
            object_metadata,
            service_account_json: var("GOOGLE_APPLICATION_CREDENTIALS_JSON"),
            storage_dir: args.storage_dir.or_else(|| var("STORAGE_DIR").map(PathBuf::from)),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bucket", &self.bucket)
            .field("bucket_path", &self.bucket_path)
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .field("object_metadata", &self.object_metadata)
            .field(
                "service_account_json",
                &self.service_account_json.as_ref().map(|_| "<redacted>"),
            )
            .field("storage_dir", &self.storage_dir)
            .finish()
    }
}

/// Trim trailing slashes and add back exactly one.
pub fn normalize_base_url(raw: &str) -> String {
    format!("{}/", raw.trim_end_matches('/'))
}

/// Collapse a prefix to `a/b/c` form: empty and `.` segments are dropped.
fn normalize_bucket_path(raw: &str) -> Result<String, ConfigError> {
    let mut segments = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(ConfigError::InvalidBucketPath(raw.to_string())),
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

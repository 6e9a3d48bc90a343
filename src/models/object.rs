//! Represents an object written to the bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cache directive for every stored object. Names are random, so content
/// behind a key never changes.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Attributes set on an object when its writer is opened.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectAttributes {
    /// Content type (MIME type) declared by the uploader.
    pub content_type: String,

    /// Cache-Control header served with the object.
    pub cache_control: String,

    /// Static key-value metadata merged in from configuration.
    pub metadata: BTreeMap<String, String>,
}

/// A committed object as reported by a backend after close.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredObject {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// Backend-provided entity tag, when there is one.
    pub etag: Option<String>,

    #[serde(flatten)]
    pub attributes: ObjectAttributes,

    /// Timestamp when the object was committed.
    pub created_at: DateTime<Utc>,
}

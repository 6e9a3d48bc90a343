//! The file part of an incoming upload request.

/// Fallback content type when the part declares none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Descriptive half of an upload: everything except the byte stream, which is
/// handed to the upload service separately. Lives for one request.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Filename as sent by the client. Only its extension is ever used.
    pub original_filename: Option<String>,

    /// Content type declared on the multipart part.
    pub content_type: Option<String>,
}

impl UploadRequest {
    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Generated `uuid[.ext]` name, without the bucket prefix.
    pub filename: String,

    /// Full key inside the bucket.
    pub key: String,

    /// Public URL: base URL + filename.
    pub url: String,

    pub size_bytes: u64,
}

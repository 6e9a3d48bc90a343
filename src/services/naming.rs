//! Object naming: random base names, extension selection and key layout.
//!
//! Nothing the client sends ends up in a key except an extension that passed
//! [`file_extension`]'s character check.

use crate::models::upload::DEFAULT_CONTENT_TYPE;
use uuid::Uuid;

const MAX_EXTENSION_LEN: usize = 16;

/// Preferred extension per media type. Consulted before `mime_guess`, whose
/// first candidate is not always the common one (e.g. `image/jpeg`).
const CANONICAL_EXTENSIONS: &[(&str, &str)] = &[
    ("application/gzip", ".gz"),
    ("application/javascript", ".js"),
    ("application/json", ".json"),
    ("application/pdf", ".pdf"),
    ("application/wasm", ".wasm"),
    ("application/xml", ".xml"),
    ("application/zip", ".zip"),
    ("audio/mpeg", ".mp3"),
    ("audio/ogg", ".ogg"),
    ("audio/wav", ".wav"),
    ("font/woff", ".woff"),
    ("font/woff2", ".woff2"),
    ("image/avif", ".avif"),
    ("image/bmp", ".bmp"),
    ("image/gif", ".gif"),
    ("image/heic", ".heic"),
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/svg+xml", ".svg"),
    ("image/tiff", ".tiff"),
    ("image/webp", ".webp"),
    ("image/x-icon", ".ico"),
    ("text/css", ".css"),
    ("text/csv", ".csv"),
    ("text/html", ".html"),
    ("text/javascript", ".js"),
    ("text/markdown", ".md"),
    ("text/plain", ".txt"),
    ("text/xml", ".xml"),
    ("video/mp4", ".mp4"),
    ("video/quicktime", ".mov"),
    ("video/webm", ".webm"),
];

/// Extension of the final path component, dot included.
///
/// Returns `None` when there is no dot, nothing follows it, or the suffix
/// contains anything but ASCII alphanumerics, `-` and `_`.
pub fn file_extension(filename: &str) -> Option<&str> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let dot = base.rfind('.')?;
    let ext = &base[dot..];
    let body = &ext[1..];

    let valid = !body.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    valid.then_some(ext)
}

/// Extension for a declared content type, parameters ignored.
///
/// Deterministic: the fixed table above wins, then the first entry of the
/// table compiled into `mime_guess`.
pub fn extension_for_content_type(content_type: &str) -> Option<String> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence.is_empty() || essence == DEFAULT_CONTENT_TYPE {
        return None;
    }

    if let Some((_, ext)) = CANONICAL_EXTENSIONS.iter().find(|(mime, _)| *mime == essence) {
        return Some((*ext).to_string());
    }

    mime_guess::get_mime_extensions_str(&essence)
        .and_then(|exts| exts.first())
        .map(|ext| format!(".{}", ext))
}

/// Filename extension if usable, otherwise one inferred from the content type,
/// otherwise empty.
pub fn choose_extension(original_filename: Option<&str>, content_type: &str) -> String {
    original_filename
        .and_then(file_extension)
        .map(str::to_string)
        .or_else(|| extension_for_content_type(content_type))
        .unwrap_or_default()
}

/// Random v4 UUID followed by `extension` (which may be empty).
pub fn generate_filename(extension: &str) -> String {
    format!("{}{}", Uuid::new_v4(), extension)
}

/// Join an already-normalized prefix and a generated filename with `/`.
pub fn object_key(prefix: &str, filename: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", prefix, filename)
    }
}

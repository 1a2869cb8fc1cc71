//! Content-type repair for relayed responses
//!
//! Local dev servers often label assets `text/plain` or
//! `application/octet-stream`, which browsers refuse for stylesheets and
//! module scripts. When the requested path has a known extension the generic
//! label is replaced; a specific label is always left alone.

use std::path::Path;

/// Fallback for unknown extensions
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Labels considered too generic to trust
const GENERIC_TYPES: &[&str] = &["text/plain", "application/octet-stream"];

/// Content type for a lowercase file extension
#[must_use]
pub fn for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => return None,
    };
    Some(mime)
}

/// Lowercase extension of the last path segment, if any
fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Content type for a path by extension, falling back to `application/octet-stream`
#[must_use]
pub fn guess(path: &str) -> &'static str {
    extension(path)
        .as_deref()
        .and_then(for_extension)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Replacement content type for a response to `path`, if one is warranted
///
/// Only the first declared value is considered. Returns `None` when it is
/// specific already, when nothing was declared, or when the extension is
/// unknown.
#[must_use]
pub fn correct(path: &str, declared: &[String]) -> Option<&'static str> {
    let first = declared.first()?;
    if !GENERIC_TYPES
        .iter()
        .any(|generic| generic.eq_ignore_ascii_case(first.trim()))
    {
        return None;
    }

    for_extension(&extension(path)?)
}

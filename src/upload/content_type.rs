//! File extension to MIME type lookup.

use super::naming::split_extension;

/// Fallback for missing or unknown extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extension (lowercase, no dot) to MIME type.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("7z", "application/x-7z-compressed"),
    ("aac", "audio/aac"),
    ("avi", "video/x-msvideo"),
    ("bmp", "image/bmp"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("flac", "audio/flac"),
    ("gif", "image/gif"),
    ("gz", "application/gzip"),
    ("heic", "image/heic"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/x-icon"),
    ("iso", "application/octet-stream"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("m4a", "audio/mp4"),
    ("md", "text/markdown"),
    ("mkv", "video/x-matroska"),
    ("mov", "video/quicktime"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("mpeg", "video/mpeg"),
    ("oga", "audio/ogg"),
    ("ogg", "audio/ogg"),
    ("ogv", "video/ogg"),
    ("otf", "font/otf"),
    ("parquet", "application/vnd.apache.parquet"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    ("rar", "application/vnd.rar"),
    ("rtf", "application/rtf"),
    ("svg", "image/svg+xml"),
    ("tar", "application/x-tar"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("tsv", "text/tab-separated-values"),
    ("ttf", "font/ttf"),
    ("txt", "text/plain"),
    ("wasm", "application/wasm"),
    ("wav", "audio/wav"),
    ("webm", "video/webm"),
    ("webp", "image/webp"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("xml", "application/xml"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("zip", "application/zip"),
];

/// Resolve the content type of `file_name` from its extension.
pub fn resolve(file_name: &str) -> &'static str {
    let (_, extension) = split_extension(file_name);
    let Some(ext) = extension.strip_prefix('.') else {
        return DEFAULT_CONTENT_TYPE;
    };
    let ext = ext.to_ascii_lowercase();
    CONTENT_TYPES
        .binary_search_by(|(candidate, _)| candidate.cmp(&ext.as_str()))
        .map(|i| CONTENT_TYPES[i].1)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Use `explicit` when it is a non-empty value, otherwise resolve from the name.
pub fn resolve_or(explicit: Option<&str>, file_name: &str) -> String {
    match explicit.map(str::trim) {
        Some(ct) if !ct.is_empty() => ct.to_string(),
        _ => resolve(file_name).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted() {
        assert!(CONTENT_TYPES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_resolve_known() {
        assert_eq!(resolve("a.json"), "application/json");
        assert_eq!(resolve("video.mp4"), "video/mp4");
        assert_eq!(resolve("dir/report.PDF"), "application/pdf");
        assert_eq!(resolve("photo_20260301120000.JPG"), "image/jpeg");
    }

    #[test]
    fn test_resolve_fallback() {
        assert_eq!(resolve("a.unknownext"), DEFAULT_CONTENT_TYPE);
        assert_eq!(resolve("noext"), DEFAULT_CONTENT_TYPE);
        assert_eq!(resolve("trailingdot."), DEFAULT_CONTENT_TYPE);
        assert_eq!(resolve(".json"), DEFAULT_CONTENT_TYPE);
        assert_eq!(resolve("v1.json/data"), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_resolve_or() {
        assert_eq!(resolve_or(Some("text/x-custom"), "a.json"), "text/x-custom");
        assert_eq!(resolve_or(Some(" "), "a.json"), "application/json");
        assert_eq!(resolve_or(None, "a.bin"), DEFAULT_CONTENT_TYPE);
    }
}

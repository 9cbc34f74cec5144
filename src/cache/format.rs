//! File format classification
//!
//! Video containers are large-format and may only live in the directory tier.

/// Extensions routed exclusively to the directory tier
const LARGE_FORMAT_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "3gp",
];

/// Routing class of a cached file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    /// Directory tier only
    Large,
    /// Directory tier if active, otherwise KV tier
    General,
}

/// Classify a file path by its extension (case-insensitive)
pub fn classify(path: &str) -> FormatClass {
    match extension(path) {
        Some(ext) if LARGE_FORMAT_EXTENSIONS.contains(&ext.as_str()) => FormatClass::Large,
        _ => FormatClass::General,
    }
}

pub fn is_large_format(path: &str) -> bool {
    classify(path) == FormatClass::Large
}

/// Lowercased extension of the last path segment
pub(crate) fn extension(path: &str) -> Option<String> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

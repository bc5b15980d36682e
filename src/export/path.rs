//! Deterministic on-disk layout: `<root>/<MM-DD-YY>/<owner>/<id>.log`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::artifact::UNKNOWN;

/// Extension of exported log files.
pub const LOG_EXTENSION: &str = "log";

/// Date folder used when a log has no start time.
pub const UNKNOWN_DATE_DIR: &str = "unknown-date";

/// Returns the export path for one log.
///
/// Pure: identical inputs always yield an identical path.
#[must_use]
pub fn resolve(base: &Path, date: Option<&DateTime<Utc>>, owner: &str, id: &str) -> PathBuf {
    base.join(date_dir(date))
        .join(sanitize_component(owner))
        .join(file_name(id))
}

/// `MM-DD-YY` folder name for a start time (UTC).
#[must_use]
pub fn date_dir(date: Option<&DateTime<Utc>>) -> String {
    date.map_or_else(
        || UNKNOWN_DATE_DIR.to_string(),
        |d| d.format("%m-%d-%y").to_string(),
    )
}

/// File name for a log id.
#[must_use]
pub fn file_name(id: &str) -> String {
    format!("{}.{LOG_EXTENSION}", sanitize_component(id))
}

/// `/`-separated path of `path` relative to `base`, for summaries.
#[must_use]
pub fn relative_display(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Makes a display name safe as a single path component.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`; leading dots are trimmed so
/// the result is never hidden or a parent reference.
#[must_use]
pub fn sanitize_component(raw: &str) -> String {
    let replaced: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = replaced.trim_start_matches('.');
    if trimmed.is_empty() {
        UNKNOWN.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn march_ninth() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap()
    }

    #[test]
    fn test_resolve_layout() {
        let path = resolve(
            Path::new("/exports"),
            Some(&march_ninth()),
            "Ada Lovelace",
            "07L000000000001",
        );
        assert_eq!(
            path,
            PathBuf::from("/exports/03-09-24/Ada_Lovelace/07L000000000001.log")
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let base = Path::new("/exports");
        let date = march_ninth();
        let first = resolve(base, Some(&date), "Ada", "07L000000000001");
        let second = resolve(base, Some(&date), "Ada", "07L000000000001");
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_without_date() {
        let path = resolve(Path::new("out"), None, "Ada", "abc");
        assert_eq!(path, PathBuf::from("out/unknown-date/Ada/abc.log"));
    }

    #[test]
    fn test_sanitize_component_blocks_traversal() {
        assert_eq!(sanitize_component("../../etc"), "_.._etc");
        assert_eq!(sanitize_component(".."), UNKNOWN);
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
    }

    #[test]
    fn test_sanitize_component_empty_is_unknown() {
        assert_eq!(sanitize_component(""), UNKNOWN);
        assert_eq!(sanitize_component("   "), UNKNOWN);
    }

    #[test]
    fn test_sanitize_component_keeps_safe_chars() {
        assert_eq!(sanitize_component("José O'Neil"), "Jos__O_Neil");
        assert_eq!(sanitize_component("svc-user_01.prod"), "svc-user_01.prod");
    }

    #[test]
    fn test_relative_display_uses_forward_slashes() {
        let base = Path::new("/exports");
        let path = resolve(base, Some(&march_ninth()), "Ada", "x1");
        assert_eq!(relative_display(base, &path), "03-09-24/Ada/x1.log");
    }
}

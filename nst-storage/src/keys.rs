//! Key and path construction for the remote stores.
//!
//! The tree store rejects `.`, `#`, `$`, `[` and `]` in path segments, and a
//! `/`, `?` or `%` would split a key into nested paths or leak into the
//! request URL, so every remote key goes through [`sanitize_key`]. The local
//! cache keeps raw keys.

use nst_core::{CODES_PREFIX, CONTENT_TREE_PREFIX};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

static FORBIDDEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.#$\[\]/?%]").expect("Invalid forbidden-character regex"));

/// Replace characters that are not safe in a single path segment with `_`.
pub fn sanitize_key(raw: &str) -> Cow<'_, str> {
    FORBIDDEN.replace_all(raw, "_")
}

/// Tree path of a content entry.
pub fn content_tree_path(raw_key: &str) -> String {
    format!("{}/{}", CONTENT_TREE_PREFIX, sanitize_key(raw_key))
}

/// Document id of a content entry in the content collection.
pub fn content_doc_id(raw_key: &str) -> String {
    sanitize_key(raw_key).into_owned()
}

/// Tree path of a gift code. `code` must already be normalized.
pub fn code_path(code: &str) -> String {
    format!("{}/{}", CODES_PREFIX, sanitize_key(code))
}

/// Join tree path segments, ignoring empty ones and stray slashes.
pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_matches('/');
    let child = child.trim_matches('/');
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{}/{}", parent, child),
    }
}

/// Split a tree path into non-empty segments.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_forbidden_chars() {
        assert_eq!(sanitize_key("a.b#c$d[e]f"), "a_b_c_d_e_f");
        assert_eq!(sanitize_key("Hindi/Sanskrit?v=100%"), "Hindi_Sanskrit_v=100_");
        assert_eq!(sanitize_key("nst_content_CBSE_10_Science_ch-1_NOTES"), "nst_content_CBSE_10_Science_ch-1_NOTES");
    }

    #[test]
    fn test_sanitize_borrows_clean_keys() {
        assert!(matches!(sanitize_key("clean_key"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_paths() {
        assert_eq!(content_tree_path("k.1"), "nst_content/k_1");
        assert_eq!(content_doc_id("Class 10.5"), "Class 10_5");
        assert_eq!(code_path("NST-AB12"), "redeem_codes/NST-AB12");
        assert_eq!(content_tree_path("Maths/Ch 1"), "nst_content/Maths_Ch 1");
        assert_eq!(path_segments(&content_tree_path("a/b/c")).count(), 2);
        assert_eq!(join_path("/a/", "/b"), "a/b");
        assert_eq!(join_path("", "b"), "b");
        assert_eq!(path_segments("/a//b/").collect::<Vec<_>>(), vec!["a", "b"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_sanitized_has_no_forbidden(raw in ".{0,64}") {
            let clean = sanitize_key(&raw);
            prop_assert!(!clean.contains(|c: char| matches!(c, '.' | '#' | '$' | '[' | ']' | '/' | '?' | '%')));
            prop_assert_eq!(clean.chars().count(), raw.chars().count());
        }

        #[test]
        fn prop_sanitize_is_idempotent(raw in ".{0,64}") {
            let once = sanitize_key(&raw).into_owned();
            prop_assert_eq!(sanitize_key(&once).into_owned(), once);
        }
    }
}

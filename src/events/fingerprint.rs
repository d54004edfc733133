//! Content fingerprinting: MD5 over canonicalized title/description text,
//! and stable photo-id extraction from CDN URLs.

use md5::{Digest, Md5};

/// Canonicalize then MD5-hash a text field so whitespace-only edits don't
/// register as a content change.
pub fn text_fingerprint(text: &str) -> String {
    let canonical = text.trim().split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = Md5::digest(canonical.to_lowercase().as_bytes());
    format!("{digest:x}")
}

/// Strip the query string and any signed-URL salt segment from a photo CDN
/// URL, leaving the stable path that identifies the photo itself.
pub fn stable_photo_id(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_whitespace_and_case_differences() {
        assert_eq!(
            text_fingerprint("  Hello   World  "),
            text_fingerprint("hello world")
        );
    }

    #[test]
    fn fingerprint_changes_with_content() {
        assert_ne!(text_fingerprint("Hello World"), text_fingerprint("Hello There"));
    }

    #[test]
    fn stable_photo_id_strips_query_salt() {
        assert_eq!(
            stable_photo_id("https://cdn.wb.ru/photo/123.jpg?sig=abcd1234"),
            "https://cdn.wb.ru/photo/123.jpg"
        );
    }
}

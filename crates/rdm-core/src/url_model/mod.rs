//! Output filename derivation from the download URL.

mod path;
mod sanitize;

pub use path::last_path_segment;
pub use sanitize::sanitize_filename;

/// Filename used when the URL path yields nothing usable.
pub const DEFAULT_FILENAME: &str = "download.bin";

/// Safe local filename for `url`: its sanitized last path segment, or
/// [`DEFAULT_FILENAME`].
///
/// - `derive_filename("https://example.com/archive.zip")` → `"archive.zip"`
/// - `derive_filename("https://example.com/")` → `"download.bin"`
pub fn derive_filename(url: &str) -> String {
    last_path_segment(url)
        .map(|raw| sanitize_filename(&raw))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_filename_from_url_path() {
        assert_eq!(derive_filename("https://example.com/archive.zip"), "archive.zip");
        assert_eq!(
            derive_filename("https://cdn.example.com/path/to/debian-12.iso"),
            "debian-12.iso"
        );
    }

    #[test]
    fn derive_filename_empty_path_fallback() {
        assert_eq!(derive_filename("https://example.com/"), "download.bin");
        assert_eq!(derive_filename("https://example.com"), "download.bin");
        assert_eq!(derive_filename("not a url"), "download.bin");
    }

    #[test]
    fn derive_filename_reserved_names_fallback() {
        assert_eq!(derive_filename("https://example.com/."), "download.bin");
        assert_eq!(derive_filename("https://example.com/..."), "download.bin");
    }

    #[test]
    fn derive_filename_decodes_and_sanitizes() {
        assert_eq!(
            derive_filename("https://example.com/dir/my%20file.tar.gz?x=1"),
            "my_file.tar.gz"
        );
    }
}

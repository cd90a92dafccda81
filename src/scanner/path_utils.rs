//! Path normalization for index keys.
//!
//! Every record in the index is keyed by a *normalized absolute path*: the
//! canonical (symlink-free) absolute path, converted to Unicode NFC.
//!
//! # Background
//!
//! macOS uses NFD (Decomposed) normalization for file paths, while Windows
//! and Linux typically use NFC (Composed) normalization. The same visual
//! filename can have different byte representations:
//!
//! - NFC: `café.txt` - 'é' is U+00E9 (single code point)
//! - NFD: `café.txt` - 'e' U+0065 + combining acute accent U+0301
//!
//! Without normalization, these would be two different keys.
//!
//! # Example
//!
//! ```
//! use dupler::scanner::path_utils::normalize_path_str;
//!
//! let nfc = "café.txt";
//! let nfd = "cafe\u{0301}.txt";
//! assert_eq!(normalize_path_str(nfc), normalize_path_str(nfd));
//! ```

use std::io;
use std::path::{Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

/// Normalize a path string to NFC (Composed) form.
#[must_use]
pub fn normalize_path_str(s: &str) -> String {
    s.nfc().collect()
}

/// Normalize a [`Path`] to NFC form.
///
/// If the path contains invalid UTF-8, returns the original path unchanged.
#[must_use]
pub fn normalize_pathbuf(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) if !unicode_normalization::is_nfc(s) => PathBuf::from(normalize_path_str(s)),
        _ => path.to_path_buf(),
    }
}

/// Canonicalize `path` and normalize the result to NFC.
///
/// # Errors
///
/// Returns the I/O error from [`std::fs::canonicalize`] (missing path,
/// permission denied, ...).
pub fn normalize_absolute(path: &Path) -> io::Result<PathBuf> {
    let canonical = std::fs::canonicalize(path)?;
    Ok(normalize_pathbuf(&canonical))
}

/// Whether `path` is one of `roots` or lies beneath one of them.
#[must_use]
pub fn is_within(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path.starts_with(root))
}

/// Collapse a list of roots so that none is nested inside another.
///
/// The result is sorted and deduplicated.
#[must_use]
pub fn collapse_roots(mut roots: Vec<PathBuf>) -> Vec<PathBuf> {
    roots.sort();
    roots.dedup();
    let mut collapsed: Vec<PathBuf> = Vec::with_capacity(roots.len());
    for root in roots {
        if !collapsed.iter().any(|kept| root.starts_with(kept)) {
            collapsed.push(root);
        }
    }
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_str_nfd_to_nfc() {
        let nfd = "cafe\u{0301}.txt";
        assert_eq!(normalize_path_str(nfd), "café.txt");
    }

    #[test]
    fn test_normalize_path_str_ascii_unchanged() {
        assert_eq!(normalize_path_str("hello.txt"), "hello.txt");
        assert_eq!(normalize_path_str(""), "");
    }

    #[test]
    fn test_normalize_pathbuf() {
        let path = PathBuf::from("docs/cafe\u{0301}.txt");
        assert_eq!(normalize_pathbuf(&path), PathBuf::from("docs/café.txt"));

        let path = PathBuf::from("docs/café.txt");
        assert_eq!(normalize_pathbuf(&path), path);
    }

    #[test]
    fn test_hangul_normalization() {
        let nfc = "가.txt";
        let nfd = "\u{1100}\u{1161}.txt";
        assert_eq!(normalize_path_str(nfd), nfc);
    }

    #[test]
    fn test_normalize_absolute_resolves_dots() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let dotted = sub.join("..").join("sub");
        let expected = normalize_absolute(&sub).unwrap();
        assert_eq!(normalize_absolute(&dotted).unwrap(), expected);
        assert!(expected.is_absolute());
    }

    #[test]
    fn test_normalize_absolute_missing() {
        assert!(normalize_absolute(Path::new("/nonexistent/dupler/x")).is_err());
    }

    #[test]
    fn test_is_within() {
        let roots = vec![PathBuf::from("/data/photos"), PathBuf::from("/srv")];
        assert!(is_within(Path::new("/data/photos/a.jpg"), &roots));
        assert!(is_within(Path::new("/srv"), &roots));
        assert!(!is_within(Path::new("/data/photos2/a.jpg"), &roots));
        assert!(!is_within(Path::new("/data"), &roots));
    }

    #[test]
    fn test_collapse_roots() {
        let roots = vec![
            PathBuf::from("/a/b"),
            PathBuf::from("/a"),
            PathBuf::from("/c"),
            PathBuf::from("/a"),
        ];
        assert_eq!(
            collapse_roots(roots),
            vec![PathBuf::from("/a"), PathBuf::from("/c")]
        );
    }
}

//! `%` / `_` wildcard patterns.
//!
//! - `%` matches any run of characters (including none)
//! - `_` matches exactly one character
//! - `\` escapes the next character (`\%`, `\_`, `\\`)
//!
//! A pattern with no wildcard at all is a substring search: `report`
//! behaves like `%report%`. Matching is anchored at both ends otherwise.
//!
//! Patterns compile to a [`regex::Regex`]; the database's own `LIKE` operator
//! is never used.

use std::path::Path;

use regex::{Regex, RegexBuilder};

use crate::config::MatchTarget;
use crate::error::{DuplerError, Result};

/// A compiled wildcard pattern.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    source: String,
    regex: Regex,
    target: MatchTarget,
}

impl PatternMatcher {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplerError::InvalidPattern`] for an empty pattern or a
    /// trailing unescaped `\`.
    pub fn compile(pattern: &str, target: MatchTarget, case_sensitive: bool) -> Result<Self> {
        let invalid = |reason: &str| DuplerError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let mut body = String::with_capacity(pattern.len() * 2);
        let mut has_wildcard = false;
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '%' => {
                    has_wildcard = true;
                    body.push_str(".*");
                }
                '_' => {
                    has_wildcard = true;
                    body.push('.');
                }
                '\\' => match chars.next() {
                    Some(escaped) => push_literal(&mut body, escaped),
                    None => return Err(invalid("trailing escape character")),
                },
                other => push_literal(&mut body, other),
            }
        }

        let anchored = if has_wildcard {
            format!("^{body}$")
        } else {
            format!("^.*{body}.*$")
        };

        let regex = RegexBuilder::new(&anchored)
            .case_insensitive(!case_sensitive)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| invalid(&e.to_string()))?;

        log::debug!("Compiled pattern '{}' as {}", pattern, regex.as_str());

        Ok(Self {
            source: pattern.to_string(),
            regex,
            target,
        })
    }

    /// Pattern as given by the user.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// What the pattern is matched against.
    #[must_use]
    pub fn target(&self) -> MatchTarget {
        self.target
    }

    /// Match a raw string.
    #[must_use]
    pub fn matches_str(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Match an indexed path according to the configured target.
    #[must_use]
    pub fn matches_path(&self, path: &Path) -> bool {
        match self.target {
            MatchTarget::Basename => path
                .file_name()
                .is_some_and(|name| self.matches_str(&name.to_string_lossy())),
            MatchTarget::Path => self.matches_str(&path.to_string_lossy()),
        }
    }
}

fn push_literal(body: &mut String, c: char) {
    let mut buf = [0u8; 4];
    body.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basename(pattern: &str) -> PatternMatcher {
        PatternMatcher::compile(pattern, MatchTarget::Basename, false).unwrap()
    }

    #[test]
    fn test_percent_matches_any_run() {
        let m = basename("%.py");
        assert!(m.matches_str("c.py"));
        assert!(m.matches_str(".py"));
        assert!(m.matches_str("long_module_name.py"));
        assert!(!m.matches_str("c.pyc"));
        assert!(!m.matches_str("c.txt"));
    }

    #[test]
    fn test_underscore_matches_one_char() {
        let m = basename("_.py");
        assert!(m.matches_str("c.py"));
        assert!(m.matches_str("é.py"));
        assert!(!m.matches_str(".py"));
        assert!(!m.matches_str("ab.py"));
    }

    #[test]
    fn test_no_wildcard_is_substring() {
        let m = basename("report");
        assert!(m.matches_str("report"));
        assert!(m.matches_str("2024-report-final.pdf"));
        assert!(!m.matches_str("rep.txt"));
    }

    #[test]
    fn test_escapes() {
        let m = basename("100\\%%");
        assert!(m.matches_str("100%.txt"));
        assert!(!m.matches_str("1000.txt"));

        let m = basename("a\\_b");
        assert!(m.matches_str("xa_by"));
        assert!(!m.matches_str("axb"));

        let m = basename("back\\\\slash%");
        assert!(m.matches_str("back\\slash.txt"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let m = basename("%(1).jpg");
        assert!(m.matches_str("photo (1).jpg"));
        assert!(!m.matches_str("photo 1.jpg"));

        let m = basename("a.b");
        assert!(m.matches_str("a.b"));
        assert!(!m.matches_str("axb"));
    }

    #[test]
    fn test_case_sensitivity() {
        let m = basename("%.JPG");
        assert!(m.matches_str("cat.jpg"));

        let m = PatternMatcher::compile("%.JPG", MatchTarget::Basename, true).unwrap();
        assert!(!m.matches_str("cat.jpg"));
        assert!(m.matches_str("cat.JPG"));
    }

    #[test]
    fn test_match_targets() {
        let path = Path::new("/data/src/c.py");

        assert!(basename("%.py").matches_path(path));
        assert!(!basename("/data/%").matches_path(path));

        let m = PatternMatcher::compile("/data/%", MatchTarget::Path, false).unwrap();
        assert!(m.matches_path(path));
        assert_eq!(m.target(), MatchTarget::Path);
        assert_eq!(m.source(), "/data/%");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(
            PatternMatcher::compile("", MatchTarget::Basename, false),
            Err(DuplerError::InvalidPattern { .. })
        ));
        assert!(matches!(
            PatternMatcher::compile("abc\\", MatchTarget::Basename, false),
            Err(DuplerError::InvalidPattern { .. })
        ));
    }
}

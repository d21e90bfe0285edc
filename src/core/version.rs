//! Build version comparison.
//!
//! Upstream branches publish versions with different granularity
//! (`17.2.6`, `17.2.6-123.el9`, `19.0.0-1234-g0abc`). Rather than parse them
//! as semantic versions, both strings are flattened (segments joined with no
//! separator), the shorter one is right-padded with `'0'`, and the two are
//! compared as plain strings.
//!
//! This is an approximation. Segments of different digit width misorder:
//! `17.2.10` flattens to `17210`, `17.2.9` to `1729` → `17290`, so `17.2.9`
//! compares as the newer one. Callers rely on the exact ordering, so it is
//! kept as-is.

use crate::error::{Error, Result};
use std::cmp::Ordering;

const SEPARATORS: [char; 2] = ['.', '-'];

/// A version string with its separators removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatVersion {
    raw: String,
    flat: String,
}

impl FlatVersion {
    /// Flatten a version string, rejecting input that cannot be compared
    /// meaningfully (empty, empty segments, non-alphanumeric characters).
    pub fn parse(version: &str) -> Result<Self> {
        let trimmed = version.trim();
        if trimmed.is_empty() {
            return Err(Error::version_invalid(version, "version is empty"));
        }

        let mut flat = String::with_capacity(trimmed.len());
        for segment in trimmed.split(SEPARATORS) {
            if segment.is_empty() {
                return Err(Error::version_invalid(version, "empty segment"));
            }
            if let Some(bad) = segment.chars().find(|c| !c.is_ascii_alphanumeric()) {
                return Err(Error::version_invalid(
                    version,
                    format!("unexpected character '{}' in segment '{}'", bad, segment),
                ));
            }
            flat.push_str(segment);
        }

        Ok(Self {
            raw: version.to_string(),
            flat,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn flat(&self) -> &str {
        &self.flat
    }

    /// Compare after right-padding the shorter flat form with `'0'`.
    pub fn cmp_padded(&self, other: &FlatVersion) -> Ordering {
        let width = self.flat.len().max(other.flat.len());
        pad(&self.flat, width).cmp(&pad(&other.flat, width))
    }
}

fn pad(flat: &str, width: usize) -> String {
    format!("{:0<width$}", flat, width = width)
}

/// Strict comparison: `Ok(true)` iff `candidate` is newer than `existing`.
pub fn try_is_newer(existing: &str, candidate: &str) -> Result<bool> {
    let existing = FlatVersion::parse(existing)?;
    let candidate = FlatVersion::parse(candidate)?;
    Ok(candidate.cmp_padded(&existing) == Ordering::Greater)
}

/// Returns true iff `candidate` is newer than `existing`.
///
/// Equal versions are not newer. Input that cannot be compared is treated as
/// not newer, so a garbled version never causes an overwrite.
pub fn is_newer(existing: &str, candidate: &str) -> bool {
    match try_is_newer(existing, candidate) {
        Ok(newer) => newer,
        Err(err) => {
            log_status!("version", "{}; treating as not newer", err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_on_dots_and_hyphens() {
        let v = FlatVersion::parse("17.2.6-123.el9").unwrap();
        assert_eq!(v.flat(), "1726123el9");
        assert_eq!(v.raw(), "17.2.6-123.el9");
    }

    #[test]
    fn incremented_segment_is_newer() {
        let pairs = [
            ("17.2.0", "17.2.1"),
            ("17.2.6", "17.3.6"),
            ("17.2.6", "18.2.6"),
            ("18.2.1-100", "18.2.1-101"),
            ("19.0.0-1234-g0abc", "19.0.0-1235-g0abc"),
        ];
        for (a, b) in pairs {
            assert!(is_newer(a, b), "{} -> {} should be newer", a, b);
            assert!(!is_newer(b, a), "{} -> {} should not be newer", b, a);
        }
    }

    #[test]
    fn equal_versions_are_not_newer() {
        for v in ["17.2.6", "17.2.6-123.el9", "main", "0"] {
            assert!(!is_newer(v, v));
        }
    }

    #[test]
    fn build_suffix_is_newer_than_bare_release() {
        // "1726000" vs "1726123"
        assert!(is_newer("17.2.6", "17.2.6-123"));
        assert!(!is_newer("17.2.6-123", "17.2.6"));
    }

    #[test]
    fn wider_segment_misorders() {
        assert!(!is_newer("17.2.9", "17.2.10"));
        assert!(is_newer("17.2.10", "17.2.9"));
    }

    #[test]
    fn trailing_zero_padding_makes_versions_equal() {
        // "1720" vs "172" -> "1720"
        assert!(!is_newer("17.2", "17.2.0"));
        assert!(!is_newer("17.2.0", "17.2"));
    }

    #[test]
    fn letters_compare_by_character_code() {
        assert!(is_newer("19.0.0-a", "19.0.0-b"));
        assert!(is_newer("19.0.0-9", "19.0.0-a"));
    }

    #[test]
    fn unparsable_input_is_never_newer() {
        assert!(!is_newer("17.2.6", ""));
        assert!(!is_newer("", "17.2.6"));
        assert!(!is_newer("17.2.6", "17..3"));
        assert!(!is_newer("17.2.6", "17.2.7 beta"));
    }

    #[test]
    fn strict_comparison_reports_parse_errors() {
        let err = try_is_newer("17.2.6", "17.2.+7").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::VersionInvalid);
        assert_eq!(err.details["version"], "17.2.+7");

        assert!(try_is_newer("17.2.6", "17.2.7").unwrap());
    }
}

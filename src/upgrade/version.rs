//! Version strings as they appear in release tags, sidecar files and backup names.
//!
//! Comparison is over a strict `(major, minor, patch)` integer triple. Strings
//! that are valid semver are parsed with [`semver`]; everything else is parsed
//! leniently, taking the leading digits of each dot-separated component and
//! treating missing or non-numeric components as zero. Pre-release and build
//! suffixes never take part in the comparison.

use std::fmt;

/// A `(major, minor, patch)` triple ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version3 {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version3 {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a version string. Never fails; unusable input yields `0.0.0`.
    ///
    /// ```rust
    /// use overlay_updater::upgrade::version::Version3;
    ///
    /// assert_eq!(Version3::parse("1.5"), Version3::new(1, 5, 0));
    /// assert_eq!(Version3::parse("1.6.0-beta"), Version3::new(1, 6, 0));
    /// assert_eq!(Version3::parse("garbage"), Version3::new(0, 0, 0));
    /// ```
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Ok(v) = semver::Version::parse(input) {
            return Self::new(v.major, v.minor, v.patch);
        }

        let mut parts = input.split('.').map(leading_number);
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        let patch = parts.next().unwrap_or(0);
        Self::new(major, minor, patch)
    }
}

fn leading_number(component: &str) -> u64 {
    let digits: String = component.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

impl fmt::Display for Version3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Whether `candidate` is strictly newer than `current`.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    Version3::parse(candidate) > Version3::parse(current)
}

/// Strip a leading `PR_v` or `v` from a release tag.
///
/// Nothing else is validated or rewritten.
///
/// ```rust
/// use overlay_updater::upgrade::version::normalize_tag;
///
/// assert_eq!(normalize_tag("v1.6.0"), "1.6.0");
/// assert_eq!(normalize_tag("PR_v1.6.0-beta"), "1.6.0-beta");
/// assert_eq!(normalize_tag("1.6.0"), "1.6.0");
/// ```
pub fn normalize_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix("PR_v")
        .or_else(|| tag.strip_prefix('v'))
        .unwrap_or(tag)
}

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, UpdateError};

/// Dotted-numeric version with an optional pre-release marker.
///
/// Accepts any number of numeric components ("1.2", "2.0.0", "1.2.3.4" —
/// packaged Windows builds report four-part file versions), optionally
/// followed by `-<marker>`. Missing trailing components compare as zero, so
/// `1.0` and `1.0.0` are equal. A pre-release orders strictly below its
/// corresponding release; two pre-releases of the same release order by
/// their markers.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
    pre_release: Option<String>,
}

impl Version {
    /// Parse a version string, failing on empty or non-numeric components.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(UpdateError::VersionParse(input.to_string()));
        }

        let (numeric, pre_release) = match trimmed.split_once('-') {
            Some((_, tail)) if tail.is_empty() => {
                return Err(UpdateError::VersionParse(input.to_string()));
            }
            Some((head, tail)) => (head, Some(tail.to_string())),
            None => (trimmed, None),
        };

        let mut components = Vec::new();
        for piece in numeric.split('.') {
            if piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
                return Err(UpdateError::VersionParse(input.to_string()));
            }
            let value = piece
                .parse::<u64>()
                .map_err(|_| UpdateError::VersionParse(input.to_string()))?;
            components.push(value);
        }

        Ok(Self {
            components,
            pre_release,
        })
    }

    /// The numeric components, most significant first.
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// The pre-release marker, if any.
    pub fn pre_release(&self) -> Option<&str> {
        self.pre_release.as_deref()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for index in 0..len {
            let ours = self.components.get(index).copied().unwrap_or(0);
            let theirs = other.components.get(index).copied().unwrap_or(0);
            match ours.cmp(&theirs) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }

        match (&self.pre_release, &other.pre_release) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(ours), Some(theirs)) => ours.cmp(theirs),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .components
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        match &self.pre_release {
            Some(marker) => write!(f, "{joined}-{marker}"),
            None => write!(f, "{joined}"),
        }
    }
}

/// Whether `remote` is strictly newer than `current`.
///
/// Fail-safe: an unparseable input on either side is reported as "not
/// newer" instead of propagating the error, so automatic checks degrade to
/// "no update" on garbage metadata.
pub fn is_newer(remote: &str, current: &str) -> bool {
    match (Version::parse(remote), Version::parse(current)) {
        (Ok(remote), Ok(current)) => remote > current,
        (Err(err), _) | (_, Err(err)) => {
            tracing::warn!("version comparison failed, treating as up to date: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).expect("valid version")
    }

    #[test]
    fn orders_by_numeric_components() {
        assert!(v("2.0.0") > v("1.5.0"));
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("10.0") > v("9.99.99"));
        assert!(v("1.5.0") < v("2.0.0"));
    }

    #[test]
    fn shorter_versions_pad_with_zeros() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert!(v("1.0.1") > v("1.0"));
    }

    #[test]
    fn four_part_versions_are_accepted() {
        assert!(v("1.2.3.4") > v("1.2.3"));
        assert_eq!(v("1.2.3.0").components(), &[1, 2, 3, 0]);
    }

    #[test]
    fn pre_release_orders_below_release() {
        assert!(v("2.0.0-rc.1") < v("2.0.0"));
        assert!(v("2.0.0-rc.1") > v("1.9.9"));
        assert!(v("2.0.0-alpha") < v("2.0.0-beta"));
        assert_eq!(v("2.0.0-rc.1").pre_release(), Some("rc.1"));
    }

    #[test]
    fn rejects_malformed_input() {
        for input in ["", "  ", "abc", "1.a.0", "1..0", "1.0-", "v1.0"] {
            assert!(
                matches!(Version::parse(input), Err(UpdateError::VersionParse(_))),
                "expected parse failure for {input:?}"
            );
        }
    }

    #[test]
    fn is_newer_matches_check_scenarios() {
        assert!(is_newer("2.0.0", "1.5.0"));
        assert!(!is_newer("2.0.0", "2.0.0"));
        assert!(!is_newer("2.0.0", "2.1.0"));
    }

    #[test]
    fn is_newer_is_fail_safe_on_garbage() {
        assert!(!is_newer("not-a-version", "1.0.0"));
        assert!(!is_newer("2.0.0", "garbage"));
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(v("1.2.3").to_string(), "1.2.3");
        assert_eq!(v("2.0.0-rc.1").to_string(), "2.0.0-rc.1");
    }
}

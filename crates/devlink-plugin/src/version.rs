//! Plugin versions.

use devlink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `MAJOR.MINOR.PATCH` version of a plugin.
///
/// Ordering compares major, then minor, then patch.
///
/// ```
/// use devlink_plugin::PluginVersion;
///
/// let version: PluginVersion = "1.2.0".parse().unwrap();
/// assert_eq!(version, PluginVersion::new(1, 2, 0));
/// assert!(version < PluginVersion::new(1, 10, 0));
/// assert!(version.is_compatible_with(&PluginVersion::new(1, 0, 3)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl PluginVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Same major version. Major 0 releases are only compatible with the same minor.
    pub fn is_compatible_with(&self, other: &PluginVersion) -> bool {
        if self.major == 0 || other.major == 0 {
            return self.major == other.major && self.minor == other.minor;
        }
        self.major == other.major
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for PluginVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::configuration(format!("Invalid plugin version '{s}', expected MAJOR.MINOR.PATCH"));

        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u32> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };

        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl TryFrom<String> for PluginVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PluginVersion> for String {
    fn from(value: PluginVersion) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0.3.1", PluginVersion::new(0, 3, 1))]
    #[case("12.0.7", PluginVersion::new(12, 0, 7))]
    #[case(" 1.2.3 ", PluginVersion::new(1, 2, 3))]
    fn test_parse(#[case] input: &str, #[case] expected: PluginVersion) {
        assert_eq!(input.parse::<PluginVersion>().unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("1.2")]
    #[case("1.2.3.4")]
    #[case("one.2.3")]
    #[case("1..3")]
    #[case("-1.2.3")]
    #[case("1.2.3-beta")]
    fn test_parse_rejects(#[case] input: &str) {
        assert!(matches!(
            input.parse::<PluginVersion>(),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_ordering_is_numeric() {
        assert!(PluginVersion::new(1, 9, 0) < PluginVersion::new(1, 10, 0));
        assert!(PluginVersion::new(2, 0, 0) > PluginVersion::new(1, 99, 99));
    }

    #[test]
    fn test_compatibility() {
        let v1 = PluginVersion::new(1, 4, 0);
        assert!(v1.is_compatible_with(&PluginVersion::new(1, 0, 0)));
        assert!(!v1.is_compatible_with(&PluginVersion::new(2, 0, 0)));
        assert!(!PluginVersion::new(0, 3, 0).is_compatible_with(&PluginVersion::new(0, 4, 0)));
    }

    #[test]
    fn test_serde_as_string() {
        let version: PluginVersion = serde_json::from_str("\"1.2.0\"").unwrap();
        assert_eq!(serde_json::to_string(&version).unwrap(), "\"1.2.0\"");
        assert!(serde_json::from_str::<PluginVersion>("\"1.x\"").is_err());
    }
}

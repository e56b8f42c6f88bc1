//! String settings handed to drivers by plugin manifests.

use devlink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Key/value settings for one driver instance.
///
/// # Examples
///
/// ```
/// use devlink_device::DriverSettings;
///
/// let settings = DriverSettings::new()
///     .with("frame_request", "0x46 0x52")
///     .with("max_frame_bytes", "1024");
///
/// assert_eq!(settings.bytes("frame_request").unwrap(), Some(vec![0x46, 0x52]));
/// assert_eq!(settings.parsed::<usize>("max_frame_bytes").unwrap(), Some(1024));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverSettings(BTreeMap<String, String>);

impl DriverSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setting.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Parse a setting with [`FromStr`].
    pub fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|_| Error::configuration(format!("Invalid value for setting '{key}': {raw}")))
            })
            .transpose()
    }

    /// Parse a hex byte string such as `"1b40"`, `"1B 40"` or `"0x1b 0x40"`.
    pub fn bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get(key)
            .map(|raw| {
                parse_hex(raw).ok_or_else(|| {
                    Error::configuration(format!("Setting '{key}' is not a hex byte string: {raw}"))
                })
            })
            .transpose()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for DriverSettings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn parse_hex(raw: &str) -> Option<Vec<u8>> {
    let digits: String = raw
        .split_whitespace()
        .map(|part| {
            part.strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
                .unwrap_or(part)
        })
        .collect();

    if digits.len() % 2 != 0 {
        return None;
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok())
        .collect()
}

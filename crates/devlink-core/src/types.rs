//! Common types shared across the framework.
//!
//! This module defines the target address handed to the device manager, the
//! coarse device type partition used for plugin listing, and the device
//! information returned by `get_info`.

use crate::constants::SCHEME_USB;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Coarse device partition used to list plugins.
///
/// Serialized as its lowercase name so it can appear directly in plugin
/// manifests (`"device_type": "camera"`). Unknown names are kept verbatim in
/// [`DeviceType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceType {
    Camera,
    Printer,
    Scanner,
    Gate,
    Other(String),
}

impl DeviceType {
    /// Lowercase name of the device type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Camera => "camera",
            Self::Printer => "printer",
            Self::Scanner => "scanner",
            Self::Gate => "gate",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for DeviceType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "camera" => Self::Camera,
            "printer" => Self::Printer,
            "scanner" => Self::Scanner,
            "gate" => Self::Gate,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<DeviceType> for String {
    fn from(value: DeviceType) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::configuration("Device type must not be empty"));
        }
        Ok(Self::from(s.to_string()))
    }
}

/// Target address of a device.
///
/// Addresses are written as URIs. The scheme selects the transport factory;
/// the remaining parts are interpreted by that transport:
///
/// | scheme | example | meaning |
/// |---|---|---|
/// | `tcp` | `tcp://10.0.0.5:9000` | host and port |
/// | `serial` | `serial:///dev/ttyUSB0?baud=115200` | port path plus options |
/// | `usb` | `usb://04b8:0202` | vendor:product id in hex |
/// | `embedded` | `embedded://Office-Printer` | backend resource name |
///
/// # Examples
///
/// ```
/// use devlink_core::DeviceAddress;
///
/// let address: DeviceAddress = "serial:///dev/ttyUSB0?baud=115200".parse().unwrap();
/// assert_eq!(address.scheme, "serial");
/// assert_eq!(address.path.as_deref(), Some("/dev/ttyUSB0"));
/// assert_eq!(address.option("baud"), Some("115200"));
///
/// let tcp = DeviceAddress::tcp("10.0.0.5", 9000);
/// assert_eq!(tcp.to_string(), "tcp://10.0.0.5:9000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddress {
    /// Transport scheme, always lowercase.
    pub scheme: String,

    /// Host name, IP address, USB `vid:pid`, or backend resource name.
    #[serde(default)]
    pub host: Option<String>,

    /// Port number for network transports.
    #[serde(default)]
    pub port: Option<u16>,

    /// Filesystem-like path (serial port device).
    #[serde(default)]
    pub path: Option<String>,

    /// Transport-specific options from the query string.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl DeviceAddress {
    /// Create an address with only a scheme.
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: None,
            port: None,
            path: None,
            options: BTreeMap::new(),
        }
    }

    /// TCP address.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(crate::constants::SCHEME_TCP)
            .with_host(host)
            .with_port(port)
    }

    /// Serial port address.
    pub fn serial(path: impl Into<String>, baud_rate: u32) -> Self {
        Self::new(crate::constants::SCHEME_SERIAL)
            .with_path(path)
            .with_option("baud", baud_rate.to_string())
    }

    /// USB address from vendor and product ids.
    pub fn usb(vendor_id: u16, product_id: u16) -> Self {
        Self::new(SCHEME_USB).with_host(format!("{vendor_id:04x}:{product_id:04x}"))
    }

    /// Embedded (no transport) address naming a backend resource.
    pub fn embedded(name: impl Into<String>) -> Self {
        Self::new(crate::constants::SCHEME_EMBEDDED).with_host(name)
    }

    /// Set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add a transport option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Look up a transport option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Look up and parse a transport option.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the option is present but does not parse.
    pub fn option_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.option(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                Error::configuration(format!("Invalid value for option '{key}' in {self}: {raw}"))
            }),
        }
    }

    /// The host, or a configuration error naming the address.
    pub fn require_host(&self) -> Result<&str> {
        self.host
            .as_deref()
            .ok_or_else(|| Error::configuration(format!("Address {self} has no host")))
    }

    /// The port, or a configuration error naming the address.
    pub fn require_port(&self) -> Result<u16> {
        self.port
            .ok_or_else(|| Error::configuration(format!("Address {self} has no port")))
    }

    /// The path, or a configuration error naming the address.
    pub fn require_path(&self) -> Result<&str> {
        self.path
            .as_deref()
            .ok_or_else(|| Error::configuration(format!("Address {self} has no path")))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(host) = &self.host {
            f.write_str(host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        if let Some(path) = &self.path {
            if !path.starts_with('/') {
                f.write_str("/")?;
            }
            f.write_str(path)?;
        }
        for (index, (key, value)) in self.options.iter().enumerate() {
            let separator = if index == 0 { '?' } else { '&' };
            write!(f, "{separator}{key}={value}")?;
        }
        Ok(())
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::configuration(format!("Address '{s}' has no scheme")))?;

        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(Error::configuration(format!(
                "Address '{s}' has an invalid scheme"
            )));
        }

        let mut address = DeviceAddress::new(scheme);

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let (authority, path) = match location.find('/') {
            Some(index) => (&location[..index], Some(&location[index..])),
            None => (location, None),
        };

        if !authority.is_empty() {
            // USB authorities are `vid:pid` in hex and never carry a port.
            if address.scheme == SCHEME_USB {
                address.host = Some(authority.to_string());
            } else {
                match authority.rsplit_once(':') {
                    Some((host, port)) => {
                        let port = port.parse::<u16>().map_err(|_| {
                            Error::configuration(format!("Address '{s}' has an invalid port"))
                        })?;
                        if !host.is_empty() {
                            address.host = Some(host.to_string());
                        }
                        address.port = Some(port);
                    }
                    None => address.host = Some(authority.to_string()),
                }
            }
        }

        if let Some(path) = path
            && path != "/"
        {
            address.path = Some(path.to_string());
        }

        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                address.options.insert(key.to_string(), value.to_string());
            }
        }

        Ok(address)
    }
}

/// Generic device information.
///
/// Returned by `get_info`. Contains metadata such as name, model, serial
/// number, firmware version, and free-form properties reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device name (e.g., "TM-T20", "Entrance Gate").
    pub name: String,

    /// Device model identifier.
    pub model: String,

    /// Optional device serial number.
    pub serial_number: Option<String>,

    /// Optional firmware version string.
    pub firmware_version: Option<String>,

    /// Additional driver-reported properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl DeviceInfo {
    /// Create a new DeviceInfo with required fields.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            serial_number: None,
            firmware_version: None,
            properties: BTreeMap::new(),
        }
    }

    /// Set the serial number.
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set the firmware version.
    pub fn with_firmware_version(mut self, firmware_version: impl Into<String>) -> Self {
        self.firmware_version = Some(firmware_version.into());
        self
    }

    /// Add a driver-reported property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("camera", DeviceType::Camera)]
    #[case("Printer", DeviceType::Printer)]
    #[case(" scanner ", DeviceType::Scanner)]
    #[case("GATE", DeviceType::Gate)]
    #[case("label-printer", DeviceType::Other("label-printer".to_string()))]
    fn test_device_type_parse(#[case] input: &str, #[case] expected: DeviceType) {
        let parsed: DeviceType = input.parse().unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_device_type_empty_rejected() {
        assert!("  ".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_device_type_serialization() {
        let json = serde_json::to_string(&DeviceType::Gate).unwrap();
        assert_eq!(json, "\"gate\"");

        let parsed: DeviceType = serde_json::from_str("\"camera\"").unwrap();
        assert_eq!(parsed, DeviceType::Camera);
    }

    #[test]
    fn test_parse_tcp_address() {
        let address: DeviceAddress = "tcp://10.0.0.5:9000".parse().unwrap();
        assert_eq!(address.scheme, "tcp");
        assert_eq!(address.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(address.port, Some(9000));
        assert_eq!(address.path, None);
    }

    #[test]
    fn test_parse_serial_address_with_options() {
        let address: DeviceAddress = "serial:///dev/ttyUSB0?baud=115200&timeout_ms=500"
            .parse()
            .unwrap();
        assert_eq!(address.scheme, "serial");
        assert_eq!(address.host, None);
        assert_eq!(address.path.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(address.option_parsed::<u32>("baud").unwrap(), Some(115200));
        assert_eq!(address.option_parsed::<u64>("timeout_ms").unwrap(), Some(500));
    }

    #[test]
    fn test_parse_usb_address_keeps_hex_ids() {
        let address: DeviceAddress = "usb://04b8:0e15".parse().unwrap();
        assert_eq!(address.host.as_deref(), Some("04b8:0e15"));
        assert_eq!(address.port, None);
        assert_eq!(address, DeviceAddress::usb(0x04b8, 0x0e15));
    }

    #[test]
    fn test_parse_embedded_address() {
        let address: DeviceAddress = "EMBEDDED://Office-Printer".parse().unwrap();
        assert_eq!(address.scheme, "embedded");
        assert_eq!(address.host.as_deref(), Some("Office-Printer"));
    }

    #[rstest]
    #[case("10.0.0.5:9000")]
    #[case("://host")]
    #[case("tcp://host:notaport")]
    #[case("t cp://host:1")]
    fn test_parse_invalid_address(#[case] input: &str) {
        assert!(input.parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_option_parse_error_names_key() {
        let address = DeviceAddress::tcp("h", 1).with_option("timeout_ms", "soon");
        let error = address.option_parsed::<u64>("timeout_ms").unwrap_err();
        assert!(error.to_string().contains("timeout_ms"));
    }

    #[rstest]
    #[case(DeviceAddress::tcp("10.0.0.5", 9000), "tcp://10.0.0.5:9000")]
    #[case(DeviceAddress::serial("/dev/ttyS0", 9600), "serial:///dev/ttyS0?baud=9600")]
    #[case(DeviceAddress::embedded("scanner-1"), "embedded://scanner-1")]
    fn test_address_display(#[case] address: DeviceAddress, #[case] expected: &str) {
        assert_eq!(address.to_string(), expected);
        assert_eq!(expected.parse::<DeviceAddress>().unwrap(), address);
    }

    #[test]
    fn test_require_helpers() {
        let address = DeviceAddress::embedded("x");
        assert_eq!(address.require_host().unwrap(), "x");
        assert!(address.require_port().is_err());
        assert!(address.require_path().is_err());
    }

    #[test]
    fn test_device_info_builder() {
        let info = DeviceInfo::new("TM-T20", "Thermal Printer")
            .with_serial_number("X5Z0012345")
            .with_firmware_version("v2.0.1")
            .with_property("paper.width", "80mm");

        assert_eq!(info.name, "TM-T20");
        assert_eq!(info.model, "Thermal Printer");
        assert_eq!(info.serial_number.as_deref(), Some("X5Z0012345"));
        assert_eq!(info.firmware_version.as_deref(), Some("v2.0.1"));
        assert_eq!(info.properties.get("paper.width").map(String::as_str), Some("80mm"));
    }
}

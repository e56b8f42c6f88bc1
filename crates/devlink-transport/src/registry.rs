//! Scheme-keyed transport registry.
//!
//! Maps an address scheme (`tcp`, `serial`, ...) to a factory that builds an
//! unopened [`AnyConnection`]. Built-in transports are registered by
//! [`TransportRegistry::with_defaults`]; hosts add or replace schemes with
//! [`TransportRegistry::register`].

use crate::connection::AnyConnection;
use crate::embedded::EmbeddedConnection;
use crate::tcp::{TcpConfig, TcpConnection};
use devlink_core::constants::{SCHEME_EMBEDDED, SCHEME_TCP};
use devlink_core::{DeviceAddress, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[cfg(feature = "serial")]
use crate::serial::{SerialConfig, SerialConnection};
#[cfg(feature = "serial")]
use devlink_core::constants::SCHEME_SERIAL;
#[cfg(feature = "usb")]
use crate::usb::{UsbConfig, UsbConnection};
#[cfg(feature = "usb")]
use devlink_core::constants::SCHEME_USB;

/// Builds an unopened connection for an address.
pub type TransportFactory = Arc<dyn Fn(&DeviceAddress) -> Result<AnyConnection> + Send + Sync>;

/// Settings for the built-in transports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// TCP defaults.
    pub tcp: TcpConfig,

    /// Serial defaults.
    #[cfg(feature = "serial")]
    pub serial: SerialConfig,

    /// USB defaults.
    #[cfg(feature = "usb")]
    pub usb: UsbConfig,
}

/// Scheme to factory map.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

impl TransportRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in transport enabled by cargo features.
    pub fn with_defaults() -> Self {
        Self::with_config(TransportConfig::default())
    }

    /// Registry with the built-in transports using the given settings.
    pub fn with_config(config: TransportConfig) -> Self {
        let mut registry = Self::new();

        let tcp = config.tcp;
        registry.register(SCHEME_TCP, move |_| Ok(TcpConnection::new(tcp.clone()).into()));

        #[cfg(feature = "serial")]
        {
            let serial = config.serial;
            registry.register(SCHEME_SERIAL, move |_| {
                Ok(SerialConnection::new(serial.clone()).into())
            });
        }

        #[cfg(feature = "usb")]
        {
            let usb = config.usb;
            registry.register(SCHEME_USB, move |_| Ok(UsbConnection::new(usb.clone()).into()));
        }

        registry.register(SCHEME_EMBEDDED, |_| Ok(EmbeddedConnection::new().into()));
        registry
    }

    /// Register or replace the factory for `scheme`.
    pub fn register<F>(&mut self, scheme: impl Into<String>, factory: F)
    where
        F: Fn(&DeviceAddress) -> Result<AnyConnection> + Send + Sync + 'static,
    {
        let scheme = scheme.into().to_ascii_lowercase();
        debug!(scheme = %scheme, "Registering transport");
        self.factories.insert(scheme, Arc::new(factory));
    }

    /// Remove the factory for `scheme`. Returns whether one was registered.
    pub fn unregister(&mut self, scheme: &str) -> bool {
        self.factories.remove(&scheme.to_ascii_lowercase()).is_some()
    }

    /// Whether a factory is registered for `scheme`.
    pub fn contains(&self, scheme: &str) -> bool {
        self.factories.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.factories.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Build an unopened connection for `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedScheme`] when no factory handles the scheme,
    /// or whatever the factory reports.
    pub fn create(&self, address: &DeviceAddress) -> Result<AnyConnection> {
        let factory = self
            .factories
            .get(&address.scheme)
            .ok_or_else(|| Error::unsupported_scheme(address.scheme.clone()))?;
        factory(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::mock::MockConnection;
    use devlink_core::constants::SCHEME_MOCK;

    #[test]
    fn test_defaults() {
        let registry = TransportRegistry::with_defaults();
        assert!(registry.contains("tcp"));
        assert!(registry.contains("TCP"));
        assert!(registry.contains("embedded"));
        assert!(!registry.contains("mock"));
        #[cfg(feature = "serial")]
        assert!(registry.contains("serial"));
    }

    #[test]
    fn test_unsupported_scheme() {
        let registry = TransportRegistry::with_defaults();
        let address: DeviceAddress = "ftp://files.example.com".parse().unwrap();

        let error = registry.create(&address).unwrap_err();
        assert!(matches!(error, Error::UnsupportedScheme { ref scheme } if scheme == "ftp"));
    }

    #[test]
    fn test_create_builds_matching_transport() {
        let registry = TransportRegistry::with_defaults();

        let connection = registry.create(&DeviceAddress::tcp("10.0.0.5", 9000)).unwrap();
        assert!(matches!(connection, AnyConnection::Tcp(_)));
        assert_eq!(connection.scheme(), "tcp");

        let connection = registry.create(&DeviceAddress::embedded("scanner")).unwrap();
        assert!(matches!(connection, AnyConnection::Embedded(_)));
    }

    #[test]
    fn test_host_registered_scheme() {
        let mut registry = TransportRegistry::new();
        registry.register(SCHEME_MOCK, |_| Ok(MockConnection::new().0.into()));

        assert_eq!(registry.schemes(), vec!["mock".to_string()]);
        let connection = registry
            .create(&DeviceAddress::new("mock").with_host("spy"))
            .unwrap();
        assert_eq!(connection.scheme(), "mock");

        assert!(registry.unregister("mock"));
        assert!(!registry.contains("mock"));
    }

    #[test]
    fn test_config_deserializes_partial() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"tcp": {"io_timeout_ms": 500}}"#).unwrap();
        assert_eq!(config.tcp.io_timeout_ms, 500);
        assert_eq!(config.tcp.connect_timeout_ms, 3000);
    }
}

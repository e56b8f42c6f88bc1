//! Device manager configuration.

use devlink_core::{Error, Result};
use devlink_plugin::CatalogConfig;
use devlink_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default time a shutdown sweep gives each device to release its connection.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Configuration for a [`DeviceManager`](crate::DeviceManager).
///
/// Every field has a default, so a host can load a partial JSON document:
///
/// ```
/// use devlink_manager::ManagerConfig;
///
/// let config = ManagerConfig::from_json(
///     r#"{ "catalog": { "directory": "/opt/devlink/plugins" }, "shutdown_timeout_ms": 1000 }"#,
/// )
/// .unwrap();
/// assert!(config.initialize_on_connect);
/// assert_eq!(config.shutdown_timeout_ms, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Settings for the built-in transports.
    pub transport: TransportConfig,

    /// Plugin discovery settings.
    pub catalog: CatalogConfig,

    /// Run the device's `connect` (and with it driver setup) before handing
    /// the device to the caller.
    pub initialize_on_connect: bool,

    /// Per-device budget for the shutdown sweep, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            catalog: CatalogConfig::default(),
            initialize_on_connect: true,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl ManagerConfig {
    /// Parse a JSON configuration document.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when the document is not valid.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::configuration(format!("Invalid manager configuration: {e}")))
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Scan `directory` for plugin components.
    pub fn with_plugin_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.catalog.directory = Some(directory.into());
        self
    }

    pub fn with_recursive_scan(mut self, recursive: bool) -> Self {
        self.catalog.recursive = recursive;
        self
    }

    pub fn with_initialize_on_connect(mut self, enabled: bool) -> Self {
        self.initialize_on_connect = enabled;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert!(config.initialize_on_connect);
        assert!(config.catalog.directory.is_none());
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::default()
            .with_plugin_directory("/tmp/plugins")
            .with_recursive_scan(true)
            .with_initialize_on_connect(false)
            .with_shutdown_timeout(Duration::from_millis(250));

        assert_eq!(config.catalog.directory, Some(PathBuf::from("/tmp/plugins")));
        assert!(config.catalog.recursive);
        assert!(!config.initialize_on_connect);
        assert_eq!(config.shutdown_timeout_ms, 250);
    }

    #[test]
    fn test_from_json_nested_transport() {
        let config = ManagerConfig::from_json(
            r#"{"transport": {"tcp": {"connect_timeout_ms": 750}}, "initialize_on_connect": false}"#,
        )
        .unwrap();
        assert_eq!(config.transport.tcp.connect_timeout_ms, 750);
        assert!(!config.initialize_on_connect);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            ManagerConfig::from_json("{ nope"),
            Err(Error::Configuration { .. })
        ));
    }
}

//! Plugin contract.

use async_trait::async_trait;
use devlink_core::constants::CAPABILITY_TRANSPORT_SCHEME;
use devlink_core::{CancellationToken, DeviceType, Result};
use devlink_device::AnyDevice;
use devlink_transport::AnyConnection;
use crate::version::PluginVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Immutable plugin metadata.
///
/// # Examples
///
/// ```
/// use devlink_core::DeviceType;
/// use devlink_plugin::PluginDescriptor;
///
/// let descriptor = PluginDescriptor::new("acme.camera.x", "1.2.0".parse().unwrap(), DeviceType::Camera)
///     .with_capability("video.stream", "h264")
///     .with_capability("transport.scheme", "tcp");
///
/// assert!(descriptor.supports("video.stream"));
/// assert_eq!(descriptor.capability("video.stream"), Some("h264"));
/// assert!(descriptor.expects_scheme("TCP"));
/// assert!(!descriptor.expects_scheme("serial"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Globally unique identifier, the durable resolution handle.
    pub id: String,

    /// Plugin version.
    pub version: PluginVersion,

    /// Coarse partition used for listing.
    pub device_type: DeviceType,

    /// Soft-discovery capability map.
    #[serde(default)]
    pub capabilities: BTreeMap<String, String>,

    #[serde(default)]
    pub description: Option<String>,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<String>, version: PluginVersion, device_type: DeviceType) -> Self {
        Self {
            id: id.into(),
            version,
            device_type,
            capabilities: BTreeMap::new(),
            description: None,
        }
    }

    pub fn with_capability(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.capabilities.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether the capability map declares `key`.
    pub fn supports(&self, key: &str) -> bool {
        self.capabilities.contains_key(key)
    }

    /// Value declared for `key`.
    pub fn capability(&self, key: &str) -> Option<&str> {
        self.capabilities.get(key).map(String::as_str)
    }

    /// Whether the plugin accepts connections of `scheme`.
    ///
    /// Plugins that declare no `transport.scheme` accept any scheme. The
    /// declared value may list several schemes separated by commas.
    pub fn expects_scheme(&self, scheme: &str) -> bool {
        match self.capability(CAPABILITY_TRANSPORT_SCHEME) {
            None => true,
            Some(declared) => declared
                .split(',')
                .any(|candidate| candidate.trim().eq_ignore_ascii_case(scheme)),
        }
    }
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.id, self.version, self.device_type)
    }
}

/// A versioned factory turning an open connection into a device.
///
/// `create` takes ownership of the connection: on success the device owns it,
/// on failure the plugin must release it before returning.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Build a device on `connection`.
    async fn create(&self, connection: AnyConnection, cancel: &CancellationToken) -> Result<AnyDevice>;
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Plugin").field(self.descriptor()).finish()
    }
}

//! JSON manifest components.
//!
//! A manifest file (`*.plugin.json`) declares one or more plugins, each bound
//! to a driver from the host's [`DriverRegistry`]:
//!
//! ```json
//! {
//!   "plugins": [
//!     {
//!       "id": "acme.camera.x",
//!       "version": "1.2.0",
//!       "device_type": "camera",
//!       "driver": "stream-camera",
//!       "capabilities": { "video.stream": "h264", "transport.scheme": "tcp" },
//!       "settings": { "frame_request": "0x46" }
//!     }
//!   ]
//! }
//! ```

use crate::context::IsolationContext;
use crate::descriptor::{Plugin, PluginDescriptor};
use crate::drivers::{DeviceParts, DriverFactory, DriverRegistry};
use crate::loader::ComponentLoader;
use crate::version::PluginVersion;
use async_trait::async_trait;
use devlink_core::constants::PLUGIN_MANIFEST_SUFFIX;
use devlink_core::{CancellationToken, DeviceType, Error, Result, RetryConfig, RetryPolicy};
use devlink_device::{AnyDevice, DeviceIdentity, DriverSettings};
use devlink_transport::{AnyConnection, Connection};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Parsed manifest file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    pub plugins: Vec<ManifestEntry>,
}

/// One plugin declared in a manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub version: PluginVersion,
    pub device_type: DeviceType,
    /// Driver name in the host's [`DriverRegistry`].
    pub driver: String,
    /// Display name for created devices. Defaults to the plugin id.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeMap<String, String>,
    #[serde(default)]
    pub settings: DriverSettings,
    /// Retry settings for created devices. Defaults to the loader's.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl PluginManifest {
    /// Parse and validate manifest text.
    pub fn parse(text: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(text)
            .map_err(|e| Error::configuration(format!("Invalid plugin manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.plugins.is_empty() {
            return Err(Error::configuration("Plugin manifest declares no plugins"));
        }

        let mut seen = HashSet::new();
        for entry in &self.plugins {
            if entry.id.trim().is_empty() {
                return Err(Error::configuration("Plugin id must not be empty"));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(Error::configuration(format!(
                    "Plugin id '{}' declared twice in one manifest",
                    entry.id
                )));
            }
        }
        Ok(())
    }
}

/// Loads `*.plugin.json` manifests.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    drivers: Arc<DriverRegistry>,
    retry: RetryConfig,
}

impl ManifestLoader {
    pub fn new(drivers: DriverRegistry) -> Self {
        Self {
            drivers: Arc::new(drivers),
            retry: RetryConfig::default(),
        }
    }

    /// Retry settings for plugins whose manifest entry has none.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn instantiate(&self, entry: ManifestEntry, context: &Arc<IsolationContext>) -> Result<ManifestPlugin> {
        let factory = self.drivers.get(&entry.driver).map_err(|_| {
            Error::plugin_load(
                entry.id.clone(),
                format!("unknown driver '{}'", entry.driver),
            )
        })?;

        if let Some(built) = self.drivers.device_type(&entry.driver)
            && *built != entry.device_type
        {
            return Err(Error::plugin_load(
                entry.id.clone(),
                format!(
                    "driver '{}' builds {built} devices, manifest declares {}",
                    entry.driver, entry.device_type
                ),
            ));
        }

        // Settings are checked now so a broken entry fails the component
        // instead of the first connect. The builder is rebuilt per device.
        let _validated = factory(&entry.settings)
            .map_err(|e| Error::plugin_load(entry.id.clone(), format!("invalid settings: {e}")))?;

        let mut descriptor = PluginDescriptor::new(entry.id, entry.version, entry.device_type);
        descriptor.capabilities = entry.capabilities;
        descriptor.description = entry.description;

        Ok(ManifestPlugin {
            name: entry.name.unwrap_or_else(|| descriptor.id.clone()),
            descriptor,
            driver: entry.driver,
            factory,
            settings: entry.settings,
            retry: entry.retry.unwrap_or_else(|| self.retry.clone()),
            context: Arc::clone(context),
        })
    }
}

impl ComponentLoader for ManifestLoader {
    fn name(&self) -> &str {
        "manifest"
    }

    fn accepts(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(PLUGIN_MANIFEST_SUFFIX))
    }

    fn load(&self, path: &Path, context: &Arc<IsolationContext>) -> Result<Vec<Arc<dyn Plugin>>> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::plugin_load(path.display().to_string(), format!("cannot read manifest: {e}"))
        })?;
        let manifest = PluginManifest::parse(&text)
            .map_err(|e| Error::plugin_load(path.display().to_string(), e.to_string()))?;

        let mut plugins: Vec<Arc<dyn Plugin>> = Vec::with_capacity(manifest.plugins.len());
        for entry in manifest.plugins {
            let plugin = self.instantiate(entry, context)?;
            debug!(plugin_id = %plugin.descriptor.id, driver = %plugin.driver, "Manifest plugin instantiated");
            plugins.push(Arc::new(plugin));
        }
        Ok(plugins)
    }
}

/// Plugin declared by a manifest and backed by a registered driver.
pub struct ManifestPlugin {
    descriptor: PluginDescriptor,
    name: String,
    driver: String,
    factory: DriverFactory,
    settings: DriverSettings,
    retry: RetryConfig,
    context: Arc<IsolationContext>,
}

impl fmt::Debug for ManifestPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestPlugin")
            .field("id", &self.descriptor.id)
            .field("driver", &self.driver)
            .field("context", &self.context.id())
            .finish_non_exhaustive()
    }
}

impl ManifestPlugin {
    /// Driver name.
    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn context(&self) -> &Arc<IsolationContext> {
        &self.context
    }
}

async fn release(mut connection: AnyConnection) {
    if let Err(e) = connection.dispose().await {
        warn!(endpoint = %connection.info(), error = %e, "Error releasing connection");
    }
}

#[async_trait]
impl Plugin for ManifestPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn create(&self, connection: AnyConnection, cancel: &CancellationToken) -> Result<AnyDevice> {
        if !self.descriptor.expects_scheme(connection.scheme()) {
            let error = Error::configuration(format!(
                "Plugin {} does not accept '{}' connections",
                self.descriptor.id,
                connection.scheme()
            ));
            release(connection).await;
            return Err(error);
        }

        if cancel.is_cancelled() {
            release(connection).await;
            return Err(Error::Cancelled);
        }

        let builder = match (self.factory)(&self.settings) {
            Ok(builder) => builder,
            Err(error) => {
                release(connection).await;
                return Err(error);
            }
        };

        let identity = DeviceIdentity::new(
            format!("{}@{}", self.descriptor.id, connection.info()),
            self.name.clone(),
            self.descriptor.device_type.clone(),
        );
        debug!(plugin_id = %self.descriptor.id, device_id = %identity.id, "Creating device");

        Ok(builder(DeviceParts {
            identity,
            connection,
            retry: RetryPolicy::from(self.retry.clone()),
        }))
    }
}

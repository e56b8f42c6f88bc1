//! Device manager.
//!
//! The [`DeviceManager`] is the single entry point hosts use to reach a
//! device. One call walks the whole chain:
//!
//! ```text
//! connect(address, plugin_id)
//!   -> TransportRegistry::create(address.scheme)   UnsupportedScheme
//!   -> Connection::open(address)                   connection faults
//!   -> PluginCatalog::resolve(plugin_id)           PluginNotFound
//!   -> Plugin::create(connection)
//!   -> Device::connect                             device faults
//!   -> typed capability                            InvalidParameter
//! ```
//!
//! The manager never retries; transient faults are handled by the device's
//! own retry policy. Every failure after the connection was created releases
//! the connection before the error reaches the caller.

use crate::config::ManagerConfig;
use devlink_core::{CancellationToken, DeviceAddress, DeviceFaultKind, Error, Result};
use devlink_device::{AnyDevice, Capability, Device};
use devlink_plugin::{
    CatalogEntry, DriverRegistry, IsolationContext, ManifestLoader, Plugin, PluginCatalog,
};
use devlink_transport::{AnyConnection, Connection, TransportRegistry};
use futures::future::join_all;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// A device handed out by the manager.
///
/// The device itself is held weakly; the plugin and its isolation context are
/// held strongly so a reload or unload never pulls code out from under a
/// device that is still in use.
struct LiveDevice {
    id: String,
    device: Weak<dyn Device>,
    _plugin: Arc<dyn Plugin>,
    context: Arc<IsolationContext>,
}

impl LiveDevice {
    fn is_alive(&self) -> bool {
        self.device.strong_count() > 0
    }
}

/// Orchestrates transport creation, plugin resolution and device setup.
pub struct DeviceManager {
    transports: TransportRegistry,
    catalog: Arc<PluginCatalog>,
    config: ManagerConfig,
    live: Mutex<Vec<LiveDevice>>,
    shut_down: AtomicBool,
}

impl fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceManager")
            .field("transports", &self.transports)
            .field("catalog", &self.catalog)
            .field("live_devices", &self.live_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl DeviceManager {
    /// Create a manager from explicit collaborators.
    pub fn new(transports: TransportRegistry, catalog: Arc<PluginCatalog>, config: ManagerConfig) -> Self {
        info!(
            schemes = ?transports.schemes(),
            plugins = catalog.len(),
            "Device manager created"
        );
        Self {
            transports,
            catalog,
            config,
            live: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Build the default transports and a manifest catalog from `config`, then
    /// run the initial plugin scan when a directory is configured.
    ///
    /// Skipped components do not fail construction; they are listed in
    /// [`PluginCatalog::last_report`].
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when the plugin directory cannot be read.
    pub fn from_config(config: ManagerConfig, drivers: DriverRegistry) -> Result<Self> {
        let transports = TransportRegistry::with_config(config.transport.clone());
        let catalog = PluginCatalog::new(config.catalog.clone()).with_loader(ManifestLoader::new(drivers));

        let report = catalog.scan()?;
        for skipped in &report.skipped {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "Plugin component skipped");
        }

        Ok(Self::new(transports, Arc::new(catalog), config))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    pub fn catalog(&self) -> &Arc<PluginCatalog> {
        &self.catalog
    }

    /// Connect to the device at `address` through plugin `plugin_id` and
    /// return it as capability `C`.
    ///
    /// `C` is one of `dyn Camera`, `dyn Printer`, `dyn Scanner`, `dyn Gate`,
    /// or `dyn Device` to accept any device.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedScheme`] when no transport handles the scheme
    /// - [`Error::PluginNotFound`] when the plugin id is not in the catalog
    /// - [`Error::Device`] with [`DeviceFaultKind::InvalidParameter`] when the
    ///   plugin builds a device without capability `C`
    /// - connection and device faults, unchanged
    pub async fn connect<C>(
        &self,
        address: &DeviceAddress,
        plugin_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<C>>
    where
        C: Capability + ?Sized,
    {
        let (device, entry) = self.establish(address, plugin_id, cancel).await?;
        let handle = device.as_device();

        match device.into_capability::<C>() {
            Ok(typed) => {
                self.track(&handle, entry).await?;
                Ok(typed)
            }
            Err(device) => {
                let error = Error::device(
                    DeviceFaultKind::InvalidParameter,
                    handle.id(),
                    format!(
                        "Plugin {plugin_id} provides a {} device, not a {}",
                        device.capability(),
                        C::NAME
                    ),
                );
                warn!(device_id = %handle.id(), plugin_id, error = %error, "Capability mismatch");
                handle.dispose().await;
                Err(error)
            }
        }
    }

    /// Connect without asking for a capability.
    ///
    /// # Errors
    ///
    /// Same as [`DeviceManager::connect`] minus the capability check.
    pub async fn connect_any(
        &self,
        address: &DeviceAddress,
        plugin_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AnyDevice> {
        let (device, entry) = self.establish(address, plugin_id, cancel).await?;
        self.track(&device.as_device(), entry).await?;
        Ok(device)
    }

    async fn establish(
        &self,
        address: &DeviceAddress,
        plugin_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(AnyDevice, CatalogEntry)> {
        if self.is_shut_down() {
            return Err(Error::disposed("device manager"));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!(address = %address, plugin_id, "Connecting device");

        let mut connection = self.transports.create(address)?;

        if let Err(error) = connection.open(address, cancel).await {
            debug!(address = %address, error = %error, "Open failed");
            release(connection).await;
            return Err(error);
        }

        let entry = match self.catalog.entry(plugin_id) {
            Ok(entry) => entry,
            Err(error) => {
                warn!(address = %address, plugin_id, "Plugin not found, releasing connection");
                release(connection).await;
                return Err(error);
            }
        };

        // The plugin owns the connection from here and releases it on failure.
        let device = entry.plugin.create(connection, cancel).await?;
        let handle = device.as_device();

        if self.config.initialize_on_connect
            && let Err(error) = handle.connect(cancel).await
        {
            warn!(device_id = %handle.id(), error = %error, "Device connect failed");
            handle.dispose().await;
            return Err(error);
        }

        info!(
            device_id = %handle.id(),
            capability = device.capability(),
            plugin_version = %entry.plugin.descriptor().version,
            "Device connected"
        );
        Ok((device, entry))
    }

    fn live(&self) -> MutexGuard<'_, Vec<LiveDevice>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a freshly connected device, or dispose it when `shutdown`
    /// ran while it was connecting.
    async fn track(&self, device: &Arc<dyn Device>, entry: CatalogEntry) -> Result<()> {
        {
            // The flag is read under the list lock so the shutdown sweep either
            // drains this entry or the device is refused here.
            let mut live = self.live();
            if !self.is_shut_down() {
                live.retain(LiveDevice::is_alive);
                live.push(LiveDevice {
                    id: device.id().to_string(),
                    device: Arc::downgrade(device),
                    _plugin: entry.plugin,
                    context: entry.context,
                });
                return Ok(());
            }
        }

        warn!(device_id = %device.id(), "Manager shut down during connect, releasing device");
        device.dispose().await;
        Err(Error::disposed("device manager"))
    }

    /// Devices handed out and not yet dropped by every caller.
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        let mut live = self.live();
        live.retain(LiveDevice::is_alive);
        live.iter().filter_map(|entry| entry.device.upgrade()).collect()
    }

    pub fn live_count(&self) -> usize {
        let mut live = self.live();
        live.retain(LiveDevice::is_alive);
        live.len()
    }

    /// Live devices whose plugin component has since been replaced or unloaded.
    pub fn stale_devices(&self) -> Vec<String> {
        let mut live = self.live();
        live.retain(LiveDevice::is_alive);
        live.iter()
            .filter(|entry| entry.context.is_discarded())
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Dispose every live device and refuse further connects.
    ///
    /// Devices are released concurrently; each gets
    /// [`ManagerConfig::shutdown_timeout_ms`] before the sweep moves on.
    /// Returns the number of devices swept.
    pub async fn shutdown(&self) -> usize {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let devices: Vec<Arc<dyn Device>> = {
            let mut live = self.live();
            live.drain(..).filter_map(|entry| entry.device.upgrade()).collect()
        };
        let timeout = self.config.shutdown_timeout();

        info!(devices = devices.len(), "Shutting down device manager");

        let sweeps = devices.iter().map(|device| async move {
            if tokio::time::timeout(timeout, device.dispose()).await.is_err() {
                warn!(
                    device_id = %device.id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Device did not release its connection in time"
                );
            }
        });
        join_all(sweeps).await;

        devices.len()
    }
}

async fn release(mut connection: AnyConnection) {
    if let Err(e) = connection.dispose().await {
        warn!(endpoint = %connection.info(), error = %e, "Error releasing connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_core::DeviceType;
    use devlink_core::constants::SCHEME_MOCK;
    use devlink_device::{Camera, DeviceStatus, Gate};
    use devlink_plugin::CatalogConfig;
    use devlink_transport::{MockConnection, MockConnectionHandle};

    const GATE_MANIFEST: &str = r#"{"plugins": [{"id": "acme.gate", "version": "1.0.0",
        "device_type": "gate", "driver": "relay-gate", "settings": {"open": "01", "close": "00"}}]}"#;

    fn manager_with_mock() -> (DeviceManager, Arc<Mutex<Vec<MockConnectionHandle>>>) {
        let handles = Arc::new(Mutex::new(Vec::new()));
        let mut transports = TransportRegistry::new();
        let spy = Arc::clone(&handles);
        transports.register(SCHEME_MOCK, move |_| {
            let (connection, handle) = MockConnection::new();
            spy.lock().unwrap().push(handle);
            Ok(connection.into())
        });

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gate.plugin.json"), GATE_MANIFEST).unwrap();
        let catalog = PluginCatalog::new(CatalogConfig::new(dir.path()))
            .with_loader(ManifestLoader::new(DriverRegistry::with_defaults()));
        catalog.scan().unwrap();

        (
            DeviceManager::new(transports, Arc::new(catalog), ManagerConfig::default()),
            handles,
        )
    }

    fn address() -> DeviceAddress {
        DeviceAddress::new(SCHEME_MOCK).with_host("gate-1")
    }

    #[tokio::test]
    async fn test_connect_tracks_device_until_dropped() {
        let (manager, _handles) = manager_with_mock();
        let cancel = CancellationToken::new();

        let gate = manager.connect::<dyn Gate>(&address(), "acme.gate", &cancel).await.unwrap();
        assert_eq!(gate.device_type(), DeviceType::Gate);
        assert_eq!(gate.status(), DeviceStatus::Ready);
        assert_eq!(manager.live_count(), 1);

        drop(gate);
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_capability_mismatch_disposes_device() {
        let (manager, handles) = manager_with_mock();
        let cancel = CancellationToken::new();

        let error = manager
            .connect::<dyn Camera>(&address(), "acme.gate", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            Error::Device { kind: DeviceFaultKind::InvalidParameter, .. }
        ));
        let handle = handles.lock().unwrap()[0].clone();
        assert!(handle.was_disposed());
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_after_shutdown_is_refused() {
        let (manager, _handles) = manager_with_mock();
        let cancel = CancellationToken::new();

        let gate = manager.connect::<dyn Gate>(&address(), "acme.gate", &cancel).await.unwrap();
        assert_eq!(manager.shutdown().await, 1);
        assert_eq!(manager.shutdown().await, 0);
        assert_eq!(gate.status(), DeviceStatus::Disconnected);

        let error = manager
            .connect_any(&address(), "acme.gate", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Disposed { .. }));
    }
}

//! Driver registry used by manifest plugins.
//!
//! A manifest names a driver (`"driver": "stream-camera"`); the host decides
//! which drivers exist by building a [`DriverRegistry`] and handing it to the
//! [`ManifestLoader`](crate::ManifestLoader). There is no global registry.
//!
//! Building a device is split in two phases. The factory validates settings
//! and returns a [`DeviceBuilder`]; only the builder takes the connection. Bad
//! settings therefore fail at load time and never consume a connection.

use devlink_core::{DeviceType, Error, Result, RetryPolicy};
use devlink_device::drivers::{BackendScanner, EncodedPrinter, RelayGate, StreamCamera};
use devlink_device::{
    AnyDevice, DeviceDriver, DeviceIdentity, DriverSettings, ManagedDevice, PlatformBackend,
};
use devlink_transport::AnyConnection;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Everything a driver needs to become a device.
#[derive(Debug)]
pub struct DeviceParts {
    pub identity: DeviceIdentity,
    pub connection: AnyConnection,
    pub retry: RetryPolicy,
}

/// Second phase: assemble the device around its connection.
pub type DeviceBuilder = Box<dyn FnOnce(DeviceParts) -> AnyDevice + Send>;

/// First phase: validate settings and prepare a builder.
pub type DriverFactory = Arc<dyn Fn(&DriverSettings) -> Result<DeviceBuilder> + Send + Sync>;

#[derive(Clone)]
struct RegisteredDriver {
    device_type: DeviceType,
    factory: DriverFactory,
}

/// Named driver factories, each tagged with the device type it builds.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, RegisteredDriver>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the reference drivers that need no platform backend:
    /// `stream-camera`, `encoded-printer` and `relay-gate`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_managed(
            "stream-camera",
            DeviceType::Camera,
            StreamCamera::from_settings,
            |device| AnyDevice::camera(device),
        );
        registry.register_managed(
            "encoded-printer",
            DeviceType::Printer,
            EncodedPrinter::from_settings,
            |device| AnyDevice::printer(device),
        );
        registry.register_managed(
            "relay-gate",
            DeviceType::Gate,
            RelayGate::from_settings,
            |device| AnyDevice::gate(device),
        );
        registry
    }

    /// Add `backend-scanner`, served by `backend`.
    pub fn with_platform_backend(mut self, backend: Arc<dyn PlatformBackend>) -> Self {
        self.register_managed(
            "backend-scanner",
            DeviceType::Scanner,
            move |settings| BackendScanner::from_settings(Arc::clone(&backend), settings),
            |device| AnyDevice::scanner(device),
        );
        self
    }

    /// Register a raw factory building devices of `device_type`.
    ///
    /// Replaces an existing driver of the same name.
    pub fn register(&mut self, name: impl Into<String>, device_type: DeviceType, factory: DriverFactory) {
        self.factories
            .insert(name.into(), RegisteredDriver { device_type, factory });
    }

    /// Register a driver built into a [`ManagedDevice`].
    ///
    /// `make` builds the driver from settings, `wrap` tags the finished
    /// device with its capability.
    pub fn register_managed<D, M, W>(
        &mut self,
        name: impl Into<String>,
        device_type: DeviceType,
        make: M,
        wrap: W,
    ) where
        D: DeviceDriver,
        M: Fn(&DriverSettings) -> Result<D> + Send + Sync + 'static,
        W: Fn(ManagedDevice<D>) -> AnyDevice + Copy + Send + Sync + 'static,
    {
        let factory: DriverFactory = Arc::new(move |settings: &DriverSettings| {
            let driver = make(settings)?;
            let builder: DeviceBuilder = Box::new(move |parts: DeviceParts| {
                wrap(ManagedDevice::new(parts.identity, parts.connection, parts.retry, driver))
            });
            Ok(builder)
        });
        self.register(name, device_type, factory);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered driver names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up a driver factory.
    pub fn get(&self, name: &str) -> Result<DriverFactory> {
        self.factories
            .get(name)
            .map(|driver| Arc::clone(&driver.factory))
            .ok_or_else(|| Error::configuration(format!("Unknown driver: {name}")))
    }

    /// Device type a driver builds.
    pub fn device_type(&self, name: &str) -> Option<&DeviceType> {
        self.factories.get(name).map(|driver| &driver.device_type)
    }
}

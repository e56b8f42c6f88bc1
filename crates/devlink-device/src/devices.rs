//! Devices typed by capability.

use crate::traits::{Camera, Device, Gate, Printer, Scanner};
use devlink_core::DeviceType;
use std::fmt;
use std::sync::Arc;

/// A device as produced by a plugin, tagged with its capability.
#[derive(Clone)]
pub enum AnyDevice {
    Camera(Arc<dyn Camera>),
    Printer(Arc<dyn Printer>),
    Scanner(Arc<dyn Scanner>),
    Gate(Arc<dyn Gate>),
    /// Lifecycle only, no capability.
    Generic(Arc<dyn Device>),
}

impl AnyDevice {
    pub fn camera(device: impl Camera + 'static) -> Self {
        Self::Camera(Arc::new(device))
    }

    pub fn printer(device: impl Printer + 'static) -> Self {
        Self::Printer(Arc::new(device))
    }

    pub fn scanner(device: impl Scanner + 'static) -> Self {
        Self::Scanner(Arc::new(device))
    }

    pub fn gate(device: impl Gate + 'static) -> Self {
        Self::Gate(Arc::new(device))
    }

    pub fn generic(device: impl Device + 'static) -> Self {
        Self::Generic(Arc::new(device))
    }

    /// The device through its lifecycle contract.
    pub fn as_device(&self) -> Arc<dyn Device> {
        match self {
            Self::Camera(device) => device.clone(),
            Self::Printer(device) => device.clone(),
            Self::Scanner(device) => device.clone(),
            Self::Gate(device) => device.clone(),
            Self::Generic(device) => device.clone(),
        }
    }

    /// Name of the carried capability.
    pub fn capability(&self) -> &'static str {
        match self {
            Self::Camera(_) => <dyn Camera as Capability>::NAME,
            Self::Printer(_) => <dyn Printer as Capability>::NAME,
            Self::Scanner(_) => <dyn Scanner as Capability>::NAME,
            Self::Gate(_) => <dyn Gate as Capability>::NAME,
            Self::Generic(_) => <dyn Device as Capability>::NAME,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.as_device().device_type()
    }

    /// Extract the device as capability `C`, handing it back on mismatch.
    pub fn into_capability<C: Capability + ?Sized>(self) -> Result<Arc<C>, AnyDevice> {
        C::from_any(self)
    }
}

impl fmt::Debug for AnyDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device = self.as_device();
        f.debug_struct("AnyDevice")
            .field("capability", &self.capability())
            .field("id", &device.id())
            .field("status", &device.status())
            .finish()
    }
}

/// A capability a caller can ask the manager for.
///
/// Implemented for the capability trait objects: `dyn Camera`, `dyn Printer`,
/// `dyn Scanner`, `dyn Gate`, and `dyn Device` which accepts any device.
pub trait Capability: Device {
    /// Capability name used in errors.
    const NAME: &'static str;

    /// Extract `Self` from an [`AnyDevice`], or give the device back.
    fn from_any(device: AnyDevice) -> Result<Arc<Self>, AnyDevice>;
}

macro_rules! capability {
    ($trait:ident, $variant:ident, $name:literal) => {
        impl Capability for dyn $trait {
            const NAME: &'static str = $name;

            fn from_any(device: AnyDevice) -> Result<Arc<Self>, AnyDevice> {
                match device {
                    AnyDevice::$variant(device) => Ok(device),
                    other => Err(other),
                }
            }
        }

        impl From<Arc<dyn $trait>> for AnyDevice {
            fn from(device: Arc<dyn $trait>) -> Self {
                AnyDevice::$variant(device)
            }
        }
    };
}

capability!(Camera, Camera, "camera");
capability!(Printer, Printer, "printer");
capability!(Scanner, Scanner, "scanner");
capability!(Gate, Gate, "gate");

impl Capability for dyn Device {
    const NAME: &'static str = "device";

    fn from_any(device: AnyDevice) -> Result<Arc<Self>, AnyDevice> {
        Ok(device.as_device())
    }
}

impl From<Arc<dyn Device>> for AnyDevice {
    fn from(device: Arc<dyn Device>) -> Self {
        AnyDevice::Generic(device)
    }
}

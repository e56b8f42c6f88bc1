use super::DEFAULT_MODEL;
use crate::boundary::PlatformBackend;
use crate::capabilities::ScannerDriver;
use crate::managed::DeviceDriver;
use crate::settings::DriverSettings;
use async_trait::async_trait;
use bytes::Bytes;
use devlink_core::{CancellationToken, DeviceFaultKind, DeviceInfo, Error, Result};
use devlink_transport::{AnyConnection, Connection};
use std::fmt;
use std::sync::{Arc, Mutex};

const DEFAULT_ACTION: &str = "scan";

/// Scanner served by a platform backend over an `embedded` connection.
///
/// The backend resource is the host part of the connection address
/// (`embedded://Flatbed-1`).
pub struct BackendScanner {
    model: String,
    action: String,
    backend: Arc<dyn PlatformBackend>,
    resource: Mutex<Option<String>>,
}

impl fmt::Debug for BackendScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendScanner")
            .field("model", &self.model)
            .field("resource", &self.resource())
            .finish_non_exhaustive()
    }
}

impl BackendScanner {
    pub fn new(backend: Arc<dyn PlatformBackend>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            action: DEFAULT_ACTION.to_string(),
            backend,
            resource: Mutex::new(None),
        }
    }

    pub fn from_settings(backend: Arc<dyn PlatformBackend>, settings: &DriverSettings) -> Result<Self> {
        let mut scanner = Self::new(backend);
        if let Some(model) = settings.get("model") {
            scanner.model = model.to_string();
        }
        if let Some(action) = settings.get("action") {
            scanner.action = action.to_string();
        }
        Ok(scanner)
    }

    /// Resource bound during setup.
    pub fn resource(&self) -> Option<String> {
        self.resource.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn bound_resource(&self, connection: &AnyConnection) -> Result<String> {
        self.resource().ok_or_else(|| {
            Error::device(
                DeviceFaultKind::NotReady,
                connection.info(),
                "scanner has no bound resource",
            )
        })
    }
}

#[async_trait]
impl DeviceDriver for BackendScanner {
    async fn setup(&self, connection: &mut AnyConnection, cancel: &CancellationToken) -> Result<()> {
        let resource = connection
            .address()
            .and_then(|address| address.host.clone())
            .ok_or_else(|| Error::configuration("Backend scanner requires an address with a resource name"))?;

        let available = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            available = self.backend.is_available(&resource) => available?,
        };
        if !available {
            return Err(Error::device(
                DeviceFaultKind::InitializationFailed,
                connection.info(),
                format!("platform resource '{resource}' is not available"),
            ));
        }

        *self.resource.lock().unwrap_or_else(|e| e.into_inner()) = Some(resource);
        Ok(())
    }

    async fn teardown(&self, _connection: &mut AnyConnection, _cancel: &CancellationToken) -> Result<()> {
        *self.resource.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    async fn query_info(&self, connection: &mut AnyConnection, _cancel: &CancellationToken) -> Result<DeviceInfo> {
        let resource = self.bound_resource(connection)?;
        Ok(DeviceInfo::new(resource, self.model.clone()).with_property("endpoint", connection.info()))
    }
}

#[async_trait]
impl ScannerDriver for BackendScanner {
    fn backend(&self) -> &dyn PlatformBackend {
        self.backend.as_ref()
    }

    async fn acquire(&self, connection: &mut AnyConnection, cancel: &CancellationToken) -> Result<Bytes> {
        let resource = self.bound_resource(connection)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            document = self.backend.perform_action(&resource, self.action.as_bytes()) => document,
        }
    }
}

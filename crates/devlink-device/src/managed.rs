//! Device lifecycle built by composition.
//!
//! A [`ManagedDevice`] owns exactly one connection, a retry policy and a status
//! cell, and implements the whole [`Device`] lifecycle on top of them. The
//! vendor-specific parts come from a [`DeviceDriver`]: what to send on setup,
//! what to do on teardown, how to read device metadata.
//!
//! # Locking
//!
//! - `connect`, `disconnect`, `reset`, `initialize` and `dispose` are
//!   serialized by a lifecycle lock, so a second `connect` waits for the first
//!   and then observes its outcome instead of opening the transport twice.
//! - The connection sits behind an async mutex; capability operations hold it
//!   for the duration of one request through a [`BusyScope`].
//! - Status reads never take either lock.

use crate::status::{DeviceStatus, DeviceStatusChange};
use crate::traits::Device;
use async_trait::async_trait;
use devlink_core::{
    CancellationToken, DeviceAddress, DeviceFaultKind, DeviceInfo, DeviceType, Error, Result,
    RetryPolicy, StatusCell,
};
use devlink_transport::{AnyConnection, Connection, ConnectionStatus};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identity of a device instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Coarse device partition.
    pub device_type: DeviceType,
}

impl DeviceIdentity {
    /// Create an identity.
    pub fn new(id: impl Into<String>, name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            device_type,
        }
    }
}

/// Vendor-specific behavior plugged into a [`ManagedDevice`].
#[async_trait]
pub trait DeviceDriver: Send + Sync + 'static {
    /// Bring the device to its working state over an open connection.
    async fn setup(&self, connection: &mut AnyConnection, cancel: &CancellationToken) -> Result<()>;

    /// Undo `setup` before a reset.
    async fn teardown(&self, _connection: &mut AnyConnection, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    /// Read device metadata.
    async fn query_info(
        &self,
        connection: &mut AnyConnection,
        cancel: &CancellationToken,
    ) -> Result<DeviceInfo>;
}

struct BackgroundTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Lifecycle implementation shared by every device.
pub struct ManagedDevice<D: DeviceDriver> {
    identity: DeviceIdentity,
    endpoint: String,
    address: Option<DeviceAddress>,
    connection: Arc<Mutex<AnyConnection>>,
    connection_status: Arc<StatusCell<ConnectionStatus>>,
    retry: RetryPolicy,
    status: Arc<StatusCell<DeviceStatus>>,
    initialized: AtomicBool,
    disposed: AtomicBool,
    lifecycle: Mutex<()>,
    background: StdMutex<Option<BackgroundTask>>,
    driver: Arc<D>,
}

impl<D: DeviceDriver> fmt::Debug for ManagedDevice<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedDevice")
            .field("id", &self.identity.id)
            .field("endpoint", &self.endpoint)
            .field("status", &self.status.get())
            .field("connection", &self.connection_status.get())
            .finish_non_exhaustive()
    }
}

impl<D: DeviceDriver> ManagedDevice<D> {
    /// Compose a device from its parts.
    ///
    /// The connection may already be open (the manager hands devices an open
    /// connection) or closed; [`Device::connect`] handles both.
    pub fn new(identity: DeviceIdentity, connection: AnyConnection, retry: RetryPolicy, driver: D) -> Self {
        let endpoint = connection.info();
        let connection_status = connection.status_cell();
        let status = StatusCell::new(DeviceStatus::NotInitialized, format!("device {}", identity.id));

        Self {
            identity,
            endpoint,
            address: None,
            connection: Arc::new(Mutex::new(connection)),
            connection_status,
            retry,
            status: Arc::new(status),
            initialized: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            background: StdMutex::new(None),
            driver: Arc::new(driver),
        }
    }

    /// Address to open when the connection has never been opened.
    pub fn with_address(mut self, address: DeviceAddress) -> Self {
        self.endpoint = address.to_string();
        self.address = Some(address);
        self
    }

    /// The vendor driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Shared handle to the driver, for background tasks.
    pub fn driver_handle(&self) -> Arc<D> {
        Arc::clone(&self.driver)
    }

    /// Shared handle to the connection, for background tasks.
    pub fn connection_handle(&self) -> Arc<Mutex<AnyConnection>> {
        Arc::clone(&self.connection)
    }

    /// Shared status cell, for background tasks.
    pub fn status_cell(&self) -> Arc<StatusCell<DeviceStatus>> {
        Arc::clone(&self.status)
    }

    /// Retry policy used for opens and info queries.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Whether `dispose` has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Fail with [`Error::Disposed`] after disposal.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::disposed(format!("device {}", self.identity.id)));
        }
        Ok(())
    }

    /// Move `Ready -> Busy` for `operation`.
    ///
    /// # Errors
    ///
    /// A [`DeviceFaultKind::Busy`] fault when another request is running, a
    /// [`DeviceFaultKind::NotReady`] fault in any other non-ready state.
    pub fn begin_busy(&self, operation: &str) -> Result<()> {
        self.ensure_live()?;
        self.status
            .compare_and_transition(
                DeviceStatus::Ready,
                DeviceStatus::Busy,
                Some(operation.to_string()),
                None,
            )
            .map_err(|actual| {
                let kind = if actual == DeviceStatus::Busy {
                    DeviceFaultKind::Busy
                } else {
                    DeviceFaultKind::NotReady
                };
                Error::device(kind, self.identity.id.clone(), format!("cannot {operation} while {actual}"))
            })
    }

    /// Move `Busy -> Ready` if still busy.
    pub fn end_busy(&self, message: &str) {
        let _ = self.status.compare_and_transition(
            DeviceStatus::Busy,
            DeviceStatus::Ready,
            Some(message.to_string()),
            None,
        );
    }

    /// Mark the device busy and take the connection for one request.
    ///
    /// The returned scope moves the device back to `Ready` when completed or
    /// dropped, or to `Error` when completed with a transport fault.
    pub async fn busy(&self, operation: &str, cancel: &CancellationToken) -> Result<BusyScope<'_>> {
        self.begin_busy(operation)?;

        let connection = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.end_busy("cancelled");
                return Err(Error::Cancelled);
            }
            guard = self.connection.lock() => guard,
        };

        Ok(BusyScope {
            operation: operation.to_string(),
            connection,
            status: &self.status,
            done: false,
        })
    }

    /// Run `task` in the background, bound to a fresh cancellation token.
    ///
    /// # Errors
    ///
    /// A [`DeviceFaultKind::Busy`] fault when a background task is already running.
    pub fn spawn_background<F, Fut>(&self, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.background.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            return Err(Error::device(
                DeviceFaultKind::Busy,
                self.identity.id.clone(),
                "background task already running",
            ));
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(task(token.clone()));
        *slot = Some(BackgroundTask { token, handle });
        Ok(())
    }

    /// Whether a background task is running.
    pub fn is_background_running(&self) -> bool {
        self.background
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Cancel the background task and wait until it has exited.
    ///
    /// Returns whether a task was present.
    pub async fn stop_background(&self) -> bool {
        let task = self.background.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(task) = task else {
            return false;
        };

        task.token.cancel();
        if let Err(e) = task.handle.await
            && e.is_panic()
        {
            warn!(device_id = %self.identity.id, "Background task panicked");
        }
        debug!(device_id = %self.identity.id, "Background task stopped");
        true
    }

    fn target_address(&self, connection: &AnyConnection) -> Result<DeviceAddress> {
        self.address
            .clone()
            .or_else(|| connection.address().cloned())
            .ok_or_else(|| {
                Error::configuration(format!("Device {} has no address to connect to", self.identity.id))
            })
    }

    async fn open_connection(&self, cancel: &CancellationToken) -> Result<()> {
        let address = {
            let connection = self.connection.lock().await;
            self.target_address(&connection)?
        };

        info!(device_id = %self.identity.id, endpoint = %address, "Opening connection");

        let connection = &self.connection;
        let target = &address;
        let result = self
            .retry
            .execute(
                move |attempt| async move {
                    debug!(attempt, endpoint = %target, "Open attempt");
                    connection.lock().await.open(target, cancel).await
                },
                cancel,
            )
            .await;

        if let Err(error) = &result {
            if error.is_cancelled() {
                self.status
                    .settle(DeviceStatus::Disconnected, Some("Connect cancelled".to_string()), None);
            } else {
                warn!(device_id = %self.identity.id, error = %error, "Connect failed");
                self.status
                    .settle(DeviceStatus::Error, Some("Connect failed".to_string()), Some(error));
            }
        }
        result
    }

    async fn run_initialize(&self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_live()?;
        self.status
            .transition(DeviceStatus::Initializing, Some("Initializing".to_string()))?;

        info!(device_id = %self.identity.id, "Initializing device");

        let result = {
            let mut connection = self.connection.lock().await;
            self.driver.setup(&mut connection, cancel).await
        };

        match result {
            Ok(()) => {
                self.initialized.store(true, Ordering::Release);
                self.status
                    .settle(DeviceStatus::Ready, Some("Initialized".to_string()), None);
                Ok(())
            }
            Err(error) => {
                warn!(device_id = %self.identity.id, error = %error, "Initialization failed");
                self.status.settle(
                    DeviceStatus::Error,
                    Some("Initialization failed".to_string()),
                    Some(&error),
                );
                Err(error)
            }
        }
    }
}

#[async_trait]
impl<D: DeviceDriver> Device for ManagedDevice<D> {
    fn id(&self) -> &str {
        &self.identity.id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    fn device_type(&self) -> DeviceType {
        self.identity.device_type.clone()
    }

    fn status(&self) -> DeviceStatus {
        self.status.get()
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceStatusChange> {
        self.status.subscribe()
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.connection_status.get()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn initialize(&self, cancel: &CancellationToken) -> bool {
        let _guard = self.lifecycle.lock().await;
        match self.run_initialize(cancel).await {
            Ok(()) => true,
            Err(error) => {
                debug!(device_id = %self.identity.id, error = %error, "Initialize returned false");
                false
            }
        }
    }

    async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_live()?;

        let connected = self.connection_status.get().is_connected();
        if connected && self.status.get().is_operational() {
            debug!(device_id = %self.identity.id, "Already connected");
            return Ok(());
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if !connected {
            self.open_connection(cancel).await?;
        }

        if self.initialized.load(Ordering::Acquire) {
            self.status
                .transition(DeviceStatus::Ready, Some("Connected".to_string()))?;
            Ok(())
        } else {
            self.run_initialize(cancel).await
        }
    }

    async fn disconnect(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_disposed() {
            return Ok(());
        }

        self.stop_background().await;
        self.status
            .settle(DeviceStatus::Disconnected, Some("Disconnected".to_string()), None);

        if self.connection_status.get() == ConnectionStatus::Disconnected {
            return Ok(());
        }

        info!(device_id = %self.identity.id, "Closing connection");
        let result = self.connection.lock().await.close(cancel).await;
        if let Err(error) = &result {
            warn!(device_id = %self.identity.id, error = %error, "Disconnect failed");
            self.status
                .settle(DeviceStatus::Error, Some("Disconnect failed".to_string()), Some(error));
        }
        result
    }

    async fn reset(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_live()?;

        if self.stop_background().await {
            self.end_busy("Background task stopped for reset");
        }

        info!(device_id = %self.identity.id, "Resetting device");
        let teardown = {
            let mut connection = self.connection.lock().await;
            self.driver.teardown(&mut connection, cancel).await
        };
        if let Err(error) = teardown {
            self.status
                .settle(DeviceStatus::Error, Some("Reset failed".to_string()), Some(&error));
            return Err(error);
        }

        self.initialized.store(false, Ordering::Release);
        self.run_initialize(cancel).await
    }

    async fn get_info(&self, cancel: &CancellationToken) -> Result<DeviceInfo> {
        self.ensure_live()?;

        let status = self.status.get();
        if !status.is_operational() {
            return Err(Error::invalid_state(
                format!("device {}", self.identity.id),
                "get_info",
                status,
            ));
        }

        let connection = &self.connection;
        let driver = &self.driver;
        self.retry
            .execute(
                move |_| async move {
                    let mut connection = connection.lock().await;
                    driver.query_info(&mut connection, cancel).await
                },
                cancel,
            )
            .await
    }

    async fn dispose(&self) {
        let _guard = self.lifecycle.lock().await;
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.stop_background().await;
        self.status
            .settle(DeviceStatus::Disconnected, Some("Disposed".to_string()), None);

        if let Err(error) = self.connection.lock().await.dispose().await {
            warn!(device_id = %self.identity.id, error = %error, "Error disposing connection");
            self.status
                .settle(DeviceStatus::Error, Some("Dispose failed".to_string()), Some(&error));
        }
        info!(device_id = %self.identity.id, "Device disposed");
    }
}

impl<D: DeviceDriver> Drop for ManagedDevice<D> {
    fn drop(&mut self) {
        if let Some(task) = self.background.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            task.token.cancel();
        }
        if !self.is_disposed() && self.connection_status.get().is_connected() {
            debug!(
                device_id = %self.identity.id,
                "Device dropped without dispose - connection closes with it"
            );
        }
    }
}

/// Exclusive access to the connection for one request while the device is `Busy`.
pub struct BusyScope<'a> {
    operation: String,
    connection: MutexGuard<'a, AnyConnection>,
    status: &'a StatusCell<DeviceStatus>,
    done: bool,
}

impl fmt::Debug for BusyScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusyScope")
            .field("operation", &self.operation)
            .field("endpoint", &self.connection.info())
            .field("done", &self.done)
            .finish()
    }
}

impl BusyScope<'_> {
    /// The owned connection.
    pub fn connection(&mut self) -> &mut AnyConnection {
        &mut self.connection
    }

    /// Finish the request and return its result.
    ///
    /// Transport faults move the device to `Error`; any other outcome returns
    /// it to `Ready`.
    pub fn complete<T>(mut self, result: Result<T>) -> Result<T> {
        self.done = true;
        match &result {
            Err(error) if matches!(error.root(), Error::Connection { .. }) => {
                let _ = self.status.compare_and_transition(
                    DeviceStatus::Busy,
                    DeviceStatus::Error,
                    Some(format!("{} failed", self.operation)),
                    Some(error),
                );
            }
            _ => {
                let _ = self.status.compare_and_transition(
                    DeviceStatus::Busy,
                    DeviceStatus::Ready,
                    None,
                    None,
                );
            }
        }
        result
    }
}

impl Drop for BusyScope<'_> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.status.compare_and_transition(
                DeviceStatus::Busy,
                DeviceStatus::Ready,
                Some(format!("{} abandoned", self.operation)),
                None,
            );
        }
    }
}

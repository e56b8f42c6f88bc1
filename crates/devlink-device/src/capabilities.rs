//! Capability drivers and their [`ManagedDevice`] implementations.
//!
//! A vendor driver implements [`DeviceDriver`] plus one of the capability
//! driver traits below; `ManagedDevice<Driver>` then implements the matching
//! capability trait with status bracketing, cancellation and fault handling
//! already in place.

use crate::boundary::{CommandEncoder, PlatformBackend};
use crate::managed::{DeviceDriver, ManagedDevice};
use crate::status::DeviceStatus;
use crate::traits::{Camera, Device, Frame, Gate, GateState, Printer, Scanner};
use async_trait::async_trait;
use bytes::Bytes;
use devlink_core::{CancellationToken, ConnectionFaultKind, Error, Result, StatusCell};
use devlink_transport::{AnyConnection, Connection};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Default number of frames buffered between the stream loop and the consumer.
pub const DEFAULT_STREAM_CAPACITY: usize = 16;

/// Write all of `data`, looping over partial writes.
pub async fn send_all(connection: &mut AnyConnection, data: &[u8], cancel: &CancellationToken) -> Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let written = connection.send(&data[offset..], cancel).await?;
        if written == 0 {
            return Err(Error::connection(
                ConnectionFaultKind::Closed,
                connection.info(),
                "peer accepted no bytes",
            ));
        }
        offset += written;
    }
    Ok(())
}

/// Camera driver.
#[async_trait]
pub trait CameraDriver: DeviceDriver {
    /// Capture one frame.
    async fn capture(&self, connection: &mut AnyConnection, cancel: &CancellationToken) -> Result<Frame>;

    /// Pause between streamed frames.
    fn frame_interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Frames buffered for a slow consumer before the loop waits.
    fn stream_capacity(&self) -> usize {
        DEFAULT_STREAM_CAPACITY
    }
}

/// Printer driver: the vendor encoder is all it takes.
pub trait PrinterDriver: DeviceDriver {
    fn encoder(&self) -> &dyn CommandEncoder;
}

/// Scanner driver.
#[async_trait]
pub trait ScannerDriver: DeviceDriver {
    /// Platform service performing the scan.
    fn backend(&self) -> &dyn PlatformBackend;

    /// Acquire one document.
    async fn acquire(&self, connection: &mut AnyConnection, cancel: &CancellationToken) -> Result<Bytes>;
}

/// Gate driver.
#[async_trait]
pub trait GateDriver: DeviceDriver {
    /// Command the gate to `target`.
    async fn drive(
        &self,
        connection: &mut AnyConnection,
        target: GateState,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Last position successfully commanded.
    fn position(&self) -> GateState;
}

#[async_trait]
impl<D: CameraDriver> Camera for ManagedDevice<D> {
    async fn capture_frame(&self, cancel: &CancellationToken) -> Result<Frame> {
        let mut scope = self.busy("capture frame", cancel).await?;
        let result = self.driver().capture(scope.connection(), cancel).await;
        scope.complete(result)
    }

    async fn start_stream(&self, cancel: &CancellationToken) -> Result<mpsc::Receiver<Frame>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.begin_busy("stream")?;

        let (frames, receiver) = mpsc::channel(self.driver().stream_capacity().max(1));
        let device_id = self.id().to_string();
        let driver = self.driver_handle();
        let connection = self.connection_handle();
        let status = self.status_cell();

        let spawned = self.spawn_background(move |token| {
            stream_loop(device_id, driver, connection, status, frames, token)
        });
        if let Err(error) = spawned {
            self.end_busy("stream not started");
            return Err(error);
        }

        debug!(device_id = %self.id(), "Streaming started");
        Ok(receiver)
    }

    async fn stop_stream(&self, _cancel: &CancellationToken) -> Result<()> {
        // A loop that already exited has settled the status itself.
        let running = self.is_background_running();
        if self.stop_background().await && running {
            self.end_busy("Stream stopped");
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.is_background_running()
    }
}

async fn stream_loop<D: CameraDriver>(
    device_id: String,
    driver: Arc<D>,
    connection: Arc<Mutex<AnyConnection>>,
    status: Arc<StatusCell<DeviceStatus>>,
    frames: mpsc::Sender<Frame>,
    token: CancellationToken,
) {
    let interval = driver.frame_interval();

    loop {
        let captured = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = async {
                let mut connection = connection.lock().await;
                driver.capture(&mut connection, &token).await
            } => result,
        };

        let frame = match captured {
            Ok(frame) => frame,
            Err(error) if error.is_cancelled() => break,
            Err(error) => {
                warn!(device_id = %device_id, error = %error, "Stream capture failed");
                let _ = status.compare_and_transition(
                    DeviceStatus::Busy,
                    DeviceStatus::Error,
                    Some("Stream failed".to_string()),
                    Some(&error),
                );
                break;
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = frames.send(frame) => {
                if sent.is_err() {
                    debug!(device_id = %device_id, "Frame receiver dropped");
                    break;
                }
            }
        }

        if !interval.is_zero() {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    // Without a stop request nobody else will release the device.
    if !token.is_cancelled() {
        let _ = status.compare_and_transition(
            DeviceStatus::Busy,
            DeviceStatus::Ready,
            Some("Stream ended".to_string()),
            None,
        );
    }

    debug!(device_id = %device_id, "Stream loop exited");
}

#[async_trait]
impl<D: PrinterDriver> Printer for ManagedDevice<D> {
    async fn print_text(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        let data = self.driver().encoder().build_text(text);
        let mut scope = self.busy("print text", cancel).await?;
        let result = send_all(scope.connection(), &data, cancel).await;
        scope.complete(result)
    }

    async fn print_raw(&self, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        let data = self.driver().encoder().build_raw(data);
        let mut scope = self.busy("print raw", cancel).await?;
        let result = send_all(scope.connection(), &data, cancel).await;
        scope.complete(result)
    }

    async fn cut(&self, cancel: &CancellationToken) -> Result<()> {
        let data = self.driver().encoder().build_cut();
        let mut scope = self.busy("cut", cancel).await?;
        let result = send_all(scope.connection(), &data, cancel).await;
        scope.complete(result)
    }
}

#[async_trait]
impl<D: ScannerDriver> Scanner for ManagedDevice<D> {
    async fn list_sources(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.ensure_live()?;
        let status = self.status();
        if !status.is_operational() {
            return Err(Error::invalid_state(
                format!("device {}", self.id()),
                "list_sources",
                status,
            ));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            sources = self.driver().backend().list_available() => sources,
        }
    }

    async fn scan(&self, cancel: &CancellationToken) -> Result<Bytes> {
        let mut scope = self.busy("scan", cancel).await?;
        let result = self.driver().acquire(scope.connection(), cancel).await;
        scope.complete(result)
    }
}

#[async_trait]
impl<D: GateDriver> Gate for ManagedDevice<D> {
    async fn open_gate(&self, cancel: &CancellationToken) -> Result<()> {
        let mut scope = self.busy("open gate", cancel).await?;
        let result = self
            .driver()
            .drive(scope.connection(), GateState::Open, cancel)
            .await;
        scope.complete(result)
    }

    async fn close_gate(&self, cancel: &CancellationToken) -> Result<()> {
        let mut scope = self.busy("close gate", cancel).await?;
        let result = self
            .driver()
            .drive(scope.connection(), GateState::Closed, cancel)
            .await;
        scope.complete(result)
    }

    fn gate_state(&self) -> GateState {
        self.driver().position()
    }
}

//! Device and capability trait definitions.
//!
//! [`Device`] is the lifecycle contract every device implements. Capability
//! traits ([`Camera`], [`Printer`], [`Scanner`], [`Gate`]) extend it with the
//! operations a device class supports.
//!
//! These traits cross the plugin boundary as trait objects (`Arc<dyn Camera>`),
//! so they use `#[async_trait]` to stay object-safe. Every operation takes a
//! cancellation token and honors it at I/O boundaries.

use crate::status::{DeviceStatus, DeviceStatusChange};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use devlink_core::{CancellationToken, DeviceInfo, DeviceType, Result};
use devlink_transport::ConnectionStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{broadcast, mpsc};

/// Lifecycle contract for one physical unit built on one connection.
#[async_trait]
pub trait Device: Send + Sync {
    /// Stable identifier, used in errors and logs.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Coarse device partition.
    fn device_type(&self) -> DeviceType;

    /// Current lifecycle status.
    fn status(&self) -> DeviceStatus;

    /// Subscribe to lifecycle transitions. Drop the receiver to unsubscribe.
    fn subscribe(&self) -> broadcast::Receiver<DeviceStatusChange>;

    /// Status of the owned connection.
    fn connection_status(&self) -> ConnectionStatus;

    /// Endpoint descriptor of the owned connection.
    fn endpoint(&self) -> &str;

    /// Run device-specific setup.
    ///
    /// Moves to `Ready` on success and to `Error` on failure. Never returns an
    /// error; the outcome is the returned flag and the published status.
    async fn initialize(&self, cancel: &CancellationToken) -> bool;

    /// Open the connection if needed and bring the device to `Ready`.
    ///
    /// A no-op for the connection when it is already `Connected`. Initializes
    /// the device the first time; later calls go straight to `Ready`.
    async fn connect(&self, cancel: &CancellationToken) -> Result<()>;

    /// Move to `Disconnected` and close the connection. Idempotent.
    async fn disconnect(&self, cancel: &CancellationToken) -> Result<()>;

    /// Device-specific teardown followed by [`Device::initialize`].
    async fn reset(&self, cancel: &CancellationToken) -> Result<()>;

    /// Query device metadata. Only valid in `Ready` or `Busy`.
    async fn get_info(&self, cancel: &CancellationToken) -> Result<DeviceInfo>;

    /// Disconnect and release the connection for good. Idempotent.
    ///
    /// Failures are logged and reflected in the status, never returned.
    async fn dispose(&self);
}

macro_rules! impl_debug_for_dyn {
    ($($capability:ident),+) => {$(
        impl fmt::Debug for dyn $capability {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($capability))
                    .field("id", &self.id())
                    .field("type", &self.device_type())
                    .field("status", &self.status())
                    .finish()
            }
        }
    )+};
}

impl_debug_for_dyn!(Device, Camera, Printer, Scanner, Gate);

/// A captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Per-device sequence number, starting at 1.
    pub sequence: u64,

    /// Raw frame payload as delivered by the device.
    pub data: Bytes,

    /// When the frame was received.
    pub captured_at: DateTime<Utc>,
}

/// Camera capability.
#[async_trait]
pub trait Camera: Device {
    /// Capture a single frame.
    async fn capture_frame(&self, cancel: &CancellationToken) -> Result<Frame>;

    /// Start a background streaming loop delivering frames on the returned
    /// channel. The device stays `Busy` until [`Camera::stop_stream`].
    async fn start_stream(&self, cancel: &CancellationToken) -> Result<mpsc::Receiver<Frame>>;

    /// Stop the streaming loop and wait for it to exit. No-op when not streaming.
    async fn stop_stream(&self, cancel: &CancellationToken) -> Result<()>;

    /// Whether a streaming loop is running.
    fn is_streaming(&self) -> bool;
}

/// Printer capability.
#[async_trait]
pub trait Printer: Device {
    /// Print a line of text.
    async fn print_text(&self, text: &str, cancel: &CancellationToken) -> Result<()>;

    /// Send pre-encoded bytes.
    async fn print_raw(&self, data: &[u8], cancel: &CancellationToken) -> Result<()>;

    /// Cut the paper.
    async fn cut(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Scanner capability.
#[async_trait]
pub trait Scanner: Device {
    /// Sources the scanner backend can read from.
    async fn list_sources(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Acquire one document.
    async fn scan(&self, cancel: &CancellationToken) -> Result<Bytes>;
}

/// Position of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateState {
    /// Passage allowed.
    Open,
    /// Passage blocked.
    Closed,
    /// Not yet driven since connect.
    Unknown,
}

/// Gate (barrier, turnstile, door relay) capability.
#[async_trait]
pub trait Gate: Device {
    /// Open the gate.
    async fn open_gate(&self, cancel: &CancellationToken) -> Result<()>;

    /// Close the gate.
    async fn close_gate(&self, cancel: &CancellationToken) -> Result<()>;

    /// Last commanded position.
    fn gate_state(&self) -> GateState;
}

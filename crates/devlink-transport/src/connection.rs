//! Connection trait and enum dispatch over the built-in transports.
//!
//! Transports use native `async fn` in traits, which are not object-safe, so
//! the framework dispatches over them through [`AnyConnection`] instead of
//! `Box<dyn Connection>`. A device owns exactly one `AnyConnection` for its
//! whole lifetime.

#![allow(async_fn_in_trait)]

use crate::embedded::EmbeddedConnection;
use crate::mock::MockConnection;
use crate::status::{ConnectionStatus, ConnectionStatusChange};
use crate::tcp::TcpConnection;
use bytes::Bytes;
use devlink_core::{CancellationToken, DeviceAddress, Error, Result, StatusCell};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[cfg(feature = "serial")]
use crate::serial::SerialConnection;
#[cfg(feature = "usb")]
use crate::usb::UsbConnection;

/// Bookkeeping every transport shares: status, target address, disposal.
///
/// Transports embed one `ChannelState` and route every status change through
/// it, so the state machine rules live in a single place.
#[derive(Debug)]
pub struct ChannelState {
    scheme: &'static str,
    status: Arc<StatusCell<ConnectionStatus>>,
    address: Option<DeviceAddress>,
    disposed: bool,
}

impl ChannelState {
    /// Create the state for a transport of the given scheme.
    pub fn new(scheme: &'static str) -> Self {
        Self {
            scheme,
            status: Arc::new(StatusCell::new(
                ConnectionStatus::Disconnected,
                format!("{scheme} connection"),
            )),
            address: None,
            disposed: false,
        }
    }

    /// Transport scheme.
    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    /// Address of the last open, if any.
    pub fn address(&self) -> Option<&DeviceAddress> {
        self.address.as_ref()
    }

    /// Human-readable endpoint descriptor.
    pub fn info(&self) -> String {
        match &self.address {
            Some(address) => address.to_string(),
            None => format!("{}://(not opened)", self.scheme),
        }
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Shared status cell.
    pub fn status_cell(&self) -> &Arc<StatusCell<ConnectionStatus>> {
        &self.status
    }

    /// Whether `dispose` has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Fail with [`Error::Disposed`] after disposal.
    pub fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::disposed(format!("connection {}", self.info())));
        }
        Ok(())
    }

    /// Fail unless the channel is live and `Connected`.
    pub fn ensure_connected(&self, operation: &str) -> Result<()> {
        self.ensure_live()?;
        let status = self.status();
        if !status.is_connected() {
            return Err(Error::invalid_state(
                format!("connection {}", self.info()),
                operation,
                status,
            ));
        }
        Ok(())
    }

    /// Start an open attempt.
    ///
    /// Returns `Ok(false)` when the channel is already connected to the same
    /// address and nothing needs to happen.
    pub fn begin_open(&mut self, address: &DeviceAddress) -> Result<bool> {
        self.ensure_live()?;

        if address.scheme != self.scheme {
            return Err(Error::configuration(format!(
                "{} connection cannot open {address}",
                self.scheme
            )));
        }

        match self.status() {
            ConnectionStatus::Connected if self.address.as_ref() == Some(address) => {
                debug!(endpoint = %address, "Already connected");
                return Ok(false);
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {}
            other => {
                return Err(Error::invalid_state(
                    format!("connection {}", self.info()),
                    "open",
                    other,
                ));
            }
        }

        self.address = Some(address.clone());
        self.status
            .transition(ConnectionStatus::Connecting, Some(format!("Opening {address}")))?;
        Ok(true)
    }

    /// Record a successful open.
    pub fn open_succeeded(&self) {
        self.status
            .settle(ConnectionStatus::Connected, Some(format!("Connected to {}", self.info())), None);
    }

    /// Record a failed open. Cancellation returns to `Disconnected`, any other
    /// failure moves to `Error`.
    pub fn open_failed(&self, error: &Error) {
        if error.is_cancelled() {
            self.status.settle(
                ConnectionStatus::Disconnected,
                Some("Open cancelled".to_string()),
                None,
            );
        } else {
            warn!(endpoint = %self.info(), error = %error, "Open failed");
            self.status
                .settle(ConnectionStatus::Error, Some("Open failed".to_string()), Some(error));
        }
    }

    /// Record a transport fault on an open channel.
    pub fn fault(&self, error: &Error) {
        if error.is_cancelled() {
            return;
        }
        warn!(endpoint = %self.info(), error = %error, "Transport fault");
        self.status
            .settle(ConnectionStatus::Error, Some("Transport fault".to_string()), Some(error));
    }

    /// Start closing. Returns `Ok(false)` when already disconnected.
    pub fn begin_close(&self) -> Result<bool> {
        self.ensure_live()?;
        if self.status() == ConnectionStatus::Disconnected {
            return Ok(false);
        }
        self.status
            .settle(ConnectionStatus::Disconnecting, Some("Closing".to_string()), None);
        Ok(true)
    }

    /// Record that the channel is closed.
    pub fn close_finished(&self) {
        self.status
            .settle(ConnectionStatus::Disconnected, Some("Closed".to_string()), None);
    }

    /// Mark the channel disposed.
    pub fn mark_disposed(&mut self) {
        self.disposed = true;
    }
}

/// A physical or logical channel to one device.
///
/// All asynchronous operations accept a cancellation token and honor it at
/// their I/O boundaries. Read/write timeouts are transport configuration and
/// surface as [`ConnectionFaultKind::Timeout`] faults, never as
/// [`Error::Cancelled`].
///
/// [`ConnectionFaultKind::Timeout`]: devlink_core::ConnectionFaultKind::Timeout
pub trait Connection: Send + Sync {
    /// Shared bookkeeping.
    fn channel(&self) -> &ChannelState;

    /// Transport scheme.
    fn scheme(&self) -> &'static str {
        self.channel().scheme()
    }

    /// Human-readable endpoint descriptor.
    fn info(&self) -> String {
        self.channel().info()
    }

    /// Address of the last open, if any.
    fn address(&self) -> Option<&DeviceAddress> {
        self.channel().address()
    }

    /// Current status.
    fn status(&self) -> ConnectionStatus {
        self.channel().status()
    }

    /// Shared status cell, readable without access to the connection itself.
    fn status_cell(&self) -> Arc<StatusCell<ConnectionStatus>> {
        Arc::clone(self.channel().status_cell())
    }

    /// Subscribe to status changes.
    fn subscribe(&self) -> broadcast::Receiver<ConnectionStatusChange> {
        self.channel().status_cell().subscribe()
    }

    /// Whether the connection has been disposed.
    fn is_disposed(&self) -> bool {
        self.channel().is_disposed()
    }

    /// Open the channel to `address`.
    async fn open(&mut self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<()>;

    /// Close the channel. Closing a disconnected channel is a no-op.
    async fn close(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Write `data`, returning the number of bytes written.
    async fn send(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<usize>;

    /// Read at most `max_bytes`.
    async fn receive(&mut self, max_bytes: usize, cancel: &CancellationToken) -> Result<Bytes>;

    /// Check whether the peer is still reachable.
    async fn ping(&mut self, cancel: &CancellationToken) -> Result<bool>;

    /// Close if needed and release the transport for good.
    async fn dispose(&mut self) -> Result<()>;
}

/// Enum wrapper for connection dispatch.
///
/// Transport factories produce one of these; the variant set follows the
/// enabled cargo features.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyConnection {
    /// TCP socket.
    Tcp(TcpConnection),
    /// Serial port.
    #[cfg(feature = "serial")]
    Serial(SerialConnection),
    /// USB bulk endpoints.
    #[cfg(feature = "usb")]
    Usb(UsbConnection),
    /// No byte channel.
    Embedded(EmbeddedConnection),
    /// Scripted in-memory channel for development and testing.
    Mock(MockConnection),
}

macro_rules! dispatch {
    ($self:expr, $conn:ident => $body:expr) => {
        match $self {
            AnyConnection::Tcp($conn) => $body,
            #[cfg(feature = "serial")]
            AnyConnection::Serial($conn) => $body,
            #[cfg(feature = "usb")]
            AnyConnection::Usb($conn) => $body,
            AnyConnection::Embedded($conn) => $body,
            AnyConnection::Mock($conn) => $body,
        }
    };
}

impl Connection for AnyConnection {
    fn channel(&self) -> &ChannelState {
        dispatch!(self, conn => conn.channel())
    }

    async fn open(&mut self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<()> {
        dispatch!(self, conn => conn.open(address, cancel).await)
    }

    async fn close(&mut self, cancel: &CancellationToken) -> Result<()> {
        dispatch!(self, conn => conn.close(cancel).await)
    }

    async fn send(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<usize> {
        dispatch!(self, conn => conn.send(data, cancel).await)
    }

    async fn receive(&mut self, max_bytes: usize, cancel: &CancellationToken) -> Result<Bytes> {
        dispatch!(self, conn => conn.receive(max_bytes, cancel).await)
    }

    async fn ping(&mut self, cancel: &CancellationToken) -> Result<bool> {
        dispatch!(self, conn => conn.ping(cancel).await)
    }

    async fn dispose(&mut self) -> Result<()> {
        dispatch!(self, conn => conn.dispose().await)
    }
}

impl From<TcpConnection> for AnyConnection {
    fn from(connection: TcpConnection) -> Self {
        Self::Tcp(connection)
    }
}

#[cfg(feature = "serial")]
impl From<SerialConnection> for AnyConnection {
    fn from(connection: SerialConnection) -> Self {
        Self::Serial(connection)
    }
}

#[cfg(feature = "usb")]
impl From<UsbConnection> for AnyConnection {
    fn from(connection: UsbConnection) -> Self {
        Self::Usb(connection)
    }
}

impl From<EmbeddedConnection> for AnyConnection {
    fn from(connection: EmbeddedConnection) -> Self {
        Self::Embedded(connection)
    }
}

impl From<MockConnection> for AnyConnection {
    fn from(connection: MockConnection) -> Self {
        Self::Mock(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_core::constants::SCHEME_TCP;

    #[test]
    fn test_channel_state_initial() {
        let state = ChannelState::new(SCHEME_TCP);
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert_eq!(state.info(), "tcp://(not opened)");
        assert!(state.address().is_none());
        assert!(!state.is_disposed());
    }

    #[test]
    fn test_begin_open_rejects_other_scheme() {
        let mut state = ChannelState::new(SCHEME_TCP);
        let error = state
            .begin_open(&DeviceAddress::embedded("printer"))
            .unwrap_err();
        assert!(matches!(error, Error::Configuration { .. }));
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_open_lifecycle() {
        let mut state = ChannelState::new(SCHEME_TCP);
        let address = DeviceAddress::tcp("10.0.0.5", 9000);

        assert!(state.begin_open(&address).unwrap());
        assert_eq!(state.status(), ConnectionStatus::Connecting);
        state.open_succeeded();
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(state.info(), "tcp://10.0.0.5:9000");

        // Re-opening the same address is a no-op.
        assert!(!state.begin_open(&address).unwrap());

        assert!(state.begin_close().unwrap());
        state.close_finished();
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert!(!state.begin_close().unwrap());
    }

    #[test]
    fn test_cancelled_open_returns_to_disconnected() {
        let mut state = ChannelState::new(SCHEME_TCP);
        state.begin_open(&DeviceAddress::tcp("h", 1)).unwrap();
        state.open_failed(&Error::Cancelled);
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_failed_open_moves_to_error() {
        let mut state = ChannelState::new(SCHEME_TCP);
        state.begin_open(&DeviceAddress::tcp("h", 1)).unwrap();
        state.open_failed(&Error::connection_timeout("tcp://h:1", 10));
        assert_eq!(state.status(), ConnectionStatus::Error);

        // Error allows another attempt.
        assert!(state.begin_open(&DeviceAddress::tcp("h", 1)).unwrap());
    }

    #[test]
    fn test_ensure_connected_errors() {
        let mut state = ChannelState::new(SCHEME_TCP);
        assert!(matches!(
            state.ensure_connected("send"),
            Err(Error::InvalidState { .. })
        ));

        state.mark_disposed();
        assert!(matches!(
            state.ensure_connected("send"),
            Err(Error::Disposed { .. })
        ));
    }
}

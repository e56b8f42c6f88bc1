//! Scripted in-memory transport for development and testing.
//!
//! A [`MockConnection`] behaves like a real byte channel but is driven from a
//! [`MockConnectionHandle`]: tests queue inbound data, script open failures,
//! delay opens to exercise cancellation, and inspect every call the framework
//! made.
//!
//! # Example
//!
//! ```
//! use devlink_core::{CancellationToken, DeviceAddress};
//! use devlink_transport::{Connection, MockConnection};
//!
//! # #[tokio::main]
//! # async fn main() -> devlink_core::Result<()> {
//! let (mut connection, handle) = MockConnection::new();
//! let cancel = CancellationToken::new();
//!
//! handle.push_inbound(&b"OK"[..]);
//! let address: DeviceAddress = "mock://printer".parse()?;
//! connection.open(&address, &cancel).await?;
//! connection.send(b"status?", &cancel).await?;
//!
//! assert_eq!(&connection.receive(16, &cancel).await?[..], b"OK");
//! assert_eq!(handle.sent(), vec![b"status?".to_vec()]);
//! # Ok(())
//! # }
//! ```

use crate::connection::{ChannelState, Connection};
use crate::status::{ConnectionStatus, ConnectionStatusChange};
use bytes::Bytes;
use devlink_core::constants::{DEFAULT_IO_TIMEOUT_MS, SCHEME_MOCK};
use devlink_core::{
    CancellationToken, ConnectionFaultKind, DeviceAddress, Error, Result, StatusCell,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tracing::debug;

/// Produces a reply for each chunk the framework sends.
pub type MockResponder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// A call the framework made on a [`MockConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `open` with the target address.
    Open(String),
    /// `close`.
    Close,
    /// `send` with the payload length.
    Send(usize),
    /// `receive` with the requested maximum.
    Receive(usize),
    /// `ping`.
    Ping,
    /// `dispose`.
    Dispose,
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    open_failures: VecDeque<(ConnectionFaultKind, String)>,
    open_delay: Duration,
    inbound: VecDeque<Bytes>,
    sent: Vec<Vec<u8>>,
    responder: Option<MockResponder>,
    remote_closed: bool,
}

impl fmt::Debug for MockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockState")
            .field("calls", &self.calls.len())
            .field("pending_failures", &self.open_failures.len())
            .field("inbound", &self.inbound.len())
            .field("remote_closed", &self.remote_closed)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MockState>,
    inbound_ready: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-memory connection controlled through a [`MockConnectionHandle`].
#[derive(Debug)]
pub struct MockConnection {
    channel: ChannelState,
    shared: Arc<Shared>,
    io_timeout: Duration,
}

impl MockConnection {
    /// Create a mock connection and the handle that drives it.
    pub fn new() -> (Self, MockConnectionHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(MockState::default()),
            inbound_ready: Notify::new(),
        });
        let channel = ChannelState::new(SCHEME_MOCK);

        let handle = MockConnectionHandle {
            shared: Arc::clone(&shared),
            status: Arc::clone(channel.status_cell()),
        };

        let connection = Self {
            channel,
            shared,
            io_timeout: Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
        };

        (connection, handle)
    }

    fn record(&self, call: MockCall) {
        self.shared.lock().calls.push(call);
    }

    fn remote_closed_error(&self) -> Error {
        Error::connection(
            ConnectionFaultKind::Closed,
            self.channel.info(),
            "Remote end disconnected",
        )
    }

    async fn wait_for_open(&self, cancel: &CancellationToken) -> Result<()> {
        let delay = self.shared.lock().open_delay;
        if delay.is_zero() {
            return if cancel.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn next_inbound(&self, max_bytes: usize, cancel: &CancellationToken) -> Result<Bytes> {
        let deadline = tokio::time::Instant::now() + self.io_timeout;

        loop {
            {
                let mut state = self.shared.lock();
                if let Some(mut chunk) = state.inbound.pop_front() {
                    if chunk.len() > max_bytes {
                        let rest = chunk.split_off(max_bytes);
                        state.inbound.push_front(rest);
                    }
                    return Ok(chunk);
                }
                if state.remote_closed {
                    return Err(self.remote_closed_error());
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.shared.inbound_ready.notified() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(Error::connection_timeout(
                        self.channel.info(),
                        self.io_timeout.as_millis() as u64,
                    ));
                }
            }
        }
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new().0
    }
}

impl Connection for MockConnection {
    fn channel(&self) -> &ChannelState {
        &self.channel
    }

    async fn open(&mut self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<()> {
        self.record(MockCall::Open(address.to_string()));
        if let Some(ms) = address.option_parsed::<u64>("timeout_ms")? {
            self.io_timeout = Duration::from_millis(ms);
        }
        if !self.channel.begin_open(address)? {
            return Ok(());
        }

        let waited = self.wait_for_open(cancel).await;
        let failure = self.shared.lock().open_failures.pop_front();
        let result = waited.and_then(|()| match failure {
            Some((kind, message)) => Err(Error::connection(kind, address.to_string(), message)),
            None => Ok(()),
        });

        match result {
            Ok(()) => {
                self.shared.lock().remote_closed = false;
                self.channel.open_succeeded();
                Ok(())
            }
            Err(error) => {
                self.channel.open_failed(&error);
                Err(error)
            }
        }
    }

    async fn close(&mut self, _cancel: &CancellationToken) -> Result<()> {
        self.record(MockCall::Close);
        if self.channel.begin_close()? {
            self.channel.close_finished();
        }
        Ok(())
    }

    async fn send(&mut self, data: &[u8], _cancel: &CancellationToken) -> Result<usize> {
        self.channel.ensure_connected("send")?;

        let mut state = self.shared.lock();
        state.calls.push(MockCall::Send(data.len()));
        if state.remote_closed {
            drop(state);
            let error = self.remote_closed_error();
            self.channel.fault(&error);
            return Err(error);
        }

        state.sent.push(data.to_vec());
        let reply = state.responder.as_ref().and_then(|respond| respond(data));
        if let Some(reply) = reply {
            state.inbound.push_back(Bytes::from(reply));
            drop(state);
            self.shared.inbound_ready.notify_one();
        }
        Ok(data.len())
    }

    async fn receive(&mut self, max_bytes: usize, cancel: &CancellationToken) -> Result<Bytes> {
        self.channel.ensure_connected("receive")?;
        self.record(MockCall::Receive(max_bytes));
        if max_bytes == 0 {
            return Ok(Bytes::new());
        }

        let result = self.next_inbound(max_bytes, cancel).await;
        if let Err(error) = &result {
            self.channel.fault(error);
        }
        result
    }

    async fn ping(&mut self, _cancel: &CancellationToken) -> Result<bool> {
        self.record(MockCall::Ping);
        self.channel.ensure_live()?;
        Ok(self.channel.status().is_connected() && !self.shared.lock().remote_closed)
    }

    async fn dispose(&mut self) -> Result<()> {
        if self.channel.is_disposed() {
            return Ok(());
        }
        self.record(MockCall::Dispose);
        if self.channel.begin_close()? {
            self.channel.close_finished();
        }
        self.channel.mark_disposed();
        Ok(())
    }
}

/// Handle for scripting and inspecting a [`MockConnection`].
///
/// Cheap to clone; every clone drives the same connection.
#[derive(Debug, Clone)]
pub struct MockConnectionHandle {
    shared: Arc<Shared>,
    status: Arc<StatusCell<ConnectionStatus>>,
}

impl MockConnectionHandle {
    /// Make the next `open` fail with a connection fault of `kind`.
    ///
    /// Calls queue up: scripting two failures fails the next two opens.
    pub fn fail_next_open(&self, kind: ConnectionFaultKind, message: impl Into<String>) {
        self.shared
            .lock()
            .open_failures
            .push_back((kind, message.into()));
    }

    /// Delay every subsequent `open` by `delay` before it completes.
    pub fn set_open_delay(&self, delay: Duration) {
        self.shared.lock().open_delay = delay;
    }

    /// Queue data for the next `receive`.
    pub fn push_inbound(&self, data: impl Into<Bytes>) {
        self.shared.lock().inbound.push_back(data.into());
        self.shared.inbound_ready.notify_one();
    }

    /// Reply to every `send` with the closure's output.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.shared.lock().responder = Some(Arc::new(responder));
    }

    /// Simulate the peer dropping the channel.
    pub fn disconnect_remote(&self) {
        debug!("Mock remote end disconnected");
        self.shared.lock().remote_closed = true;
        self.shared.inbound_ready.notify_one();
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.shared.lock().calls.clone()
    }

    /// Number of `open` calls.
    pub fn open_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Open(_)))
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Close))
    }

    /// Whether `dispose` was called.
    pub fn was_disposed(&self) -> bool {
        self.count(|call| matches!(call, MockCall::Dispose)) > 0
    }

    /// Payloads written by the framework.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.shared.lock().sent.clone()
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Whether the connection is currently open.
    pub fn is_open(&self) -> bool {
        self.status().is_connected()
    }

    /// Subscribe to the connection's status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStatusChange> {
        self.status.subscribe()
    }

    fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.shared.lock().calls.iter().filter(|call| predicate(call)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> DeviceAddress {
        DeviceAddress::new(SCHEME_MOCK).with_host("device")
    }

    #[tokio::test]
    async fn test_open_and_close_recorded() {
        let (mut connection, handle) = MockConnection::new();
        let cancel = CancellationToken::new();

        connection.open(&address(), &cancel).await.unwrap();
        assert!(handle.is_open());

        connection.close(&cancel).await.unwrap();
        assert!(!handle.is_open());
        assert_eq!(
            handle.calls(),
            vec![MockCall::Open("mock://device".to_string()), MockCall::Close]
        );
    }

    #[tokio::test]
    async fn test_scripted_open_failure() {
        let (mut connection, handle) = MockConnection::new();
        let cancel = CancellationToken::new();
        handle.fail_next_open(ConnectionFaultKind::Refused, "no answer");

        let error = connection.open(&address(), &cancel).await.unwrap_err();
        assert!(error.is_transient());
        assert_eq!(handle.status(), ConnectionStatus::Error);

        connection.open(&address(), &cancel).await.unwrap();
        assert_eq!(handle.status(), ConnectionStatus::Connected);
        assert_eq!(handle.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_open_delay() {
        let (mut connection, handle) = MockConnection::new();
        let cancel = CancellationToken::new();
        handle.set_open_delay(Duration::from_secs(10));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let error = connection.open(&address(), &cancel).await.unwrap_err();
        assert!(error.is_cancelled());
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_receive_splits_chunks() {
        let (mut connection, handle) = MockConnection::new();
        let cancel = CancellationToken::new();
        connection.open(&address(), &cancel).await.unwrap();

        handle.push_inbound(&b"abcdef"[..]);
        assert_eq!(&connection.receive(4, &cancel).await.unwrap()[..], b"abcd");
        assert_eq!(&connection.receive(4, &cancel).await.unwrap()[..], b"ef");
    }

    #[tokio::test]
    async fn test_receive_waits_for_data() {
        let (mut connection, handle) = MockConnection::new();
        let cancel = CancellationToken::new();
        connection.open(&address(), &cancel).await.unwrap();

        let pusher = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pusher.push_inbound(&b"late"[..]);
        });

        assert_eq!(&connection.receive(16, &cancel).await.unwrap()[..], b"late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_timeout_faults_channel() {
        let (mut connection, handle) = MockConnection::new();
        let cancel = CancellationToken::new();
        let address = address().with_option("timeout_ms", "100");
        connection.open(&address, &cancel).await.unwrap();

        let error = connection.receive(16, &cancel).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Connection {
                kind: ConnectionFaultKind::Timeout,
                ..
            }
        ));
        assert_eq!(handle.status(), ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn test_responder_replies() {
        let (mut connection, handle) = MockConnection::new();
        let cancel = CancellationToken::new();
        handle.set_responder(|data| (data == b"PING").then(|| b"PONG".to_vec()));
        connection.open(&address(), &cancel).await.unwrap();

        connection.send(b"PING", &cancel).await.unwrap();
        assert_eq!(&connection.receive(8, &cancel).await.unwrap()[..], b"PONG");
        assert_eq!(handle.sent(), vec![b"PING".to_vec()]);
    }

    #[tokio::test]
    async fn test_remote_disconnect() {
        let (mut connection, handle) = MockConnection::new();
        let cancel = CancellationToken::new();
        connection.open(&address(), &cancel).await.unwrap();

        handle.disconnect_remote();
        assert!(!connection.ping(&cancel).await.unwrap());

        let error = connection.send(b"x", &cancel).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Connection {
                kind: ConnectionFaultKind::Closed,
                ..
            }
        ));
        assert_eq!(handle.status(), ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn test_dispose_idempotent() {
        let (mut connection, handle) = MockConnection::new();
        let cancel = CancellationToken::new();
        connection.open(&address(), &cancel).await.unwrap();

        connection.dispose().await.unwrap();
        connection.dispose().await.unwrap();

        assert!(handle.was_disposed());
        assert!(!handle.is_open());
        assert!(matches!(
            connection.open(&address(), &cancel).await,
            Err(Error::Disposed { .. })
        ));
    }
}

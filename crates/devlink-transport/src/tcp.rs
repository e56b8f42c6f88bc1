//! TCP transport.
//!
//! Opens a `TcpStream` to `host:port` with a connect timeout and applies a
//! per-operation timeout to every read and write. Both timeouts come from
//! [`TcpConfig`] and may be overridden per address with the `connect_timeout_ms`
//! and `timeout_ms` options.
//!
//! # Example
//!
//! ```no_run
//! use devlink_core::{CancellationToken, DeviceAddress};
//! use devlink_transport::{Connection, TcpConfig, TcpConnection};
//!
//! # async fn example() -> devlink_core::Result<()> {
//! let cancel = CancellationToken::new();
//! let mut connection = TcpConnection::new(TcpConfig::default());
//!
//! connection.open(&DeviceAddress::tcp("10.0.0.5", 9000), &cancel).await?;
//! connection.send(b"\x1b@", &cancel).await?;
//! let reply = connection.receive(256, &cancel).await?;
//! connection.close(&cancel).await?;
//! # Ok(())
//! # }
//! ```

use crate::connection::{ChannelState, Connection};
use crate::stream;
use bytes::Bytes;
use devlink_core::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_IO_TIMEOUT_MS, SCHEME_TCP};
use devlink_core::{CancellationToken, DeviceAddress, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Configuration for TCP connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Timeout for establishing the connection, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Timeout for each read and write, in milliseconds.
    pub io_timeout_ms: u64,

    /// Disable Nagle's algorithm.
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            nodelay: true,
        }
    }
}

impl TcpConfig {
    /// Apply per-address overrides (`connect_timeout_ms`, `timeout_ms`).
    pub fn for_address(&self, address: &DeviceAddress) -> Result<Self> {
        let mut config = self.clone();
        if let Some(ms) = address.option_parsed("connect_timeout_ms")? {
            config.connect_timeout_ms = ms;
        }
        if let Some(ms) = address.option_parsed("timeout_ms")? {
            config.io_timeout_ms = ms;
        }
        Ok(config)
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// TCP socket connection.
#[derive(Debug)]
pub struct TcpConnection {
    channel: ChannelState,
    defaults: TcpConfig,
    active: TcpConfig,
    stream: Option<TcpStream>,
}

impl TcpConnection {
    /// Create an unopened TCP connection.
    pub fn new(config: TcpConfig) -> Self {
        Self {
            channel: ChannelState::new(SCHEME_TCP),
            active: config.clone(),
            defaults: config,
            stream: None,
        }
    }

    async fn connect_stream(&self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<TcpStream> {
        let host = address.require_host()?;
        let port = address.require_port()?;
        let endpoint = address.to_string();
        let timeout = self.active.connect_timeout();

        info!(endpoint = %endpoint, "Connecting");

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, TcpStream::connect((host, port))) => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(Error::from_io(endpoint, e)),
                Err(_) => return Err(Error::connection_timeout(endpoint, timeout.as_millis() as u64)),
            },
        };

        if self.active.nodelay
            && let Err(e) = stream.set_nodelay(true)
        {
            warn!(endpoint = %endpoint, error = %e, "Failed to set TCP_NODELAY");
        }

        Ok(stream)
    }

    fn take_fault<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result
            && !error.is_cancelled()
        {
            self.channel.fault(error);
            self.stream = None;
        }
        result
    }
}

impl Connection for TcpConnection {
    fn channel(&self) -> &ChannelState {
        &self.channel
    }

    async fn open(&mut self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<()> {
        self.active = self.defaults.for_address(address)?;
        if !self.channel.begin_open(address)? {
            return Ok(());
        }

        match self.connect_stream(address, cancel).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.channel.open_succeeded();
                debug!(endpoint = %address, "Connection ready");
                Ok(())
            }
            Err(error) => {
                self.channel.open_failed(&error);
                Err(error)
            }
        }
    }

    async fn close(&mut self, _cancel: &CancellationToken) -> Result<()> {
        if !self.channel.begin_close()? {
            return Ok(());
        }

        if let Some(mut stream) = self.stream.take() {
            info!(endpoint = %self.channel.info(), "Closing connection");
            stream::shutdown(&mut stream, &self.channel.info()).await;
        }

        self.channel.close_finished();
        Ok(())
    }

    async fn send(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<usize> {
        self.channel.ensure_connected("send")?;
        let endpoint = self.channel.info();
        let timeout = self.active.io_timeout();

        let result = match self.stream.as_mut() {
            Some(stream) => stream::write_all(stream, data, timeout, cancel, &endpoint).await,
            None => Err(Error::invalid_state(endpoint, "send", "no stream")),
        };
        self.take_fault(result)
    }

    async fn receive(&mut self, max_bytes: usize, cancel: &CancellationToken) -> Result<Bytes> {
        self.channel.ensure_connected("receive")?;
        let endpoint = self.channel.info();
        let timeout = self.active.io_timeout();

        let result = match self.stream.as_mut() {
            Some(stream) => stream::read_some(stream, max_bytes, timeout, cancel, &endpoint).await,
            None => Err(Error::invalid_state(endpoint, "receive", "no stream")),
        };
        self.take_fault(result)
    }

    async fn ping(&mut self, _cancel: &CancellationToken) -> Result<bool> {
        self.channel.ensure_live()?;
        if !self.channel.status().is_connected() {
            return Ok(false);
        }
        // A reset socket no longer reports a peer address.
        Ok(self
            .stream
            .as_ref()
            .is_some_and(|stream| stream.peer_addr().is_ok()))
    }

    async fn dispose(&mut self) -> Result<()> {
        if self.channel.is_disposed() {
            return Ok(());
        }
        if let Err(e) = self.close(&CancellationToken::new()).await {
            warn!(endpoint = %self.channel.info(), error = %e, "Error closing during dispose");
        }
        self.channel.mark_disposed();
        Ok(())
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if self.stream.is_some() {
            debug!(endpoint = %self.channel.info(), "TcpConnection dropped while connected - socket will be closed");
        }
    }
}

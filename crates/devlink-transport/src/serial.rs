//! Serial port transport (feature `serial`).
//!
//! Addresses look like `serial:///dev/ttyUSB0?baud=115200`. The port is opened
//! 8N1 without flow control; the baud rate comes from the `baud` option or
//! [`SerialConfig::baud_rate`].

use crate::connection::{ChannelState, Connection};
use crate::stream;
use bytes::Bytes;
use devlink_core::constants::{DEFAULT_BAUD_RATE, DEFAULT_IO_TIMEOUT_MS, SCHEME_SERIAL};
use devlink_core::{CancellationToken, ConnectionFaultKind, DeviceAddress, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Configuration for serial connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Baud rate used when the address has no `baud` option.
    pub baud_rate: u32,

    /// Timeout for each read and write, in milliseconds.
    pub io_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
        }
    }
}

impl SerialConfig {
    /// Apply per-address overrides (`baud`, `timeout_ms`).
    pub fn for_address(&self, address: &DeviceAddress) -> Result<Self> {
        let mut config = self.clone();
        if let Some(baud) = address.option_parsed("baud")? {
            config.baud_rate = baud;
        }
        if let Some(ms) = address.option_parsed("timeout_ms")? {
            config.io_timeout_ms = ms;
        }
        Ok(config)
    }
}

fn map_serial_error(endpoint: &str, error: tokio_serial::Error) -> Error {
    let kind = match error.kind {
        tokio_serial::ErrorKind::NoDevice => ConnectionFaultKind::NotFound,
        tokio_serial::ErrorKind::Io(kind) => kind.into(),
        _ => ConnectionFaultKind::Unavailable,
    };
    Error::connection(kind, endpoint, error.description)
}

/// Serial port connection.
#[derive(Debug)]
pub struct SerialConnection {
    channel: ChannelState,
    defaults: SerialConfig,
    active: SerialConfig,
    port: Option<SerialStream>,
}

impl SerialConnection {
    /// Create an unopened serial connection.
    pub fn new(config: SerialConfig) -> Self {
        Self {
            channel: ChannelState::new(SCHEME_SERIAL),
            active: config.clone(),
            defaults: config,
            port: None,
        }
    }

    fn open_port(&self, address: &DeviceAddress) -> Result<SerialStream> {
        let path = address.require_path()?;
        let endpoint = address.to_string();
        info!(endpoint = %endpoint, baud = self.active.baud_rate, "Opening serial port");

        tokio_serial::new(path, self.active.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.io_timeout())
            .open_native_async()
            .map_err(|e| map_serial_error(&endpoint, e))
    }

    fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.active.io_timeout_ms)
    }

    fn take_fault<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result
            && !error.is_cancelled()
        {
            self.channel.fault(error);
            self.port = None;
        }
        result
    }
}

impl Connection for SerialConnection {
    fn channel(&self) -> &ChannelState {
        &self.channel
    }

    async fn open(&mut self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<()> {
        self.active = self.defaults.for_address(address)?;
        if !self.channel.begin_open(address)? {
            return Ok(());
        }

        let result = if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            self.open_port(address)
        };

        match result {
            Ok(port) => {
                self.port = Some(port);
                self.channel.open_succeeded();
                debug!(endpoint = %address, "Serial port ready");
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
        if let Some(mut port) = self.port.take() {
            info!(endpoint = %self.channel.info(), "Closing serial port");
            stream::shutdown(&mut port, &self.channel.info()).await;
        }
        self.channel.close_finished();
        Ok(())
    }

    async fn send(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<usize> {
        self.channel.ensure_connected("send")?;
        let endpoint = self.channel.info();
        let timeout = self.io_timeout();

        let result = match self.port.as_mut() {
            Some(port) => stream::write_all(port, data, timeout, cancel, &endpoint).await,
            None => Err(Error::invalid_state(endpoint, "send", "no port")),
        };
        self.take_fault(result)
    }

    async fn receive(&mut self, max_bytes: usize, cancel: &CancellationToken) -> Result<Bytes> {
        self.channel.ensure_connected("receive")?;
        let endpoint = self.channel.info();
        let timeout = self.io_timeout();

        let result = match self.port.as_mut() {
            Some(port) => stream::read_some(port, max_bytes, timeout, cancel, &endpoint).await,
            None => Err(Error::invalid_state(endpoint, "receive", "no port")),
        };
        self.take_fault(result)
    }

    async fn ping(&mut self, _cancel: &CancellationToken) -> Result<bool> {
        self.channel.ensure_live()?;
        Ok(self.channel.status().is_connected() && self.port.is_some())
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

//! USB bulk transport (feature `usb`).
//!
//! Addresses look like `usb://04b8:0e15?interface=0&endpoint_out=0x01&endpoint_in=0x81`.
//! The vendor and product ids are hex. libusb calls block, so every transfer
//! runs on the blocking pool with the configured I/O timeout handed to libusb.

use crate::connection::{ChannelState, Connection};
use bytes::Bytes;
use devlink_core::constants::{
    DEFAULT_IO_TIMEOUT_MS, DEFAULT_USB_ENDPOINT_IN, DEFAULT_USB_ENDPOINT_OUT,
    DEFAULT_USB_INTERFACE, SCHEME_USB,
};
use devlink_core::{CancellationToken, ConnectionFaultKind, DeviceAddress, Error, Result};
use rusb::{Context, DeviceHandle, UsbContext};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for USB connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbConfig {
    /// Interface to claim.
    pub interface: u8,

    /// Bulk OUT endpoint address.
    pub endpoint_out: u8,

    /// Bulk IN endpoint address.
    pub endpoint_in: u8,

    /// Timeout for each transfer, in milliseconds.
    pub io_timeout_ms: u64,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_USB_INTERFACE,
            endpoint_out: DEFAULT_USB_ENDPOINT_OUT,
            endpoint_in: DEFAULT_USB_ENDPOINT_IN,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
        }
    }
}

impl UsbConfig {
    /// Apply per-address overrides.
    pub fn for_address(&self, address: &DeviceAddress) -> Result<Self> {
        let mut config = self.clone();
        if let Some(raw) = address.option("interface") {
            config.interface = parse_byte(address, "interface", raw)?;
        }
        if let Some(raw) = address.option("endpoint_out") {
            config.endpoint_out = parse_byte(address, "endpoint_out", raw)?;
        }
        if let Some(raw) = address.option("endpoint_in") {
            config.endpoint_in = parse_byte(address, "endpoint_in", raw)?;
        }
        if let Some(ms) = address.option_parsed("timeout_ms")? {
            config.io_timeout_ms = ms;
        }
        Ok(config)
    }

    fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Parse `0x81` or `129`.
fn parse_byte(address: &DeviceAddress, key: &str, raw: &str) -> Result<u8> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|_| {
        Error::configuration(format!("Invalid value for option '{key}' in {address}: {raw}"))
    })
}

/// Split a `vid:pid` host into hex ids.
pub fn parse_vid_pid(address: &DeviceAddress) -> Result<(u16, u16)> {
    let host = address.require_host()?;
    let invalid = || Error::configuration(format!("Address {address} is not a vid:pid pair"));

    let (vid, pid) = host.split_once(':').ok_or_else(invalid)?;
    let vid = u16::from_str_radix(vid, 16).map_err(|_| invalid())?;
    let pid = u16::from_str_radix(pid, 16).map_err(|_| invalid())?;
    Ok((vid, pid))
}

fn map_usb_error(endpoint: &str, error: rusb::Error) -> Error {
    let kind = match error {
        rusb::Error::Timeout => ConnectionFaultKind::Timeout,
        rusb::Error::NoDevice | rusb::Error::NotFound => ConnectionFaultKind::NotFound,
        rusb::Error::Access | rusb::Error::Busy => ConnectionFaultKind::Unavailable,
        rusb::Error::Pipe | rusb::Error::Interrupted => ConnectionFaultKind::Reset,
        _ => ConnectionFaultKind::Io,
    };
    Error::connection(kind, endpoint, error.to_string())
}

/// Run a blocking libusb call, abandoning the wait (not the transfer) on cancel.
async fn blocking<T, F>(endpoint: &str, cancel: &CancellationToken, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, rusb::Error> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(call);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        joined = task => match joined {
            Ok(result) => result.map_err(|e| map_usb_error(endpoint, e)),
            Err(e) => Err(Error::connection(ConnectionFaultKind::Io, endpoint, e.to_string())),
        },
    }
}

/// USB bulk endpoint connection.
#[derive(Debug)]
pub struct UsbConnection {
    channel: ChannelState,
    defaults: UsbConfig,
    active: UsbConfig,
    handle: Option<Arc<DeviceHandle<Context>>>,
}

impl UsbConnection {
    /// Create an unopened USB connection.
    pub fn new(config: UsbConfig) -> Self {
        Self {
            channel: ChannelState::new(SCHEME_USB),
            active: config.clone(),
            defaults: config,
            handle: None,
        }
    }

    async fn open_device(&self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<DeviceHandle<Context>> {
        let (vid, pid) = parse_vid_pid(address)?;
        let interface = self.active.interface;
        let endpoint = address.to_string();

        info!(endpoint = %endpoint, interface, "Opening USB device");

        blocking(&endpoint, cancel, move || {
            let context = Context::new()?;
            let mut handle = context
                .open_device_with_vid_pid(vid, pid)
                .ok_or(rusb::Error::NoDevice)?;
            // Not supported on every platform.
            let _ = handle.set_auto_detach_kernel_driver(true);
            handle.claim_interface(interface)?;
            Ok(handle)
        })
        .await
    }

    fn take_fault<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result
            && !error.is_cancelled()
        {
            self.channel.fault(error);
            self.handle = None;
        }
        result
    }

    fn device_handle(&self, operation: &str) -> Result<Arc<DeviceHandle<Context>>> {
        self.handle
            .clone()
            .ok_or_else(|| Error::invalid_state(self.channel.info(), operation, "no device handle"))
    }
}

impl Connection for UsbConnection {
    fn channel(&self) -> &ChannelState {
        &self.channel
    }

    async fn open(&mut self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<()> {
        self.active = self.defaults.for_address(address)?;
        if !self.channel.begin_open(address)? {
            return Ok(());
        }

        match self.open_device(address, cancel).await {
            Ok(handle) => {
                self.handle = Some(Arc::new(handle));
                self.channel.open_succeeded();
                debug!(endpoint = %address, "USB device ready");
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
        if let Some(handle) = self.handle.take() {
            let interface = self.active.interface;
            let endpoint = self.channel.info();
            // An abandoned transfer may still hold a clone; dropping the last
            // one closes the device either way.
            if let Ok(mut handle) = Arc::try_unwrap(handle) {
                let released =
                    tokio::task::spawn_blocking(move || handle.release_interface(interface)).await;
                match released {
                    Ok(Ok(())) => debug!(endpoint = %endpoint, "Interface released"),
                    Ok(Err(e)) => warn!(endpoint = %endpoint, error = %e, "Error releasing interface"),
                    Err(e) => warn!(endpoint = %endpoint, error = %e, "Release task failed"),
                }
            }
        }
        self.channel.close_finished();
        Ok(())
    }

    async fn send(&mut self, data: &[u8], cancel: &CancellationToken) -> Result<usize> {
        self.channel.ensure_connected("send")?;
        let handle = self.device_handle("send")?;
        let endpoint = self.channel.info();
        let out = self.active.endpoint_out;
        let timeout = self.active.io_timeout();
        let payload = data.to_vec();

        let result = blocking(&endpoint, cancel, move || {
            handle.write_bulk(out, &payload, timeout)
        })
        .await;
        self.take_fault(result)
    }

    async fn receive(&mut self, max_bytes: usize, cancel: &CancellationToken) -> Result<Bytes> {
        self.channel.ensure_connected("receive")?;
        let handle = self.device_handle("receive")?;
        let endpoint = self.channel.info();
        let input = self.active.endpoint_in;
        let timeout = self.active.io_timeout();

        let result = blocking(&endpoint, cancel, move || {
            let mut buffer = vec![0u8; max_bytes];
            let n = handle.read_bulk(input, &mut buffer, timeout)?;
            buffer.truncate(n);
            Ok(Bytes::from(buffer))
        })
        .await;
        self.take_fault(result)
    }

    async fn ping(&mut self, _cancel: &CancellationToken) -> Result<bool> {
        self.channel.ensure_live()?;
        let Some(handle) = self.handle.clone() else {
            return Ok(false);
        };
        // A detached device stops answering descriptor reads.
        let alive = tokio::task::spawn_blocking(move || handle.active_configuration().is_ok())
            .await
            .unwrap_or(false);
        Ok(alive && self.channel.status().is_connected())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vid_pid() {
        let address: DeviceAddress = "usb://04b8:0e15".parse().unwrap();
        assert_eq!(parse_vid_pid(&address).unwrap(), (0x04b8, 0x0e15));
    }

    #[test]
    fn test_parse_vid_pid_invalid() {
        let address = DeviceAddress::new("usb").with_host("printer");
        assert!(matches!(
            parse_vid_pid(&address),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_endpoint_overrides() {
        let address: DeviceAddress = "usb://04b8:0e15?endpoint_in=0x82&interface=1"
            .parse()
            .unwrap();
        let config = UsbConfig::default().for_address(&address).unwrap();
        assert_eq!(config.endpoint_in, 0x82);
        assert_eq!(config.interface, 1);
        assert_eq!(config.endpoint_out, DEFAULT_USB_ENDPOINT_OUT);
    }

    #[test]
    fn test_usb_error_mapping() {
        let error = map_usb_error("usb://04b8:0e15", rusb::Error::NoDevice);
        assert!(!error.is_transient());

        let error = map_usb_error("usb://04b8:0e15", rusb::Error::Timeout);
        assert!(error.is_transient());
    }
}

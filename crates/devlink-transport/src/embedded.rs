//! Embedded transport: no byte channel.
//!
//! Used by devices that talk to a platform service out of band (a scanner
//! SDK, a camera stack owned by the OS). Opening only records the address and
//! moves to `Connected`; byte-level operations are not supported.

use crate::connection::{ChannelState, Connection};
use bytes::Bytes;
use devlink_core::constants::SCHEME_EMBEDDED;
use devlink_core::{CancellationToken, DeviceAddress, Error, Result};

/// Connection without a byte channel.
#[derive(Debug)]
pub struct EmbeddedConnection {
    channel: ChannelState,
}

impl EmbeddedConnection {
    /// Create an unopened embedded connection.
    pub fn new() -> Self {
        Self {
            channel: ChannelState::new(SCHEME_EMBEDDED),
        }
    }

    /// Backend resource name from the address host, if opened.
    pub fn resource(&self) -> Option<&str> {
        self.channel.address().and_then(|address| address.host.as_deref())
    }
}

impl Default for EmbeddedConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for EmbeddedConnection {
    fn channel(&self) -> &ChannelState {
        &self.channel
    }

    async fn open(&mut self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<()> {
        if !self.channel.begin_open(address)? {
            return Ok(());
        }
        if cancel.is_cancelled() {
            self.channel.open_failed(&Error::Cancelled);
            return Err(Error::Cancelled);
        }
        self.channel.open_succeeded();
        Ok(())
    }

    async fn close(&mut self, _cancel: &CancellationToken) -> Result<()> {
        if self.channel.begin_close()? {
            self.channel.close_finished();
        }
        Ok(())
    }

    async fn send(&mut self, _data: &[u8], _cancel: &CancellationToken) -> Result<usize> {
        self.channel.ensure_live()?;
        Err(Error::not_supported(self.channel.info(), "send"))
    }

    async fn receive(&mut self, _max_bytes: usize, _cancel: &CancellationToken) -> Result<Bytes> {
        self.channel.ensure_live()?;
        Err(Error::not_supported(self.channel.info(), "receive"))
    }

    async fn ping(&mut self, _cancel: &CancellationToken) -> Result<bool> {
        self.channel.ensure_live()?;
        Ok(self.channel.status().is_connected())
    }

    async fn dispose(&mut self) -> Result<()> {
        if self.channel.is_disposed() {
            return Ok(());
        }
        self.close(&CancellationToken::new()).await?;
        self.channel.mark_disposed();
        Ok(())
    }
}

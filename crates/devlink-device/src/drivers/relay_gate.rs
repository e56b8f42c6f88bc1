use super::{DEFAULT_MODEL, receive_exact};
use crate::capabilities::{GateDriver, send_all};
use crate::managed::DeviceDriver;
use crate::settings::DriverSettings;
use crate::traits::GateState;
use async_trait::async_trait;
use devlink_core::{CancellationToken, DeviceFaultKind, DeviceInfo, Error, Result};
use devlink_transport::{AnyConnection, Connection};
use std::sync::Mutex;

/// Gate switched by fixed relay commands, optionally acknowledged.
#[derive(Debug)]
pub struct RelayGate {
    model: String,
    open_command: Vec<u8>,
    close_command: Vec<u8>,
    ack: Option<Vec<u8>>,
    position: Mutex<GateState>,
}

impl RelayGate {
    pub fn new(open_command: impl Into<Vec<u8>>, close_command: impl Into<Vec<u8>>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            open_command: open_command.into(),
            close_command: close_command.into(),
            ack: None,
            position: Mutex::new(GateState::Unknown),
        }
    }

    /// Expect `ack` after every command.
    pub fn with_ack(mut self, ack: impl Into<Vec<u8>>) -> Self {
        self.ack = Some(ack.into());
        self
    }

    /// Build from `open`, `close` and optional `ack` hex settings.
    pub fn from_settings(settings: &DriverSettings) -> Result<Self> {
        let open = settings
            .bytes("open")?
            .ok_or_else(|| Error::configuration("Relay gate requires an 'open' command"))?;
        let close = settings
            .bytes("close")?
            .ok_or_else(|| Error::configuration("Relay gate requires a 'close' command"))?;

        let mut gate = Self::new(open, close);
        gate.ack = settings.bytes("ack")?.filter(|ack| !ack.is_empty());
        if let Some(model) = settings.get("model") {
            gate.model = model.to_string();
        }
        Ok(gate)
    }

    fn set_position(&self, state: GateState) {
        *self.position.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

#[async_trait]
impl DeviceDriver for RelayGate {
    async fn setup(&self, _connection: &mut AnyConnection, _cancel: &CancellationToken) -> Result<()> {
        self.set_position(GateState::Unknown);
        Ok(())
    }

    async fn query_info(&self, connection: &mut AnyConnection, _cancel: &CancellationToken) -> Result<DeviceInfo> {
        Ok(DeviceInfo::new("Relay gate", self.model.clone())
            .with_property("endpoint", connection.info())
            .with_property("position", format!("{:?}", self.position())))
    }
}

#[async_trait]
impl GateDriver for RelayGate {
    async fn drive(
        &self,
        connection: &mut AnyConnection,
        target: GateState,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let command = match target {
            GateState::Open => &self.open_command,
            GateState::Closed => &self.close_command,
            GateState::Unknown => {
                return Err(Error::device(
                    DeviceFaultKind::InvalidParameter,
                    connection.info(),
                    "cannot drive gate to an unknown position",
                ));
            }
        };

        send_all(connection, command, cancel).await?;

        if let Some(ack) = &self.ack {
            let reply = receive_exact(connection, ack.len(), cancel).await?;
            if &reply != ack {
                self.set_position(GateState::Unknown);
                return Err(Error::device(
                    DeviceFaultKind::Hardware,
                    connection.info(),
                    format!("unexpected acknowledgement {reply:02x?}"),
                ));
            }
        }

        self.set_position(target);
        Ok(())
    }

    fn position(&self) -> GateState {
        *self.position.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_requires_commands() {
        let missing = DriverSettings::new().with("open", "01");
        assert!(matches!(
            RelayGate::from_settings(&missing),
            Err(Error::Configuration { .. })
        ));

        let gate = RelayGate::from_settings(
            &DriverSettings::new()
                .with("open", "01")
                .with("close", "00")
                .with("ack", "06"),
        )
        .unwrap();
        assert_eq!(gate.ack, Some(vec![0x06]));
        assert_eq!(gate.position(), GateState::Unknown);
    }
}

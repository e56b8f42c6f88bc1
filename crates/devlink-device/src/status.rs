//! Device lifecycle states.

use devlink_core::{StatusChange, StatusKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a device.
///
/// ```text
/// NotInitialized -> Initializing -> Ready <-> Busy
///                        |            |        |
///                        +---> Error <+--------+      (Error reaches any state)
///                        +---> Disconnected <---+     (from any connected state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// Created, never initialized.
    NotInitialized,
    /// Device-specific setup is running.
    Initializing,
    /// Idle and accepting requests.
    Ready,
    /// Processing a request or streaming.
    Busy,
    /// A fault occurred; any state may follow.
    Error,
    /// Connection closed.
    Disconnected,
}

impl DeviceStatus {
    /// Whether the device accepts `get_info` and capability requests.
    pub fn is_operational(self) -> bool {
        matches!(self, DeviceStatus::Ready | DeviceStatus::Busy)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceStatus::NotInitialized => "NotInitialized",
            DeviceStatus::Initializing => "Initializing",
            DeviceStatus::Ready => "Ready",
            DeviceStatus::Busy => "Busy",
            DeviceStatus::Error => "Error",
            DeviceStatus::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}

impl StatusKind for DeviceStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use DeviceStatus::*;

        match (self, next) {
            (Error, _) => true,
            (_, Error) => true,
            (NotInitialized, Initializing | Disconnected) => true,
            (Initializing, Ready | Disconnected) => true,
            (Ready, Busy | Initializing | Disconnected) => true,
            (Busy, Ready | Disconnected) => true,
            (Disconnected, Initializing | Ready) => true,
            _ => false,
        }
    }
}

/// Device status notification.
pub type DeviceStatusChange = StatusChange<DeviceStatus>;

//! Connection status state machine.

use devlink_core::{StatusChange, StatusKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a connection.
///
/// ```text
/// Disconnected ──open──► Connecting ──ok──► Connected ──close──► Disconnecting ──► Disconnected
///                            │                  │
///                            └──fail──► Error ◄─┘ transport fault
/// ```
///
/// A cancelled open returns to `Disconnected`; a connection in `Error` may be
/// re-opened or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

impl ConnectionStatus {
    /// Whether the channel can carry data.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

impl StatusKind for ConnectionStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected | Error | Disconnected)
                | (Connected, Disconnecting | Error)
                | (Disconnecting, Disconnected | Error)
                | (Error, Connecting | Disconnecting | Disconnected)
        )
    }
}

/// Notification published when a connection changes status.
pub type ConnectionStatusChange = StatusChange<ConnectionStatus>;

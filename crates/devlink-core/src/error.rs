//! Error types for connectivity, device, and plugin operations.
//!
//! Every layer of the framework reports failures through the single [`Error`]
//! enum. The variants follow the fault taxonomy the layers agree on:
//!
//! - **Connection faults** - transport-level failures (refused, reset, timeout,
//!   not found). Always carry the endpoint description.
//! - **Device faults** - initialization failures, timeouts, busy/not-ready
//!   conditions, invalid parameters, hardware/firmware errors. Always carry the
//!   device identifier.
//! - **Plugin faults** - unresolved identifiers and components that failed to load.
//! - **Configuration faults** - unsupported transport schemes and bad settings.
//!
//! Usage errors ([`Error::Disposed`], [`Error::InvalidState`],
//! [`Error::NotSupported`]) are kept separate from operational faults so callers
//! can tell a programming mistake from a transient hardware condition.

use std::fmt;
use std::io;

/// Result type alias for framework operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a transport-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ConnectionFaultKind {
    /// Remote end refused the connection.
    Refused,
    /// Established channel was reset or broken.
    Reset,
    /// Connect, read, or write exceeded its configured timeout.
    Timeout,
    /// Endpoint (host, port name, USB device) does not exist.
    NotFound,
    /// Endpoint exists but cannot be used right now (busy port, permissions).
    Unavailable,
    /// Peer closed the channel.
    Closed,
    /// Other I/O failure.
    Io,
}

impl fmt::Display for ConnectionFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Refused => "refused",
            Self::Reset => "reset",
            Self::Timeout => "timeout",
            Self::NotFound => "not found",
            Self::Unavailable => "unavailable",
            Self::Closed => "closed",
            Self::Io => "i/o",
        };
        f.write_str(name)
    }
}

impl From<io::ErrorKind> for ConnectionFaultKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::Reset,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied
            | io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable => Self::Unavailable,
            io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Io,
        }
    }
}

/// Classification of a device-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DeviceFaultKind {
    /// Device-specific setup did not complete.
    InitializationFailed,
    /// Device did not answer in time.
    Timeout,
    /// Device is processing another request.
    Busy,
    /// Device is not in a state that accepts the request.
    NotReady,
    /// Caller supplied a parameter the device rejects.
    InvalidParameter,
    /// Hardware reported a fault.
    Hardware,
    /// Firmware reported a fault or is incompatible.
    Firmware,
}

impl fmt::Display for DeviceFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InitializationFailed => "initialization failed",
            Self::Timeout => "timeout",
            Self::Busy => "busy",
            Self::NotReady => "not ready",
            Self::InvalidParameter => "invalid parameter",
            Self::Hardware => "hardware",
            Self::Firmware => "firmware",
        };
        f.write_str(name)
    }
}

/// Errors produced by the framework.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Transport-level failure.
    #[error("Connection fault ({kind}) on {endpoint}: {message}")]
    Connection {
        kind: ConnectionFaultKind,
        endpoint: String,
        message: String,
        #[source]
        source: Option<io::Error>,
    },

    /// Device-level failure.
    #[error("Device fault ({kind}) on {device}: {message}")]
    Device {
        kind: DeviceFaultKind,
        device: String,
        message: String,
    },

    /// No plugin is registered under the requested identifier.
    #[error("Plugin not found: {plugin_id}")]
    PluginNotFound { plugin_id: String },

    /// A plugin component could not be loaded or instantiated.
    #[error("Plugin load failed for {component}: {message}")]
    PluginLoad { component: String, message: String },

    /// No transport factory is registered for the address scheme.
    #[error("Unsupported transport scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    /// Invalid or missing configuration.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Operation invoked on an object that has been disposed.
    #[error("{object} has been disposed")]
    Disposed { object: String },

    /// Operation is not valid in the object's current state.
    #[error("Invalid state for {operation} on {object}: {state}")]
    InvalidState {
        object: String,
        operation: String,
        state: String,
    },

    /// Operation is not supported by this object at all.
    #[error("Unsupported operation {operation} on {object}")]
    NotSupported { object: String, operation: String },

    /// Cooperative cancellation was requested.
    #[error("Operation cancelled")]
    Cancelled,

    /// A retry policy ran out of attempts.
    #[error("Operation failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a connection fault without an underlying I/O error.
    pub fn connection(
        kind: ConnectionFaultKind,
        endpoint: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Connection {
            kind,
            endpoint: endpoint.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an I/O error as a connection fault, classifying it by its kind.
    pub fn from_io(endpoint: impl Into<String>, error: io::Error) -> Self {
        Self::Connection {
            kind: error.kind().into(),
            endpoint: endpoint.into(),
            message: error.to_string(),
            source: Some(error),
        }
    }

    /// Create a connection timeout fault.
    pub fn connection_timeout(endpoint: impl Into<String>, duration_ms: u64) -> Self {
        Self::connection(
            ConnectionFaultKind::Timeout,
            endpoint,
            format!("timed out after {duration_ms}ms"),
        )
    }

    /// Create a device fault.
    pub fn device(
        kind: DeviceFaultKind,
        device: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Device {
            kind,
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create a plugin-not-found error.
    pub fn plugin_not_found(plugin_id: impl Into<String>) -> Self {
        Self::PluginNotFound {
            plugin_id: plugin_id.into(),
        }
    }

    /// Create a plugin load error.
    pub fn plugin_load(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PluginLoad {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported scheme error.
    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            scheme: scheme.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a disposed-object error.
    pub fn disposed(object: impl Into<String>) -> Self {
        Self::Disposed {
            object: object.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(
        object: impl Into<String>,
        operation: impl Into<String>,
        state: impl fmt::Display,
    ) -> Self {
        Self::InvalidState {
            object: object.into(),
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// Create an unsupported operation error.
    pub fn not_supported(object: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::NotSupported {
            object: object.into(),
            operation: operation.into(),
        }
    }

    /// Whether the failure is likely to succeed on retry.
    ///
    /// Timeouts, busy devices, and failed connections are transient. A missing
    /// endpoint is not: retrying a port that does not exist only delays the error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { kind, .. } => *kind != ConnectionFaultKind::NotFound,
            Self::Device { kind, .. } => {
                matches!(kind, DeviceFaultKind::Timeout | DeviceFaultKind::Busy)
            }
            _ => false,
        }
    }

    /// Whether this error is a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The innermost cause when this error wraps another framework error.
    pub fn root(&self) -> &Error {
        match self {
            Self::RetryExhausted { source, .. } => source.root(),
            other => other,
        }
    }
}

//! Framework-wide defaults.
//!
//! Timeouts are in milliseconds, matching how they appear in configuration
//! files and address options.
//!
//! ```
//! use devlink_core::constants::*;
//! use std::time::Duration;
//!
//! let timeout = Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS);
//! assert_eq!(timeout.as_secs(), 3);
//! ```

// ============================================================================
// Transport schemes
// ============================================================================

/// TCP socket transport.
pub const SCHEME_TCP: &str = "tcp";

/// Serial port transport.
pub const SCHEME_SERIAL: &str = "serial";

/// USB bulk endpoint transport.
pub const SCHEME_USB: &str = "usb";

/// No byte channel; the device talks to an out-of-band platform backend.
pub const SCHEME_EMBEDDED: &str = "embedded";

/// Scripted in-memory transport used for development and tests.
pub const SCHEME_MOCK: &str = "mock";

// ============================================================================
// Timeouts
// ============================================================================

/// Default timeout for establishing a transport connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Default timeout for a single read or write.
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 3000;

/// Flush/shutdown budget when closing a socket.
pub const CLOSE_TIMEOUT_MS: u64 = 500;

// ============================================================================
// Retry
// ============================================================================

/// Default total number of attempts made by a retry policy.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Upper bound on any single backoff delay.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

// ============================================================================
// Serial / USB
// ============================================================================

/// Baud rate used when a serial address does not specify one.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default USB interface number.
pub const DEFAULT_USB_INTERFACE: u8 = 0;

/// Default bulk OUT endpoint.
pub const DEFAULT_USB_ENDPOINT_OUT: u8 = 0x01;

/// Default bulk IN endpoint.
pub const DEFAULT_USB_ENDPOINT_IN: u8 = 0x81;

// ============================================================================
// Notifications and plugins
// ============================================================================

/// Capacity of status-change broadcast channels.
pub const STATUS_CHANNEL_CAPACITY: usize = 64;

/// File suffix recognized by the manifest component loader.
pub const PLUGIN_MANIFEST_SUFFIX: &str = ".plugin.json";

/// Capability key a plugin uses to declare the transport scheme it expects.
pub const CAPABILITY_TRANSPORT_SCHEME: &str = "transport.scheme";

//! Shared building blocks for the devlink device connectivity framework.
//!
//! This crate holds everything the transport, device, plugin and manager layers
//! agree on:
//!
//! - [`Error`] - the single fault taxonomy (connection, device, plugin and
//!   configuration faults, plus disposal/state/cancellation errors)
//! - [`DeviceAddress`] - the scheme-based target address handed to the manager
//! - [`DeviceType`] and [`DeviceInfo`] - coarse device partitioning and the
//!   `get_info` payload
//! - [`RetryPolicy`] - the backoff decorator used for transient faults
//! - [`StatusCell`] - serialized status tracking with change notifications
//!
//! # Example
//!
//! ```
//! use devlink_core::{DeviceAddress, DeviceType};
//!
//! let address: DeviceAddress = "tcp://10.0.0.5:9000".parse().unwrap();
//! assert_eq!(address.scheme, "tcp");
//! assert_eq!(address.port, Some(9000));
//!
//! let device_type: DeviceType = "camera".parse().unwrap();
//! assert_eq!(device_type, DeviceType::Camera);
//! ```

pub mod constants;
pub mod error;
pub mod retry;
pub mod status;
pub mod types;

pub use error::{ConnectionFaultKind, DeviceFaultKind, Error, Result};
pub use retry::{RetryConfig, RetryPolicy};
pub use status::{StatusCell, StatusChange, StatusKind};
pub use types::{DeviceAddress, DeviceInfo, DeviceType};

/// Cancellation signal accepted by every public asynchronous operation.
pub use tokio_util::sync::CancellationToken;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

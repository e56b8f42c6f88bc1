//! Device layer for devlink
//!
//! A device is one physical unit built on exactly one connection. This crate
//! defines the lifecycle contract, the capability traits callers use, and the
//! [`ManagedDevice`] composition vendor drivers plug into.
//!
//! # Components
//!
//! - **Device**: lifecycle contract (`connect`, `disconnect`, `reset`,
//!   `get_info`) with a status state machine
//! - **Capabilities**: [`Camera`], [`Printer`], [`Scanner`], [`Gate`]
//! - **ManagedDevice**: lifecycle implementation parameterized by a
//!   [`DeviceDriver`]
//! - **AnyDevice**: a device tagged with its capability, as produced by plugins
//! - **Boundaries**: [`CommandEncoder`] for vendor bytes, [`PlatformBackend`]
//!   for OS services
//!
//! # Example
//!
//! ```no_run
//! use devlink_core::{CancellationToken, DeviceAddress, DeviceType, RetryPolicy};
//! use devlink_device::drivers::EncodedPrinter;
//! use devlink_device::{Device, DeviceIdentity, ManagedDevice, PlainTextEncoder, Printer};
//! use devlink_transport::{TcpConfig, TcpConnection};
//! use std::time::Duration;
//!
//! # async fn example() -> devlink_core::Result<()> {
//! let printer = ManagedDevice::new(
//!     DeviceIdentity::new("front-desk", "Front desk printer", DeviceType::Printer),
//!     TcpConnection::new(TcpConfig::default()).into(),
//!     RetryPolicy::new(3, Duration::from_millis(100)),
//!     EncodedPrinter::new(PlainTextEncoder),
//! )
//! .with_address(DeviceAddress::tcp("10.0.0.7", 9100));
//!
//! let cancel = CancellationToken::new();
//! printer.connect(&cancel).await?;
//! printer.print_text("Hello", &cancel).await?;
//! printer.cut(&cancel).await?;
//! printer.disconnect(&cancel).await?;
//! # Ok(())
//! # }
//! ```

mod boundary;
mod capabilities;
mod devices;
pub mod drivers;
mod managed;
mod settings;
mod status;
mod traits;

pub use boundary::{CommandEncoder, PlainTextEncoder, PlatformBackend};
pub use capabilities::{
    CameraDriver, DEFAULT_STREAM_CAPACITY, GateDriver, PrinterDriver, ScannerDriver, send_all,
};
pub use devices::{AnyDevice, Capability};
pub use managed::{BusyScope, DeviceDriver, DeviceIdentity, ManagedDevice};
pub use settings::DriverSettings;
pub use status::{DeviceStatus, DeviceStatusChange};
pub use traits::{Camera, Device, Frame, Gate, GateState, Printer, Scanner};

//! Transport layer for devlink
//!
//! This crate provides the byte channels devices talk over and the registry
//! that maps address schemes to them.
//!
//! # Components
//!
//! - **Connection**: uniform open/close/send/receive/ping contract with a
//!   status state machine and change notifications
//! - **AnyConnection**: enum dispatch over the built-in transports
//! - **TransportRegistry**: scheme to factory map used by the device manager
//!
//! # Transports
//!
//! | Scheme     | Type                  | Feature  |
//! |------------|-----------------------|----------|
//! | `tcp`      | [`TcpConnection`]     | always   |
//! | `serial`   | `SerialConnection`    | `serial` |
//! | `usb`      | `UsbConnection`       | `usb`    |
//! | `embedded` | [`EmbeddedConnection`]| always   |
//! | `mock`     | [`MockConnection`]    | always   |
//!
//! # Example
//!
//! ```no_run
//! use devlink_core::{CancellationToken, DeviceAddress};
//! use devlink_transport::{Connection, TransportRegistry};
//!
//! # async fn example() -> devlink_core::Result<()> {
//! let registry = TransportRegistry::with_defaults();
//! let address: DeviceAddress = "tcp://10.0.0.5:9000".parse()?;
//!
//! let mut connection = registry.create(&address)?;
//! connection.open(&address, &CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod connection;
mod embedded;
mod mock;
mod registry;
mod status;
mod stream;
mod tcp;

#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "usb")]
mod usb;

pub use connection::{AnyConnection, ChannelState, Connection};
pub use embedded::EmbeddedConnection;
pub use mock::{MockCall, MockConnection, MockConnectionHandle, MockResponder};
pub use registry::{TransportConfig, TransportFactory, TransportRegistry};
pub use status::{ConnectionStatus, ConnectionStatusChange};
pub use tcp::{TcpConfig, TcpConnection};

#[cfg(feature = "serial")]
pub use serial::{SerialConfig, SerialConnection};
#[cfg(feature = "usb")]
pub use usb::{UsbConfig, UsbConnection, parse_vid_pid};

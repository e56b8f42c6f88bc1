//! Device manager for devlink
//!
//! The entry point of the framework: given an address and a plugin id, the
//! [`DeviceManager`] creates the transport, opens it, resolves the plugin,
//! builds and connects the device, and returns it typed by capability.
//!
//! # Example
//!
//! ```no_run
//! use devlink_core::{CancellationToken, DeviceAddress};
//! use devlink_device::{Camera, Device};
//! use devlink_manager::{DeviceManager, ManagerConfig};
//! use devlink_plugin::DriverRegistry;
//!
//! # async fn example() -> devlink_core::Result<()> {
//! let config = ManagerConfig::default().with_plugin_directory("/opt/devlink/plugins");
//! let manager = DeviceManager::from_config(config, DriverRegistry::with_defaults())?;
//!
//! let cancel = CancellationToken::new();
//! let address: DeviceAddress = "tcp://10.0.0.5:9000".parse()?;
//! let camera = manager.connect::<dyn Camera>(&address, "acme.camera.x", &cancel).await?;
//!
//! let frame = camera.capture_frame(&cancel).await?;
//! println!("{} bytes from {}", frame.data.len(), camera.id());
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod manager;

pub use config::{DEFAULT_SHUTDOWN_TIMEOUT_MS, ManagerConfig};
pub use manager::DeviceManager;

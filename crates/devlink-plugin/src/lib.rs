//! Plugin layer for devlink
//!
//! Vendor and model support lives in plugins: versioned factories that turn
//! an open connection into a device. This crate defines the plugin contract
//! and the catalog that discovers, isolates and resolves plugins.
//!
//! # Components
//!
//! - **Plugin**: descriptor plus `create(connection) -> AnyDevice`
//! - **IsolationContext**: per-component context that can be discarded to
//!   unload a component
//! - **ComponentLoader**: the isolation boundary; [`ManifestLoader`] reads
//!   `*.plugin.json` manifests backed by a host-supplied [`DriverRegistry`]
//! - **PluginCatalog**: id index with directory scans, hot reload and a
//!   [`ScanReport`] of skipped components
//!
//! # Example
//!
//! ```no_run
//! use devlink_core::DeviceType;
//! use devlink_plugin::{CatalogConfig, DriverRegistry, ManifestLoader, PluginCatalog};
//!
//! # fn example() -> devlink_core::Result<()> {
//! let catalog = PluginCatalog::new(CatalogConfig::new("/opt/devlink/plugins").recursive(true))
//!     .with_loader(ManifestLoader::new(DriverRegistry::with_defaults()));
//!
//! let report = catalog.scan()?;
//! for skipped in &report.skipped {
//!     eprintln!("skipped {}: {}", skipped.path.display(), skipped.reason);
//! }
//!
//! for plugin in catalog.find_by_device_type(&DeviceType::Camera) {
//!     println!("{}", plugin.descriptor());
//! }
//! # Ok(())
//! # }
//! ```

mod catalog;
mod context;
mod descriptor;
mod drivers;
mod loader;
mod manifest;
mod version;

pub use catalog::{
    CatalogConfig, CatalogEntry, LoadedComponent, PluginCatalog, ScanReport, SkippedComponent,
};
pub use context::{ComponentSource, IsolationContext};
pub use descriptor::{Plugin, PluginDescriptor};
pub use drivers::{DeviceBuilder, DeviceParts, DriverFactory, DriverRegistry};
pub use loader::ComponentLoader;
pub use manifest::{ManifestEntry, ManifestLoader, ManifestPlugin, PluginManifest};
pub use version::PluginVersion;

//! Shared fixtures for the device manager integration tests.
//!
//! Every fixture builds a manager around a plugin directory in a temp dir and
//! a transport registry whose `mock` scheme records each connection it hands
//! out, so tests can inspect what the manager did to the channel.

#![allow(dead_code)]

use devlink_core::DeviceAddress;
use devlink_core::constants::SCHEME_MOCK;
use devlink_manager::{DeviceManager, ManagerConfig};
use devlink_plugin::{CatalogConfig, DriverRegistry, ManifestLoader, PluginCatalog};
use devlink_transport::{MockConnection, MockConnectionHandle, TransportRegistry};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Gate over the mock transport with a 100 ms exponential retry budget of 3.
pub const GATE_MANIFEST: &str = r#"{
    "plugins": [{
        "id": "acme.gate",
        "version": "1.0.0",
        "device_type": "gate",
        "driver": "relay-gate",
        "capabilities": {"transport.scheme": "mock"},
        "settings": {"open": "4f", "close": "43"},
        "retry": {"max_retries": 3, "base_delay_ms": 100, "exponential_backoff": true}
    }]
}"#;

/// Camera reachable over TCP.
pub const CAMERA_MANIFEST: &str = r#"{
    "plugins": [{
        "id": "acme.camera.x",
        "version": "1.2.0",
        "device_type": "camera",
        "driver": "stream-camera",
        "capabilities": {"video.stream": "h264", "transport.scheme": "tcp"},
        "settings": {"frame_request": "0x46", "model": "X-100"}
    }]
}"#;

/// Route test logs through the test writer. `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Handles of every mock connection the registry created, in order.
#[derive(Clone, Default)]
pub struct Spy {
    handles: Arc<Mutex<Vec<MockConnectionHandle>>>,
}

impl Spy {
    pub fn handles(&self) -> Vec<MockConnectionHandle> {
        self.handles.lock().unwrap().clone()
    }

    pub fn last(&self) -> MockConnectionHandle {
        self.handles().last().cloned().expect("no mock connection created")
    }

    pub fn count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

/// Default transports plus a recording `mock` scheme.
///
/// `prepare` runs on each new mock connection before it is handed out.
pub fn transports_with_spy<F>(prepare: F) -> (TransportRegistry, Spy)
where
    F: Fn(&MockConnectionHandle) + Send + Sync + 'static,
{
    let spy = Spy::default();
    let recorder = spy.clone();

    let mut transports = TransportRegistry::with_defaults();
    transports.register(SCHEME_MOCK, move |_| {
        let (connection, handle) = MockConnection::new();
        prepare(&handle);
        recorder.handles.lock().unwrap().push(handle);
        Ok(connection.into())
    });
    (transports, spy)
}

pub fn write_manifest(dir: &Path, name: &str, text: &str) {
    std::fs::write(dir.join(name), text).unwrap();
}

/// Plugin directory holding the gate and camera manifests.
pub fn plugin_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_manifest(dir.path(), "gate.plugin.json", GATE_MANIFEST);
    write_manifest(dir.path(), "camera.plugin.json", CAMERA_MANIFEST);
    dir
}

pub fn catalog(dir: &Path) -> Arc<PluginCatalog> {
    let catalog = PluginCatalog::new(CatalogConfig::new(dir))
        .with_loader(ManifestLoader::new(DriverRegistry::with_defaults()));
    let report = catalog.scan().unwrap();
    assert!(report.is_clean(), "unexpected skipped components: {:?}", report.skipped);
    Arc::new(catalog)
}

/// Manager over [`plugin_dir`] with the recording mock transport.
pub fn manager() -> (DeviceManager, Spy, TempDir) {
    manager_with(|_| {})
}

pub fn manager_with<F>(prepare: F) -> (DeviceManager, Spy, TempDir)
where
    F: Fn(&MockConnectionHandle) + Send + Sync + 'static,
{
    init_tracing();
    let dir = plugin_dir();
    let (transports, spy) = transports_with_spy(prepare);
    let manager = DeviceManager::new(transports, catalog(dir.path()), ManagerConfig::default());
    (manager, spy, dir)
}

pub fn mock_address(name: &str) -> DeviceAddress {
    DeviceAddress::new(SCHEME_MOCK).with_host(name)
}

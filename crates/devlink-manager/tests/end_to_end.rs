//! End-to-end tests for DeviceManager.
//!
//! These run the whole chain (transport registry, catalog scan, plugin,
//! managed device) against a loopback TCP server or the recording mock
//! transport.

mod common;

use common::{Spy, mock_address};
use devlink_core::{CancellationToken, ConnectionFaultKind, DeviceAddress, DeviceType, Error};
use devlink_device::{Camera, Device, DeviceStatus, Gate, GateState, Printer};
use devlink_transport::{ConnectionStatus, MockCall};
use devlink_plugin::PluginVersion;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

/// Connect a camera over real TCP and capture one frame
#[tokio::test]
async fn test_connect_camera_over_tcp() {
    let (manager, _spy, _dir) = common::manager();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Answer every frame request with a fixed payload.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1];
        while stream.read_exact(&mut request).await.is_ok() {
            assert_eq!(request[0], 0x46);
            stream.write_all(b"frame-0001").await.unwrap();
        }
    });

    let cancel = CancellationToken::new();
    let address = DeviceAddress::tcp("127.0.0.1", port);
    let camera = manager
        .connect::<dyn Camera>(&address, "acme.camera.x", &cancel)
        .await
        .unwrap();

    assert_eq!(camera.device_type(), DeviceType::Camera);
    assert_eq!(camera.status(), DeviceStatus::Ready);
    assert_eq!(camera.connection_status(), ConnectionStatus::Connected);
    assert!(camera.id().starts_with("acme.camera.x@"));

    let frame = camera.capture_frame(&cancel).await.unwrap();
    assert_eq!(frame.sequence, 1);
    assert_eq!(&frame.data[..], b"frame-0001");
    assert_eq!(camera.status(), DeviceStatus::Ready);

    let info = camera.get_info(&cancel).await.unwrap();
    assert_eq!(info.model, "X-100");

    camera.disconnect(&cancel).await.unwrap();
    assert_eq!(camera.connection_status(), ConnectionStatus::Disconnected);
}

/// A missing plugin releases the connection that was already opened
#[tokio::test]
async fn test_plugin_not_found_releases_connection() {
    let (manager, spy, _dir) = common::manager();
    let cancel = CancellationToken::new();

    let error = manager
        .connect::<dyn Device>(&mock_address("x"), "does.not.exist", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(error, Error::PluginNotFound { ref plugin_id } if plugin_id == "does.not.exist"));

    let handle = spy.last();
    assert_eq!(
        handle.calls(),
        vec![MockCall::Open("mock://x".to_string()), MockCall::Dispose]
    );
    assert!(!handle.is_open());
    assert_eq!(manager.live_count(), 0);
}

#[tokio::test]
async fn test_unsupported_scheme_creates_nothing() {
    let (manager, spy, _dir) = common::manager();

    let address: DeviceAddress = "ftp://files.example.com".parse().unwrap();
    let error = manager
        .connect_any(&address, "acme.gate", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, Error::UnsupportedScheme { ref scheme } if scheme == "ftp"));
    assert_eq!(spy.count(), 0);
}

/// Open faults reach the caller unchanged and are not retried by the manager
#[tokio::test]
async fn test_open_failure_propagates_without_retry() {
    let (manager, spy, _dir) =
        common::manager_with(|handle| handle.fail_next_open(ConnectionFaultKind::Refused, "refused"));

    let error = manager
        .connect::<dyn Gate>(&mock_address("gate"), "acme.gate", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        Error::Connection { kind: ConnectionFaultKind::Refused, .. }
    ));
    let handle = spy.last();
    assert_eq!(handle.open_count(), 1);
    assert!(handle.was_disposed());
}

/// Device reconnects retry transient open faults: 100 ms, then 200 ms
#[tokio::test(start_paused = true)]
async fn test_reconnect_retries_with_exponential_backoff() {
    let (manager, spy, _dir) = common::manager();
    let cancel = CancellationToken::new();

    let gate = manager
        .connect::<dyn Gate>(&mock_address("gate"), "acme.gate", &cancel)
        .await
        .unwrap();
    gate.disconnect(&cancel).await.unwrap();

    let handle = spy.last();
    handle.fail_next_open(ConnectionFaultKind::Timeout, "no answer");
    handle.fail_next_open(ConnectionFaultKind::Timeout, "no answer");

    let start = Instant::now();
    gate.connect(&cancel).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(350), "elapsed {elapsed:?}");
    assert_eq!(handle.open_count(), 4);
    assert_eq!(gate.status(), DeviceStatus::Ready);
    assert!(handle.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_budget() {
    let (manager, spy, _dir) = common::manager();
    let cancel = CancellationToken::new();

    let gate = manager
        .connect::<dyn Gate>(&mock_address("gate"), "acme.gate", &cancel)
        .await
        .unwrap();
    gate.disconnect(&cancel).await.unwrap();

    let handle = spy.last();
    for _ in 0..3 {
        handle.fail_next_open(ConnectionFaultKind::Timeout, "no answer");
    }

    let error = gate.connect(&cancel).await.unwrap_err();
    assert!(matches!(error, Error::RetryExhausted { attempts: 3, .. }));
    assert_eq!(gate.status(), DeviceStatus::Error);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (manager, spy, _dir) = common::manager();
    let cancel = CancellationToken::new();

    let gate = manager
        .connect::<dyn Gate>(&mock_address("gate"), "acme.gate", &cancel)
        .await
        .unwrap();

    gate.disconnect(&cancel).await.unwrap();
    gate.disconnect(&cancel).await.unwrap();

    assert_eq!(gate.status(), DeviceStatus::Disconnected);
    assert_eq!(spy.last().close_count(), 1);
}

/// Cancelling during open leaves nothing half-connected
#[tokio::test(start_paused = true)]
async fn test_cancelled_connect_is_never_left_connecting() {
    let (manager, spy, _dir) =
        common::manager_with(|handle| handle.set_open_delay(Duration::from_secs(5)));

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    let address = mock_address("gate");

    let (result, ()) = tokio::join!(
        manager.connect::<dyn Gate>(&address, "acme.gate", &cancel),
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        }
    );

    assert!(matches!(result, Err(Error::Cancelled)));
    let handle = spy.last();
    assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    assert!(handle.was_disposed());
    assert_eq!(manager.live_count(), 0);
}

#[tokio::test]
async fn test_capability_mismatch_is_invalid_parameter() {
    let (manager, spy, _dir) = common::manager();

    let error = manager
        .connect::<dyn Printer>(&mock_address("gate"), "acme.gate", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        Error::Device { kind: devlink_core::DeviceFaultKind::InvalidParameter, .. }
    ));
    assert!(error.to_string().contains("gate"));
    assert!(spy.last().was_disposed());
}

/// A plugin refusing the transport hands the connection back for disposal
#[tokio::test]
async fn test_plugin_rejecting_scheme_releases_connection() {
    let (manager, spy, _dir) = common::manager();

    let error = manager
        .connect::<dyn Camera>(&mock_address("cam"), "acme.camera.x", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Configuration { .. }));
    assert!(spy.last().was_disposed());
}

#[tokio::test]
async fn test_connect_any_keeps_capability() {
    let (manager, spy, _dir) = common::manager();
    let cancel = CancellationToken::new();

    let device = manager
        .connect_any(&mock_address("gate"), "acme.gate", &cancel)
        .await
        .unwrap();
    assert_eq!(device.capability(), "gate");

    let Ok(gate) = device.into_capability::<dyn Gate>() else {
        panic!("expected a gate");
    };
    gate.open_gate(&cancel).await.unwrap();
    assert_eq!(gate.gate_state(), GateState::Open);
    assert_eq!(spy.last().sent(), vec![vec![0x4f]]);
}

#[tokio::test]
async fn test_shutdown_disposes_every_live_device() {
    let (manager, spy, _dir) = common::manager();
    let cancel = CancellationToken::new();

    let first = manager
        .connect::<dyn Gate>(&mock_address("gate-1"), "acme.gate", &cancel)
        .await
        .unwrap();
    let second = manager
        .connect::<dyn Device>(&mock_address("gate-2"), "acme.gate", &cancel)
        .await
        .unwrap();
    let dropped = manager
        .connect::<dyn Gate>(&mock_address("gate-3"), "acme.gate", &cancel)
        .await
        .unwrap();
    drop(dropped);

    assert_eq!(manager.live_count(), 2);
    assert_eq!(manager.shutdown().await, 2);

    let handles = spy.handles();
    assert!(handles[0].was_disposed());
    assert!(handles[1].was_disposed());
    assert_eq!(first.status(), DeviceStatus::Disconnected);
    assert_eq!(second.status(), DeviceStatus::Disconnected);
    assert!(manager.is_shut_down());
    assert_eq!(manager.live_count(), 0);
}

/// A connect still opening when shutdown runs is refused and released
#[tokio::test(start_paused = true)]
async fn test_shutdown_during_connect_releases_late_device() {
    let (manager, spy, _dir) =
        common::manager_with(|handle| handle.set_open_delay(Duration::from_millis(500)));
    let cancel = CancellationToken::new();
    let address = mock_address("gate");

    let (result, swept) = tokio::join!(
        manager.connect::<dyn Gate>(&address, "acme.gate", &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            manager.shutdown().await
        }
    );

    assert_eq!(swept, 0);
    assert!(matches!(result, Err(Error::Disposed { .. })));
    let handle = spy.last();
    assert!(handle.was_disposed());
    assert!(!handle.is_open());
    assert_eq!(manager.live_count(), 0);
}

/// Reloading a component does not disturb devices created from the old one
#[tokio::test]
async fn test_reload_keeps_live_device_on_old_plugin() {
    let (manager, _spy, dir) = common::manager();
    let cancel = CancellationToken::new();

    let gate = manager
        .connect::<dyn Gate>(&mock_address("gate"), "acme.gate", &cancel)
        .await
        .unwrap();
    assert!(manager.stale_devices().is_empty());

    let path = dir.path().join("gate.plugin.json");
    std::fs::write(&path, common::GATE_MANIFEST.replace("1.0.0", "1.1.0")).unwrap();
    manager.catalog().reload(&path).unwrap();

    assert_eq!(
        manager.catalog().resolve("acme.gate").unwrap().descriptor().version,
        PluginVersion::new(1, 1, 0)
    );
    assert_eq!(manager.stale_devices(), vec![gate.id().to_string()]);

    gate.open_gate(&cancel).await.unwrap();
    assert_eq!(gate.gate_state(), GateState::Open);
}

#[tokio::test]
async fn test_initialize_on_connect_can_be_disabled() {
    common::init_tracing();
    let dir = common::plugin_dir();
    let (transports, spy): (_, Spy) = common::transports_with_spy(|_| {});
    let manager = devlink_manager::DeviceManager::new(
        transports,
        common::catalog(dir.path()),
        devlink_manager::ManagerConfig::default().with_initialize_on_connect(false),
    );
    let cancel = CancellationToken::new();

    let gate = manager
        .connect::<dyn Gate>(&mock_address("gate"), "acme.gate", &cancel)
        .await
        .unwrap();

    assert_eq!(gate.status(), DeviceStatus::NotInitialized);
    assert!(spy.last().is_open());

    gate.connect(&cancel).await.unwrap();
    assert_eq!(gate.status(), DeviceStatus::Ready);
    assert_eq!(spy.last().open_count(), 1);
}

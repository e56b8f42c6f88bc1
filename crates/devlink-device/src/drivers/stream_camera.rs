use super::DEFAULT_MODEL;
use crate::capabilities::{CameraDriver, send_all};
use crate::managed::DeviceDriver;
use crate::settings::DriverSettings;
use crate::traits::Frame;
use async_trait::async_trait;
use chrono::Utc;
use devlink_core::{CancellationToken, DeviceInfo, Result};
use devlink_transport::{AnyConnection, Connection};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Camera that answers a request with one frame per read.
///
/// With an empty `frame_request` the camera is assumed to push frames on its
/// own and every read is one frame.
#[derive(Debug)]
pub struct StreamCamera {
    model: String,
    init: Vec<u8>,
    frame_request: Vec<u8>,
    max_frame_bytes: usize,
    frame_interval: Duration,
    sequence: AtomicU64,
}

impl StreamCamera {
    pub fn new(frame_request: impl Into<Vec<u8>>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            init: Vec::new(),
            frame_request: frame_request.into(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            frame_interval: Duration::ZERO,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &DriverSettings) -> Result<Self> {
        let mut camera = Self::new(settings.bytes("frame_request")?.unwrap_or_default());
        if let Some(model) = settings.get("model") {
            camera.model = model.to_string();
        }
        if let Some(init) = settings.bytes("init")? {
            camera.init = init;
        }
        if let Some(max) = settings.parsed::<usize>("max_frame_bytes")? {
            camera.max_frame_bytes = max.max(1);
        }
        if let Some(interval) = settings.parsed::<u64>("frame_interval_ms")? {
            camera.frame_interval = Duration::from_millis(interval);
        }
        Ok(camera)
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max.max(1);
        self
    }

    /// Number of frames captured so far.
    pub fn frames_captured(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeviceDriver for StreamCamera {
    async fn setup(&self, connection: &mut AnyConnection, cancel: &CancellationToken) -> Result<()> {
        if !self.init.is_empty() {
            send_all(connection, &self.init, cancel).await?;
        }
        Ok(())
    }

    async fn query_info(&self, connection: &mut AnyConnection, _cancel: &CancellationToken) -> Result<DeviceInfo> {
        Ok(DeviceInfo::new("Stream camera", self.model.clone())
            .with_property("endpoint", connection.info())
            .with_property("frames_captured", self.frames_captured().to_string()))
    }
}

#[async_trait]
impl CameraDriver for StreamCamera {
    async fn capture(&self, connection: &mut AnyConnection, cancel: &CancellationToken) -> Result<Frame> {
        if !self.frame_request.is_empty() {
            send_all(connection, &self.frame_request, cancel).await?;
        }
        let data = connection.receive(self.max_frame_bytes, cancel).await?;

        Ok(Frame {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            data,
            captured_at: Utc::now(),
        })
    }

    fn frame_interval(&self) -> Duration {
        self.frame_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_core::Error;

    #[test]
    fn test_from_settings() {
        let settings = DriverSettings::new()
            .with("frame_request", "46")
            .with("max_frame_bytes", "512")
            .with("frame_interval_ms", "40")
            .with("model", "X-100");

        let camera = StreamCamera::from_settings(&settings).unwrap();
        assert_eq!(camera.frame_request, vec![0x46]);
        assert_eq!(camera.max_frame_bytes, 512);
        assert_eq!(camera.frame_interval, Duration::from_millis(40));
        assert_eq!(camera.model, "X-100");
    }

    #[test]
    fn test_from_settings_rejects_bad_hex() {
        let settings = DriverSettings::new().with("frame_request", "F");
        assert!(matches!(
            StreamCamera::from_settings(&settings),
            Err(Error::Configuration { .. })
        ));
    }
}

//! Boundaries to external collaborators.
//!
//! Vendor byte protocols and OS device services are not part of the framework.
//! Devices reach them through these two traits:
//!
//! - [`CommandEncoder`] turns intents into vendor bytes that the device hands to
//!   `Connection::send`. The framework never inspects the bytes.
//! - [`PlatformBackend`] is the out-of-band service behind an `embedded`
//!   connection. Only the concrete device calls it.

use async_trait::async_trait;
use bytes::Bytes;
use devlink_core::Result;

/// Pure vendor command builder.
pub trait CommandEncoder: Send + Sync {
    /// Bytes that reset the device to its power-on state.
    fn build_initialize(&self) -> Vec<u8>;

    /// Wrap caller-supplied bytes for transmission.
    fn build_raw(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    /// Encode a line of text.
    fn build_text(&self, text: &str) -> Vec<u8>;

    /// Paper cut (printers) or the vendor's equivalent end-of-job command.
    fn build_cut(&self) -> Vec<u8>;
}

/// Out-of-band platform service for devices without a byte channel.
#[async_trait]
pub trait PlatformBackend: Send + Sync {
    /// Resource names the platform currently exposes.
    async fn list_available(&self) -> Result<Vec<String>>;

    /// Whether `name` is currently exposed.
    async fn is_available(&self, name: &str) -> Result<bool> {
        Ok(self.list_available().await?.iter().any(|n| n == name))
    }

    /// Run a platform action against `name`.
    async fn perform_action(&self, name: &str, payload: &[u8]) -> Result<Bytes>;
}

/// Plain-text encoder: UTF-8 text with a trailing newline, `ESC @` to
/// initialize and `GS V 0` to cut.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextEncoder;

impl CommandEncoder for PlainTextEncoder {
    fn build_initialize(&self) -> Vec<u8> {
        vec![0x1B, b'@']
    }

    fn build_text(&self, text: &str) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(b'\n');
        bytes
    }

    fn build_cut(&self) -> Vec<u8> {
        vec![0x1D, b'V', 0x00]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend(Vec<String>);

    #[async_trait]
    impl PlatformBackend for FixedBackend {
        async fn list_available(&self) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }

        async fn perform_action(&self, _name: &str, payload: &[u8]) -> Result<Bytes> {
            Ok(Bytes::copy_from_slice(payload))
        }
    }

    #[test]
    fn test_plain_text_encoder() {
        let encoder = PlainTextEncoder;
        assert_eq!(encoder.build_text("hi"), b"hi\n");
        assert_eq!(encoder.build_raw(&[1, 2]), vec![1, 2]);
        assert_eq!(encoder.build_initialize(), vec![0x1B, 0x40]);
    }

    #[tokio::test]
    async fn test_is_available_default() {
        let backend = FixedBackend(vec!["flatbed".into()]);
        assert!(backend.is_available("flatbed").await.unwrap());
        assert!(!backend.is_available("feeder").await.unwrap());
    }
}

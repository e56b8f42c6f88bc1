use super::DEFAULT_MODEL;
use crate::boundary::{CommandEncoder, PlainTextEncoder};
use crate::capabilities::{PrinterDriver, send_all};
use crate::managed::DeviceDriver;
use crate::settings::DriverSettings;
use async_trait::async_trait;
use devlink_core::{CancellationToken, DeviceInfo, Result};
use devlink_transport::{AnyConnection, Connection};

/// Printer driven through a [`CommandEncoder`].
pub struct EncodedPrinter {
    model: String,
    encoder: Box<dyn CommandEncoder>,
}

impl std::fmt::Debug for EncodedPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedPrinter")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl EncodedPrinter {
    pub fn new(encoder: impl CommandEncoder + 'static) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            encoder: Box::new(encoder),
        }
    }

    /// Plain-text printer configured from manifest settings.
    pub fn from_settings(settings: &DriverSettings) -> Result<Self> {
        let mut printer = Self::new(PlainTextEncoder);
        if let Some(model) = settings.get("model") {
            printer.model = model.to_string();
        }
        Ok(printer)
    }
}

#[async_trait]
impl DeviceDriver for EncodedPrinter {
    async fn setup(&self, connection: &mut AnyConnection, cancel: &CancellationToken) -> Result<()> {
        let init = self.encoder.build_initialize();
        send_all(connection, &init, cancel).await
    }

    async fn query_info(&self, connection: &mut AnyConnection, _cancel: &CancellationToken) -> Result<DeviceInfo> {
        Ok(DeviceInfo::new("Printer", self.model.clone()).with_property("endpoint", connection.info()))
    }
}

impl PrinterDriver for EncodedPrinter {
    fn encoder(&self) -> &dyn CommandEncoder {
        self.encoder.as_ref()
    }
}

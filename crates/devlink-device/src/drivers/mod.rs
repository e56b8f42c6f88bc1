//! Reference drivers.
//!
//! Generic drivers configured entirely by [`DriverSettings`](crate::DriverSettings),
//! so a plugin manifest can describe simple devices without vendor code.
//!
//! | driver | capability | settings |
//! |---|---|---|
//! | [`StreamCamera`] | camera | `frame_request`, `max_frame_bytes`, `frame_interval_ms`, `init`, `model` |
//! | [`EncodedPrinter`] | printer | `model` |
//! | [`RelayGate`] | gate | `open`, `close`, `ack`, `model` |
//! | [`BackendScanner`] | scanner | `action`, `model` |

mod backend_scanner;
mod encoded_printer;
mod relay_gate;
mod stream_camera;

pub use backend_scanner::BackendScanner;
pub use encoded_printer::EncodedPrinter;
pub use relay_gate::RelayGate;
pub use stream_camera::StreamCamera;

use devlink_core::{CancellationToken, Result};
use devlink_transport::{AnyConnection, Connection};

const DEFAULT_MODEL: &str = "generic";

/// Read until exactly `len` bytes arrived.
async fn receive_exact(connection: &mut AnyConnection, len: usize, cancel: &CancellationToken) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(len);
    while buffer.len() < len {
        let chunk = connection.receive(len - buffer.len(), cancel).await?;
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

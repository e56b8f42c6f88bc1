//! Timed, cancellable I/O over byte streams.
//!
//! Shared by the transports backed by `AsyncRead + AsyncWrite` streams (TCP and
//! serial). Each helper races the operation against the cancellation token and
//! a configured timeout and maps failures onto connection faults naming the
//! endpoint.

use bytes::{Bytes, BytesMut};
use devlink_core::constants::CLOSE_TIMEOUT_MS;
use devlink_core::{CancellationToken, ConnectionFaultKind, Error, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Write all of `data`.
pub(crate) async fn write_all<S>(
    stream: &mut S,
    data: &[u8],
    timeout: Duration,
    cancel: &CancellationToken,
    endpoint: &str,
) -> Result<usize>
where
    S: AsyncWrite + Unpin,
{
    trace!(endpoint, len = data.len(), "Writing");

    let write = async {
        stream.write_all(data).await?;
        stream.flush().await
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(timeout, write) => match result {
            Ok(Ok(())) => Ok(data.len()),
            Ok(Err(e)) => Err(Error::from_io(endpoint, e)),
            Err(_) => Err(Error::connection_timeout(endpoint, timeout.as_millis() as u64)),
        },
    }
}

/// Read at most `max_bytes`. A zero-length read means the peer closed the
/// channel and is reported as a [`ConnectionFaultKind::Closed`] fault.
pub(crate) async fn read_some<S>(
    stream: &mut S,
    max_bytes: usize,
    timeout: Duration,
    cancel: &CancellationToken,
    endpoint: &str,
) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    if max_bytes == 0 {
        return Ok(Bytes::new());
    }

    let mut buffer = BytesMut::zeroed(max_bytes);

    let read = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        result = tokio::time::timeout(timeout, stream.read(&mut buffer)) => result,
    };

    match read {
        Ok(Ok(0)) => Err(Error::connection(
            ConnectionFaultKind::Closed,
            endpoint,
            "Peer closed the connection",
        )),
        Ok(Ok(n)) => {
            trace!(endpoint, len = n, "Read");
            buffer.truncate(n);
            Ok(buffer.freeze())
        }
        Ok(Err(e)) => Err(Error::from_io(endpoint, e)),
        Err(_) => Err(Error::connection_timeout(endpoint, timeout.as_millis() as u64)),
    }
}

/// Flush and shut down a stream, bounding each step so a dead peer cannot
/// hang the close path. Errors are logged, not returned.
pub(crate) async fn shutdown<S>(stream: &mut S, endpoint: &str)
where
    S: AsyncWrite + Unpin,
{
    let budget = Duration::from_millis(CLOSE_TIMEOUT_MS);

    match tokio::time::timeout(budget, stream.flush()).await {
        Ok(Ok(())) => debug!(endpoint, "Flush completed"),
        Ok(Err(e)) => warn!(endpoint, error = %e, "Error flushing during close"),
        Err(_) => warn!(endpoint, "Flush timeout during close ({}ms)", budget.as_millis()),
    }

    match tokio::time::timeout(budget, stream.shutdown()).await {
        Ok(Ok(())) => debug!(endpoint, "Shutdown completed"),
        Ok(Err(e)) => warn!(endpoint, error = %e, "Error during shutdown"),
        Err(_) => warn!(endpoint, "Shutdown timeout during close ({}ms)", budget.as_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut a, mut b) = duplex(64);
        let cancel = CancellationToken::new();
        let timeout = Duration::from_millis(500);

        let written = write_all(&mut a, b"ping", timeout, &cancel, "test").await.unwrap();
        assert_eq!(written, 4);

        let data = read_some(&mut b, 16, timeout, &cancel, "test").await.unwrap();
        assert_eq!(&data[..], b"ping");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_is_not_cancellation() {
        let (_a, mut b) = duplex(64);
        let cancel = CancellationToken::new();

        let error = read_some(&mut b, 16, Duration::from_millis(100), &cancel, "test")
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            Error::Connection {
                kind: ConnectionFaultKind::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_read_cancelled() {
        let (_a, mut b) = duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = read_some(&mut b, 16, Duration::from_secs(5), &cancel, "test")
            .await
            .unwrap_err();
        assert!(error.is_cancelled());
    }

    #[tokio::test]
    async fn test_read_after_peer_close() {
        let (a, mut b) = duplex(64);
        drop(a);
        let cancel = CancellationToken::new();

        let error = read_some(&mut b, 16, Duration::from_secs(1), &cancel, "test")
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            Error::Connection {
                kind: ConnectionFaultKind::Closed,
                ..
            }
        ));
    }
}

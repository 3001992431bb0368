//! Streaming echo pump.
//!
//! The accept loop hands every inbound stream to its own detached pump task,
//! so accept throughput is never limited by echo processing time and a
//! broken stream cannot take down its siblings or the loop itself. Each pump
//! reads until the peer signals end-of-stream, echoing bytes back when in
//! echo mode, then performs a bounded cooperative close.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::relay::{RelayListener, RelayStream};

/// Read buffer of a single pump.
pub const PUMP_BUFFER_BYTES: usize = 64 * 1024;

/// Bound on the cooperative close after end-of-stream.
pub const STREAM_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after an accept failure so a persistent error cannot spin the CPU.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Accept inbound streams until the listener shuts down.
///
/// Every accepted stream gets an independent pump task and the loop goes
/// straight back to accepting. `accept_stream` yielding `None` means the
/// listener closed; errors are logged and retried after a short pause.
pub async fn run_accept_loop(listener: Arc<dyn RelayListener>, echo: bool) {
    loop {
        match listener.accept_stream().await {
            Ok(Some(stream)) => {
                let tracking_id = stream.tracking_id().to_string();
                debug!(tracking_id = %tracking_id, "stream accepted");
                tokio::spawn(async move {
                    if let Err(e) = pump_stream(stream, echo).await {
                        warn!(tracking_id = %tracking_id, error = %e, "stream pump terminated");
                    }
                });
            }
            Ok(None) => {
                debug!("listener shut down, leaving accept loop");
                break;
            }
            Err(e) => {
                warn!(error = %e, "accept failed, retrying");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Read/echo loop for one stream.
///
/// A zero-length read means the peer ended the stream: close cooperatively
/// within [`STREAM_CLOSE_TIMEOUT`] and stop. In echo mode every chunk read
/// is written back before the next read.
pub async fn pump_stream(mut stream: Box<dyn RelayStream>, echo: bool) -> Result<()> {
    let mut buf = vec![0u8; PUMP_BUFFER_BYTES];
    let mut total: u64 = 0;

    loop {
        let n = stream
            .read(&mut buf)
            .await
            .context("stream read failed")?;

        if n == 0 {
            tokio::time::timeout(STREAM_CLOSE_TIMEOUT, stream.shutdown())
                .await
                .map_err(|_| anyhow!("stream close timed out after {:?}", STREAM_CLOSE_TIMEOUT))?
                .context("stream close failed")?;
            debug!(tracking_id = %stream.tracking_id(), total, "stream drained and closed");
            return Ok(());
        }

        total += n as u64;
        if echo {
            stream
                .write_all(&buf[..n])
                .await
                .context("echo write failed")?;
        }
    }
}

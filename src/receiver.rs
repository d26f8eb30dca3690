//! Packet receiver: reads echoed frames back and records their arrival.

use crate::frame::{decode, read_frame, HEADER_SIZE};
use crate::ledger::{PacketLedger, ReceivedRecord};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::time;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    pub packet_size: usize,
    /// Longest wait for the next frame before the path is considered dead
    pub read_timeout: Duration,
}

/// Reads frames from `reader` until `shutdown` is cancelled or the peer
/// closes the stream.
///
/// Every complete frame becomes a `ReceivedRecord` carrying its claimed
/// checksum and payload; the payload is not verified here. A stream that ends
/// part way through a frame drops that frame and ends the loop.
///
/// Returns the number of frames recorded.
///
/// # Errors
///
/// A read failure or a read that stalls past `read_timeout` cancels
/// `escalate` and is returned as `Error::Connection`.
pub async fn run_receiver<R>(
    mut reader: R,
    ledger: PacketLedger,
    options: ReceiverOptions,
    shutdown: CancellationToken,
    escalate: CancellationToken,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; HEADER_SIZE + options.packet_size];
    let mut frames_received = 0u64;

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = time::timeout(options.read_timeout, read_frame(&mut reader, &mut buf)) => result,
        };

        match read {
            Ok(Ok(true)) => {
                let received_at = Instant::now();
                match decode(&buf, options.packet_size) {
                    Ok(frame) => {
                        ledger.record_received(ReceivedRecord::new(
                            frame.sequence,
                            received_at,
                            frame.checksum,
                            frame.payload,
                        ));
                        frames_received += 1;
                    }
                    Err(e) => debug!("Dropping frame: {}", e),
                }
            }
            Ok(Ok(false)) => {
                info!("Echo stream closed by peer");
                break;
            }
            Ok(Err(Error::MalformedFrame { expected, actual })) => {
                warn!(
                    "Echo stream ended inside a frame ({} of {} bytes), dropping it",
                    actual, expected
                );
                break;
            }
            Ok(Err(e)) => {
                error!("Error receiving echo: {}", e);
                escalate.cancel();
                return Err(Error::Connection(format!("receive failed: {}", e)));
            }
            Err(_) => {
                error!(
                    "No echo received for {:.1}s, giving up",
                    options.read_timeout.as_secs_f64()
                );
                escalate.cancel();
                return Err(Error::Connection(format!(
                    "no echo within {:?}",
                    options.read_timeout
                )));
            }
        }
    }

    info!("Receiver finished after {} frames", frames_received);
    Ok(frames_received)
}

//! Packet sender: writes numbered frames until the run ends.

use crate::frame::{encode_into, HEADER_SIZE};
use crate::ledger::PacketLedger;
use crate::token_bucket::TokenBucket;
use crate::{Error, Result};
use log::{debug, error, info, warn};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Parameters the sender needs for one run.
#[derive(Debug, Clone)]
pub struct SenderOptions {
    pub packet_size: usize,
    /// Wall-clock end of the run
    pub deadline: Instant,
    /// Optional pacing target in bits per second
    pub bandwidth: Option<u64>,
}

/// Generates and writes frames until `deadline` or until `stop` is cancelled.
///
/// Each frame carries a fresh pseudo-random payload and the next sequence
/// number, starting at 0. The send time is recorded in the ledger before the
/// write is attempted, so latency includes local queueing.
///
/// Returns the number of frames fully written.
///
/// # Errors
///
/// A write failure cancels `stop`, so the rest of the run winds down, and is
/// returned as `Error::Connection`. It is never retried.
pub async fn run_sender<W>(
    mut writer: W,
    ledger: PacketLedger,
    options: SenderOptions,
    stop: CancellationToken,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let frame_size = HEADER_SIZE + options.packet_size;
    let mut rng = SmallRng::from_os_rng();
    let mut payload = vec![0u8; options.packet_size];
    let mut frame = Vec::with_capacity(frame_size);
    let mut bucket = options
        .bandwidth
        .map(|bps| TokenBucket::new(bps, frame_size));

    let mut sequence: u32 = 0;
    let mut frames_sent = 0u64;

    let deadline = time::sleep_until(options.deadline.into());
    tokio::pin!(deadline);

    info!(
        "Sender started: {} byte payloads, {}",
        options.packet_size,
        match options.bandwidth {
            Some(bps) => format!("paced at {} bps", bps),
            None => "best effort".to_string(),
        }
    );

    loop {
        if stop.is_cancelled() || Instant::now() >= options.deadline {
            break;
        }

        if let Some(bucket) = bucket.as_mut() {
            tokio::select! {
                _ = bucket.consume(frame_size) => {}
                _ = stop.cancelled() => break,
                _ = &mut deadline => break,
            }
        }

        rng.fill_bytes(&mut payload);
        encode_into(&mut frame, sequence, &payload);

        ledger.record_sent(sequence, Instant::now());

        let written = tokio::select! {
            biased;
            result = writer.write_all(&frame) => result,
            _ = stop.cancelled() => break,
            _ = &mut deadline => break,
        };

        if let Err(e) = written {
            error!("Error sending frame {}: {}", sequence, e);
            stop.cancel();
            return Err(Error::Connection(format!(
                "send failed after {} frames: {}",
                frames_sent, e
            )));
        }

        frames_sent += 1;
        sequence = match sequence.checked_add(1) {
            Some(next) => next,
            None => {
                warn!("Sequence space exhausted, ending send loop early");
                break;
            }
        };

        if bucket.is_none() {
            tokio::task::yield_now().await;
        }
    }

    if let Err(e) = writer.flush().await {
        debug!("Flush after send loop failed: {}", e);
    }

    info!("Sender finished after {} frames", frames_sent);
    Ok(frames_sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, verify_checksum};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// Writer that fails every write.
    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_frames_are_numbered_from_zero() {
        let (client, mut server) = tokio::io::duplex(1 << 20);
        let ledger = PacketLedger::new();
        let options = SenderOptions {
            packet_size: 16,
            deadline: Instant::now() + Duration::from_millis(100),
            // 24 bytes per frame at 9.6 kbit/s: ~50 frames/s
            bandwidth: Some(9_600),
        };

        let sent = run_sender(client, ledger.clone(), options, CancellationToken::new())
            .await
            .unwrap();
        assert!(sent > 0);
        assert_eq!(ledger.sent_count(), sent);

        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut bytes)
            .await
            .unwrap();
        assert_eq!(bytes.len() as u64, sent * 24);

        for (expected, chunk) in bytes.chunks(24).enumerate() {
            let frame = decode(chunk, 16).unwrap();
            assert_eq!(frame.sequence, expected as u32);
            assert!(verify_checksum(frame.checksum, &frame.payload).is_ok());
        }
    }

    #[tokio::test]
    async fn test_write_failure_stops_the_run() {
        let stop = CancellationToken::new();
        let ledger = PacketLedger::new();
        let options = SenderOptions {
            packet_size: 8,
            deadline: Instant::now() + Duration::from_secs(5),
            bandwidth: None,
        };

        let result = run_sender(BrokenPipe, ledger.clone(), options, stop.clone()).await;

        assert!(matches!(result, Err(Error::Connection(_))));
        assert!(stop.is_cancelled());
        // the send time is recorded before the write is attempted
        assert_eq!(ledger.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let stop = CancellationToken::new();
        stop.cancel();
        let (client, _server) = tokio::io::duplex(64);
        let options = SenderOptions {
            packet_size: 8,
            deadline: Instant::now() + Duration::from_secs(5),
            bandwidth: None,
        };

        let sent = run_sender(client, PacketLedger::new(), options, stop)
            .await
            .unwrap();
        assert_eq!(sent, 0);
    }
}

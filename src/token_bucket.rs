//! Token bucket pacing for the packet sender.
//!
//! Tokens are bytes. They accrue at the target rate up to a burst capacity of
//! a tenth of a second's worth of traffic (never less than one frame), and
//! each frame spends its full wire size. When the bucket runs dry the sender
//! sleeps just long enough for the deficit to refill.
//!
//! Without a configured bandwidth the sender does not use a bucket at all and
//! runs at best effort.

use std::time::{Duration, Instant};
use tokio::time;

/// Sleeps shorter than this are skipped; the deficit carries to the next frame.
const MIN_SLEEP: Duration = Duration::from_micros(10);

pub struct TokenBucket {
    pub bytes_per_sec: u64,
    tokens: i64,
    capacity: i64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a bucket for `bits_per_sec`, sized for frames of `frame_size` bytes.
    pub fn new(bits_per_sec: u64, frame_size: usize) -> Self {
        let bytes_per_sec = (bits_per_sec / 8).max(1);
        let capacity = (bytes_per_sec / 10).max(frame_size as u64) as i64;

        Self {
            bytes_per_sec,
            tokens: capacity,
            capacity,
            last_refill: Instant::now(),
        }
    }

    /// Spends `bytes` tokens, returning how long the caller must wait before
    /// the bucket is back in credit.
    pub fn take(&mut self, bytes: usize) -> Option<Duration> {
        self.refill(Instant::now());
        self.tokens -= bytes as i64;

        if self.tokens >= 0 {
            return None;
        }

        let deficit = self.tokens.unsigned_abs();
        let wait = Duration::from_nanos(deficit.saturating_mul(1_000_000_000) / self.bytes_per_sec);
        (wait > MIN_SLEEP).then_some(wait)
    }

    /// Spends `bytes` tokens, sleeping if the bucket is overdrawn.
    pub async fn consume(&mut self, bytes: usize) {
        if let Some(wait) = self.take(bytes) {
            time::sleep(wait).await;
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed_micros = now.saturating_duration_since(self.last_refill).as_micros() as u64;
        let tokens_to_add = elapsed_micros.saturating_mul(self.bytes_per_sec) / 1_000_000;

        if tokens_to_add > 0 {
            self.tokens = (self.tokens + tokens_to_add as i64).min(self.capacity);
            self.last_refill = now;
        }
    }
}

//! Real-time sample reporting.
//!
//! The sampler hands every sample to a separate reporting task so that
//! console formatting and user callbacks never run while the ledger lock is
//! held or delay the next tick.

use crate::client::{ProgressCallback, ProgressEvent};
use crate::measurements::MetricSample;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Message sent to the reporting task
///
/// # Examples
///
/// ```
/// use echoperf::interval_reporter::IntervalMessage;
///
/// let msg = IntervalMessage::Complete;
///
/// match msg {
///     IntervalMessage::Complete => println!("Run finished"),
///     IntervalMessage::Report(_) => println!("Sample"),
/// }
/// ```
#[derive(Debug, Clone)]
pub enum IntervalMessage {
    /// A freshly taken sample
    Report(MetricSample),
    /// No more samples will follow
    Complete,
}

/// Handle for sending samples to the reporting task
#[derive(Clone)]
pub struct IntervalReporter {
    sender: mpsc::UnboundedSender<IntervalMessage>,
}

impl IntervalReporter {
    /// Creates a new reporter.
    ///
    /// Returns the reporter and the receiver that `run_reporter_task` drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IntervalMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn report(&self, sample: MetricSample) {
        let _ = self.sender.send(IntervalMessage::Report(sample));
    }

    pub fn complete(&self) {
        let _ = self.sender.send(IntervalMessage::Complete);
    }
}

/// Drains reported samples, printing each one and forwarding it to the
/// callback, until `Complete` arrives or every reporter is dropped.
pub async fn run_reporter_task(
    mut receiver: mpsc::UnboundedReceiver<IntervalMessage>,
    json_mode: bool,
    callback: Option<Arc<dyn ProgressCallback>>,
) {
    while let Some(msg) = receiver.recv().await {
        match msg {
            IntervalMessage::Report(sample) => {
                if let Some(ref cb) = callback {
                    cb.on_progress(ProgressEvent::Sample(sample));
                }

                if !json_mode {
                    println!("{}", format_sample(&sample));
                }
            }
            IntervalMessage::Complete => break,
        }
    }
}

/// Formats a bit rate as bits/sec, Kbits/sec, Mbits/sec or Gbits/sec.
pub fn format_bitrate(bps: f64) -> String {
    if bps >= 1_000_000_000.0 {
        format!("{:.2} Gbits/sec", bps / 1_000_000_000.0)
    } else if bps >= 1_000_000.0 {
        format!("{:.2} Mbits/sec", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.2} Kbits/sec", bps / 1_000.0)
    } else {
        format!("{:.2} bits/sec", bps)
    }
}

/// One console line per sample.
pub fn format_sample(sample: &MetricSample) -> String {
    format!(
        "[{:6.2}s] Bandwidth: {}, Latency: {:.3} ms, Jitter: {:.3} ms, Packet Loss: {:.2}%, Corrupt: {}, Out-of-Order: {}",
        sample.elapsed_time,
        format_bitrate(sample.bandwidth_bps),
        sample.avg_latency * 1000.0,
        sample.jitter * 1000.0,
        sample.packet_loss_pct,
        sample.corrupt_count,
        sample.reorder_count
    )
}

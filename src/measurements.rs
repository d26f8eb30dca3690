use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Column headers used when samples are persisted as CSV.
pub const CSV_HEADERS: [&str; 7] = [
    "Time",
    "Bandwidth(bps)",
    "Latency(s)",
    "Jitter(s)",
    "Packet Loss(%)",
    "Corrupt Packets",
    "Out-of-Order Packets",
];

/// One sampling tick's view of the whole run so far.
///
/// Samples are full-history snapshots, not deltas: each one is recomputed
/// from every sent and received record. Times are in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Seconds since test start
    pub elapsed_time: f64,
    /// Received payload bits per second of elapsed time
    pub bandwidth_bps: f64,
    /// Mean round-trip latency of matched frames
    pub avg_latency: f64,
    /// Mean absolute deviation of latency around `avg_latency`
    pub jitter: f64,
    /// Share of sent frames with no echo yet, in percent
    pub packet_loss_pct: f64,
    /// Matched frames whose payload no longer hashes to its checksum
    pub corrupt_count: u64,
    /// Matched frames that arrived after a higher sequence number
    pub reorder_count: u64,
}

impl MetricSample {
    /// Values in `CSV_HEADERS` order.
    pub fn to_record(&self) -> [String; 7] {
        [
            self.elapsed_time.to_string(),
            self.bandwidth_bps.to_string(),
            self.avg_latency.to_string(),
            self.jitter.to_string(),
            self.packet_loss_pct.to_string(),
            self.corrupt_count.to_string(),
            self.reorder_count.to_string(),
        ]
    }
}

/// Accumulates matched frames for one sample.
///
/// Frames must be observed in arrival order for reordering to be counted.
#[derive(Debug, Default)]
pub struct SampleBuilder {
    latencies: Vec<f64>,
    corrupt: u64,
    reordered: u64,
    highest_seen: Option<u32>,
}

impl SampleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one frame present in both the sent and received sets.
    pub fn observe(&mut self, sequence: u32, latency_secs: f64, intact: bool) {
        self.latencies.push(latency_secs);

        if !intact {
            self.corrupt += 1;
        }

        match self.highest_seen {
            Some(highest) if sequence < highest => self.reordered += 1,
            Some(highest) if sequence == highest => {}
            _ => self.highest_seen = Some(sequence),
        }
    }

    pub fn matched(&self) -> usize {
        self.latencies.len()
    }

    /// Finalizes the sample.
    ///
    /// # Arguments
    ///
    /// * `sent` - Number of frames sent so far
    /// * `received` - Number of frames read back so far, matched or not;
    ///   only bandwidth uses it, loss counts matched frames
    /// * `packet_size` - Payload bytes per frame
    /// * `elapsed_secs` - Seconds since test start
    pub fn finish(
        self,
        sent: u64,
        received: u64,
        packet_size: usize,
        elapsed_secs: f64,
    ) -> MetricSample {
        let packet_loss_pct = if sent > 0 {
            (sent.saturating_sub(self.matched() as u64) as f64 / sent as f64) * 100.0
        } else {
            0.0
        };

        let avg_latency = mean(&self.latencies);
        let jitter = mean_absolute_deviation(&self.latencies);

        let bandwidth_bps = if elapsed_secs > 0.0 {
            (received as f64 * packet_size as f64 * 8.0) / elapsed_secs
        } else {
            0.0
        };

        MetricSample {
            elapsed_time: elapsed_secs,
            bandwidth_bps,
            avg_latency,
            jitter,
            packet_loss_pct,
            corrupt_count: self.corrupt,
            reorder_count: self.reordered,
        }
    }
}

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean absolute deviation from the mean, 0 for fewer than two values.
///
/// This is dispersion around the mean, not RFC 3550 inter-arrival jitter.
pub fn mean_absolute_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    values.iter().map(|v| (v - avg).abs()).sum::<f64>() / values.len() as f64
}

/// Thread-safe, append-only sample series.
#[derive(Debug, Clone, Default)]
pub struct SampleSeries {
    inner: Arc<Mutex<Vec<MetricSample>>>,
}

impl SampleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, sample: MetricSample) {
        self.inner.lock().push(sample);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn last(&self) -> Option<MetricSample> {
        self.inner.lock().last().copied()
    }

    /// Copy of every sample taken so far, in tick order.
    pub fn get(&self) -> Vec<MetricSample> {
        self.inner.lock().clone()
    }
}

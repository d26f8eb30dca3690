//! Shared store of sent and received frame records.
//!
//! The sender, the receiver and the sampler all share one `PacketLedger`.
//! Every access goes through a single lock: writers hold it for one insert,
//! the sampler holds it for one full snapshot computation. No lock is ever
//! held across network I/O.
//!
//! Send timestamps live in an arena indexed by sequence number. Received
//! records are kept in arrival order with an index by sequence number, so a
//! sample can walk matched frames in the order they came back.

use crate::frame::verify_checksum;
use log::debug;
use crate::measurements::{MetricSample, SampleBuilder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Integrity of a received payload.
///
/// The payload is kept until the first sample verifies it; the verdict is
/// cached so later full-history samples agree with earlier ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    Pending(Vec<u8>),
    Intact,
    Corrupt,
}

/// A frame read back from the echo server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRecord {
    pub sequence: u32,
    pub received_at: Instant,
    /// Checksum the frame claimed on the wire
    pub checksum: u32,
    pub integrity: Integrity,
}

impl ReceivedRecord {
    pub fn new(sequence: u32, received_at: Instant, checksum: u32, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            received_at,
            checksum,
            integrity: Integrity::Pending(payload),
        }
    }

    /// Resolves a pending payload against the claimed checksum.
    fn verify(&mut self) -> bool {
        if let Integrity::Pending(payload) = &self.integrity {
            self.integrity = match verify_checksum(self.checksum, payload) {
                Ok(()) => Integrity::Intact,
                Err(e) => {
                    debug!("Frame {} failed verification: {}", self.sequence, e);
                    Integrity::Corrupt
                }
            };
        }
        self.integrity == Integrity::Intact
    }
}

/// Sent and received records for one run.
#[derive(Debug, Default)]
pub struct LedgerState {
    sent: Vec<Option<Instant>>,
    sent_count: u64,
    received: Vec<ReceivedRecord>,
    by_sequence: HashMap<u32, usize>,
}

impl LedgerState {
    pub fn record_sent(&mut self, sequence: u32, sent_at: Instant) {
        let slot = sequence as usize;
        if slot >= self.sent.len() {
            self.sent.resize(slot + 1, None);
        }
        if self.sent[slot].replace(sent_at).is_none() {
            self.sent_count += 1;
        }
    }

    /// Stores a received record. A repeated sequence number replaces the
    /// earlier record but keeps its arrival position.
    pub fn record_received(&mut self, record: ReceivedRecord) {
        match self.by_sequence.get(&record.sequence) {
            Some(&index) => self.received[index] = record,
            None => {
                self.by_sequence.insert(record.sequence, self.received.len());
                self.received.push(record);
            }
        }
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count
    }

    pub fn received_count(&self) -> u64 {
        self.received.len() as u64
    }

    pub fn sent_at(&self, sequence: u32) -> Option<Instant> {
        self.sent.get(sequence as usize).copied().flatten()
    }

    pub fn received(&self, sequence: u32) -> Option<&ReceivedRecord> {
        self.by_sequence
            .get(&sequence)
            .map(|&index| &self.received[index])
    }

    /// Computes a full-history sample.
    ///
    /// Frames present in both sets contribute a latency, a checksum
    /// verdict and a reorder check, walked in arrival order.
    pub fn sample(&mut self, packet_size: usize, elapsed: Duration) -> MetricSample {
        let mut builder = SampleBuilder::new();
        let sent = &self.sent;

        for record in self.received.iter_mut() {
            let Some(sent_at) = sent.get(record.sequence as usize).copied().flatten() else {
                continue;
            };
            let latency = record.received_at.saturating_duration_since(sent_at);
            let intact = record.verify();
            builder.observe(record.sequence, latency.as_secs_f64(), intact);
        }

        builder.finish(
            self.sent_count,
            self.received.len() as u64,
            packet_size,
            elapsed.as_secs_f64(),
        )
    }
}

/// Cloneable handle to the shared ledger.
#[derive(Debug, Clone, Default)]
pub struct PacketLedger {
    inner: Arc<Mutex<LedgerState>>,
}

impl PacketLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, sequence: u32, sent_at: Instant) {
        self.inner.lock().record_sent(sequence, sent_at);
    }

    pub fn record_received(&self, record: ReceivedRecord) {
        self.inner.lock().record_received(record);
    }

    pub fn sent_count(&self) -> u64 {
        self.inner.lock().sent_count()
    }

    pub fn received_count(&self) -> u64 {
        self.inner.lock().received_count()
    }

    /// Takes one sample under the lock.
    pub fn sample(&self, packet_size: usize, elapsed: Duration) -> MetricSample {
        self.inner.lock().sample(packet_size, elapsed)
    }

    /// Runs `f` with exclusive access to the records.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut LedgerState) -> T) -> T {
        f(&mut self.inner.lock())
    }
}

//! Metrics sampler: turns the ledger into a time series on a fixed schedule.

use crate::interval_reporter::IntervalReporter;
use crate::ledger::PacketLedger;
use crate::measurements::SampleSeries;
use log::{debug, info};
use std::time::{Duration, Instant};
use tokio::time;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SamplerOptions {
    /// Test start; ticks are scheduled at `start + k * interval`
    pub start: Instant,
    pub duration: Duration,
    pub interval: Duration,
    pub packet_size: usize,
}

/// Number of ticks a full run of `duration` produces.
pub fn planned_ticks(duration: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 0;
    }
    (duration.as_nanos() / interval.as_nanos()).min(u32::MAX as u128) as u32
}

/// Takes one sample per interval until the schedule is exhausted or `stop`
/// is cancelled.
///
/// Ticks are anchored to `start`, so they do not drift. When `stop` fires
/// after the run has reached its full duration the tick that was due is
/// still taken, which makes a completed run yield exactly
/// `planned_ticks(duration, interval)` samples. An early stop takes no
/// further samples.
///
/// Returns the number of samples taken.
pub async fn run_sampler(
    ledger: PacketLedger,
    series: SampleSeries,
    reporter: Option<IntervalReporter>,
    options: SamplerOptions,
    stop: CancellationToken,
) -> u32 {
    let planned = planned_ticks(options.duration, options.interval);
    let run_end = options.start + options.duration;
    let mut taken = 0u32;

    debug!(
        "Sampler scheduled {} ticks every {:?}",
        planned, options.interval
    );

    while taken < planned {
        let next_tick = options.start + options.interval * (taken + 1);

        let last = tokio::select! {
            biased;
            _ = time::sleep_until(next_tick.into()) => false,
            _ = stop.cancelled() => {
                if Instant::now() < run_end {
                    break;
                }
                true
            }
        };

        let sample = ledger.sample(options.packet_size, options.start.elapsed());
        series.push(sample);
        if let Some(reporter) = &reporter {
            reporter.report(sample);
        }
        taken += 1;

        if last {
            break;
        }
    }

    info!("Sampler finished with {} of {} samples", taken, planned);
    taken
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planned_ticks() {
        assert_eq!(planned_ticks(Duration::from_secs(2), Duration::from_secs(1)), 2);
        assert_eq!(planned_ticks(Duration::from_millis(2500), Duration::from_secs(1)), 2);
        assert_eq!(planned_ticks(Duration::from_millis(500), Duration::from_secs(1)), 0);
        assert_eq!(planned_ticks(Duration::from_secs(1), Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn test_full_schedule() {
        let series = SampleSeries::new();
        let options = SamplerOptions {
            start: Instant::now(),
            duration: Duration::from_millis(300),
            interval: Duration::from_millis(100),
            packet_size: 8,
        };

        let taken = run_sampler(
            PacketLedger::new(),
            series.clone(),
            None,
            options,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(taken, 3);
        let samples = series.get();
        assert_eq!(samples.len(), 3);
        for (i, sample) in samples.iter().enumerate() {
            assert!(sample.elapsed_time >= 0.1 * (i + 1) as f64);
        }
    }

    #[tokio::test]
    async fn test_early_stop_takes_no_extra_sample() {
        let series = SampleSeries::new();
        let stop = CancellationToken::new();
        let options = SamplerOptions {
            start: Instant::now(),
            duration: Duration::from_secs(10),
            interval: Duration::from_millis(100),
            packet_size: 8,
        };

        let canceller = stop.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(250)).await;
            canceller.cancel();
        });

        let taken = run_sampler(PacketLedger::new(), series.clone(), None, options, stop).await;
        assert_eq!(taken, 2);
        assert_eq!(series.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_at_run_end_takes_due_tick() {
        let series = SampleSeries::new();
        let stop = CancellationToken::new();
        let start = Instant::now() - Duration::from_millis(200);
        let options = SamplerOptions {
            start,
            duration: Duration::from_millis(200),
            interval: Duration::from_millis(200),
            packet_size: 8,
        };
        stop.cancel();

        let taken = run_sampler(PacketLedger::new(), series.clone(), None, options, stop).await;
        assert_eq!(taken, 1);
    }

    #[tokio::test]
    async fn test_samples_are_reported() {
        let (reporter, mut receiver) = IntervalReporter::new();
        let options = SamplerOptions {
            start: Instant::now(),
            duration: Duration::from_millis(100),
            interval: Duration::from_millis(50),
            packet_size: 8,
        };

        run_sampler(
            PacketLedger::new(),
            SampleSeries::new(),
            Some(reporter),
            options,
            CancellationToken::new(),
        )
        .await;

        let mut reports = 0;
        while let Ok(msg) = receiver.try_recv() {
            if matches!(msg, crate::interval_reporter::IntervalMessage::Report(_)) {
                reports += 1;
            }
        }
        assert_eq!(reports, 2);
    }
}

use crate::config::Config;
use crate::interval_reporter::{format_sample, run_reporter_task, IntervalReporter};
use crate::ledger::PacketLedger;
use crate::measurements::{MetricSample, SampleSeries};
use crate::receiver::{run_receiver, ReceiverOptions};
use crate::sampler::{run_sampler, SamplerOptions};
use crate::sender::{run_sender, SenderOptions};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Progress event types reported during a run.
///
/// # Examples
///
/// ```no_run
/// use echoperf::{Client, Config, ProgressEvent};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("127.0.0.1".to_string(), 5000)
///     .with_duration(Duration::from_secs(10));
///
/// let client = Client::new(config)?
///     .with_callback(|event: ProgressEvent| {
///         match event {
///             ProgressEvent::TestStarted => println!("Starting..."),
///             ProgressEvent::Sample(sample) => {
///                 println!("Latency: {:.3} ms", sample.avg_latency * 1000.0);
///             }
///             ProgressEvent::TestCompleted { samples, .. } => {
///                 println!("Collected {} samples", samples);
///             }
///             ProgressEvent::Error(msg) => eprintln!("Error: {}", msg),
///         }
///     });
///
/// client.run().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The connection is up and the sender, receiver and sampler are running.
    TestStarted,
    /// A sampling tick produced a new sample.
    Sample(MetricSample),
    /// The run reached `Terminated`.
    ///
    /// # Fields
    ///
    /// * `samples` - Number of samples in the final series
    /// * `duration` - Time from test start to termination
    /// * `outcome` - Why the run ended
    TestCompleted {
        samples: usize,
        duration: Duration,
        outcome: RunOutcome,
    },
    /// A failure ended the run early.
    Error(String),
}

/// Callback trait for receiving progress updates during a run.
///
/// Implemented for any `Fn(ProgressEvent) + Send + Sync` closure.
///
/// ```
/// use echoperf::{ProgressCallback, ProgressEvent};
///
/// struct Counter;
///
/// impl ProgressCallback for Counter {
///     fn on_progress(&self, _event: ProgressEvent) {}
/// }
/// ```
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

/// Simple function-based callback
impl<F> ProgressCallback for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

type CallbackRef = Arc<dyn ProgressCallback>;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Terminated,
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The configured duration elapsed.
    Completed,
    /// The cancellation token was triggered from outside.
    Interrupted,
    /// The server could not be reached.
    ConnectionFailed(String),
    /// A read or write on the established connection failed.
    TransportFailed(String),
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunOutcome::ConnectionFailed(_) | RunOutcome::TransportFailed(_)
        )
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Interrupted => write!(f, "interrupted"),
            RunOutcome::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            RunOutcome::TransportFailed(msg) => write!(f, "transport failed: {}", msg),
        }
    }
}

/// Everything a run leaves behind for persistence and reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub started_at: DateTime<Utc>,
    pub server: String,
    pub packet_size: usize,
    pub interval: Duration,
    /// Time from test start to termination
    pub duration: Duration,
    pub total_sent: u64,
    pub total_received: u64,
    pub samples: Vec<MetricSample>,
    pub outcome: RunOutcome,
}

/// Measurement client and test coordinator.
///
/// Connects to an echo server, then runs three tasks over the one
/// connection: a sender writing numbered frames, a receiver reading the
/// echoes back from the same stream, and a sampler turning both into one
/// `MetricSample` per interval. The run moves through
/// `Idle -> Running -> Draining -> Terminated`; whatever samples exist when it
/// terminates are returned, whether the run completed, was interrupted or
/// failed.
///
/// # Examples
///
/// ```no_run
/// use echoperf::{Client, Config};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("192.168.1.100".to_string(), 5000)
///     .with_packet_size(64)
///     .with_duration(Duration::from_secs(10));
///
/// let client = Client::new(config)?;
/// let report = client.run().await?;
///
/// for sample in &report.samples {
///     println!("{:.1}s: {:.2}% loss", sample.elapsed_time, sample.packet_loss_pct);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    ledger: PacketLedger,
    series: SampleSeries,
    callback: Option<CallbackRef>,
    cancellation_token: CancellationToken,
    state: Arc<Mutex<RunState>>,
}

impl Client {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid or has no
    /// server address.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        if config.server_addr.is_none() {
            return Err(Error::Config(
                "Server address is required for client mode".to_string(),
            ));
        }

        Ok(Self {
            config,
            ledger: PacketLedger::new(),
            series: SampleSeries::new(),
            callback: None,
            cancellation_token: CancellationToken::new(),
            state: Arc::new(Mutex::new(RunState::Idle)),
        })
    }

    /// Attaches a progress callback.
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback.on_progress(event);
        }
    }

    /// Token that interrupts the run when cancelled.
    ///
    /// An interrupt is handled like the end of the run: the tasks wind down
    /// and the samples taken so far are kept.
    ///
    /// ```no_run
    /// use echoperf::{Client, Config};
    /// use std::time::Duration;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::new(Config::client("127.0.0.1".to_string(), 5000))?;
    /// let cancel_token = client.cancellation_token().clone();
    ///
    /// tokio::spawn(async move {
    ///     tokio::time::sleep(Duration::from_secs(5)).await;
    ///     cancel_token.cancel();
    /// });
    ///
    /// let report = client.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn set_state(&self, state: RunState) {
        let mut current = self.state.lock();
        info!("Run state {:?} -> {:?}", *current, state);
        *current = state;
    }

    /// Samples taken so far, in tick order.
    pub fn samples(&self) -> Vec<MetricSample> {
        self.series.get()
    }

    /// Runs the measurement.
    ///
    /// Connection and transport failures do not produce `Err`: they end the
    /// run early and are reported in `TestReport::outcome` next to the
    /// samples gathered until then.
    ///
    /// # Errors
    ///
    /// Returns `Error::Test` if this client has already been run.
    pub async fn run(&self) -> Result<TestReport> {
        {
            let mut state = self.state.lock();
            if *state != RunState::Idle {
                return Err(Error::Test("a client can only run once".to_string()));
            }
            *state = RunState::Running;
        }

        let started_at = Utc::now();
        let server_addr = self
            .config
            .server_addr
            .as_ref()
            .ok_or_else(|| Error::Config("Server address not set".to_string()))?;
        let full_addr = format!("{}:{}", server_addr, self.config.port);

        info!("Connecting to echo server at {}", full_addr);

        let stream = match self.connect(&full_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Could not connect to {}: {}", full_addr, e);
                self.notify(ProgressEvent::Error(e.to_string()));
                let outcome = if self.cancellation_token.is_cancelled() {
                    RunOutcome::Interrupted
                } else {
                    RunOutcome::ConnectionFailed(e.to_string())
                };
                return Ok(self.finish(started_at, full_addr, Duration::ZERO, outcome));
            }
        };

        if !self.config.json {
            if let (Ok(local), Ok(remote)) = (stream.local_addr(), stream.peer_addr()) {
                println!(
                    "local {} port {} connected to {} port {}",
                    local.ip(),
                    local.port(),
                    remote.ip(),
                    remote.port()
                );
            }
        }

        let start = Instant::now();
        let (reader, writer) = stream.into_split();
        let stop = self.cancellation_token.child_token();
        let receiver_shutdown = CancellationToken::new();

        let (reporter, reporter_rx) = IntervalReporter::new();
        let reporter_handle = tokio::spawn(run_reporter_task(
            reporter_rx,
            self.config.json,
            self.callback.clone(),
        ));

        self.notify(ProgressEvent::TestStarted);

        let receiver_handle = tokio::spawn(run_receiver(
            reader,
            self.ledger.clone(),
            ReceiverOptions {
                packet_size: self.config.packet_size,
                read_timeout: self.config.read_timeout,
            },
            receiver_shutdown.clone(),
            stop.clone(),
        ));

        let sampler_handle = tokio::spawn(run_sampler(
            self.ledger.clone(),
            self.series.clone(),
            Some(reporter.clone()),
            SamplerOptions {
                start,
                duration: self.config.duration,
                interval: self.config.interval,
                packet_size: self.config.packet_size,
            },
            stop.clone(),
        ));

        let sender_handle = tokio::spawn(run_sender(
            writer,
            self.ledger.clone(),
            SenderOptions {
                packet_size: self.config.packet_size,
                deadline: start + self.config.duration,
                bandwidth: self.config.bandwidth,
            },
            stop.clone(),
        ));

        let sender_result = sender_handle
            .await
            .unwrap_or_else(|e| Err(Error::Test(format!("sender task failed: {}", e))));

        self.set_state(RunState::Draining);
        stop.cancel();

        if let Err(e) = sampler_handle.await {
            error!("Sampler task failed: {}", e);
        }

        receiver_shutdown.cancel();
        let receiver_result = receiver_handle
            .await
            .unwrap_or_else(|e| Err(Error::Test(format!("receiver task failed: {}", e))));

        reporter.complete();
        if let Err(e) = reporter_handle.await {
            warn!("Reporter task failed: {}", e);
        }

        let outcome = match (sender_result, receiver_result) {
            (Err(e), _) | (Ok(_), Err(e)) => {
                self.notify(ProgressEvent::Error(e.to_string()));
                RunOutcome::TransportFailed(e.to_string())
            }
            _ if self.cancellation_token.is_cancelled() => RunOutcome::Interrupted,
            _ => RunOutcome::Completed,
        };

        Ok(self.finish(started_at, full_addr, start.elapsed(), outcome))
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let connect = time::timeout(self.config.connect_timeout, TcpStream::connect(addr));

        let stream = tokio::select! {
            result = connect => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(Error::Connection(e.to_string())),
                Err(_) => {
                    return Err(Error::Connection(format!(
                        "timed out after {:?}",
                        self.config.connect_timeout
                    )))
                }
            },
            _ = self.cancellation_token.cancelled() => {
                return Err(Error::Connection("interrupted while connecting".to_string()))
            }
        };

        stream.set_nodelay(true)?;
        info!("Connected to {}", addr);
        Ok(stream)
    }

    fn finish(
        &self,
        started_at: DateTime<Utc>,
        server: String,
        duration: Duration,
        outcome: RunOutcome,
    ) -> TestReport {
        self.set_state(RunState::Terminated);

        let report = TestReport {
            started_at,
            server,
            packet_size: self.config.packet_size,
            interval: self.config.interval,
            duration,
            total_sent: self.ledger.sent_count(),
            total_received: self.ledger.received_count(),
            samples: self.series.get(),
            outcome: outcome.clone(),
        };

        info!(
            "Run {} after {:.2}s with {} samples",
            outcome,
            duration.as_secs_f64(),
            report.samples.len()
        );

        if !self.config.json {
            print_summary(&report);
        }

        self.notify(ProgressEvent::TestCompleted {
            samples: report.samples.len(),
            duration,
            outcome,
        });

        report
    }
}

fn print_summary(report: &TestReport) {
    println!("- - - - - - - - - - - - - - - - - - - - - - - - -");
    println!(
        "Frames sent: {}  echoed: {}  samples: {}  over {:.2} sec",
        report.total_sent,
        report.total_received,
        report.samples.len(),
        report.duration.as_secs_f64()
    );
    if let Some(last) = report.samples.last() {
        println!("Final {}", format_sample(last));
    }
    println!("Outcome: {}", report.outcome);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = Config::client("127.0.0.1".to_string(), 5000).with_packet_size(0);
        assert!(matches!(Client::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_new_client_is_idle() {
        let client = Client::new(Config::client("127.0.0.1".to_string(), 5000)).unwrap();
        assert_eq!(client.state(), RunState::Idle);
        assert!(client.samples().is_empty());
        assert!(!client.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(RunOutcome::Completed.to_string(), "completed");
        assert_eq!(
            RunOutcome::ConnectionFailed("refused".to_string()).to_string(),
            "connection failed: refused"
        );
        assert!(RunOutcome::TransportFailed("reset".to_string()).is_failure());
        assert!(!RunOutcome::Interrupted.is_failure());
    }

    #[tokio::test]
    async fn test_client_runs_once() {
        let config = Config::client("127.0.0.1".to_string(), 9)
            .with_connect_timeout(Duration::from_millis(200))
            .with_json(true);
        let client = Client::new(config).unwrap();

        let report = client.run().await.unwrap();
        assert!(report.outcome.is_failure());
        assert_eq!(client.state(), RunState::Terminated);

        assert!(matches!(client.run().await, Err(Error::Test(_))));
    }
}

//! echoperf - network path measurement against a TCP echo server
//!
//! The client streams numbered, checksummed frames to an echo server over
//! one persistent connection and reads the echoes back from the same
//! connection. Matching echoes to sends yields a time series of metric
//! samples.
//!
//! # Features
//!
//! - Bandwidth, round-trip latency and jitter per sampling interval
//! - Packet loss, payload corruption and reordering detection
//! - Optional token-bucket pacing of the sender
//! - CSV or JSON persistence and an HTML chart report
//! - Asynchronous I/O using tokio

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod interval_reporter;
pub mod ledger;
pub mod measurements;
pub mod output;
pub mod receiver;
pub mod report;
pub mod sampler;
pub mod sender;
pub mod server;
pub mod token_bucket;

pub use client::{Client, ProgressCallback, ProgressEvent, RunOutcome, RunState, TestReport};
pub use config::{Config, Mode, OutputFormat};
pub use error::{Error, Result};
pub use measurements::MetricSample;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default port shared by the echo server and the client.
pub const DEFAULT_PORT: u16 = 5000;

/// Default payload size of a frame in bytes.
pub const DEFAULT_PACKET_SIZE: usize = 1024;

/// Test mode: client or server.
///
/// Determines whether this instance acts as the echo server (listening for
/// connections) or as the measuring client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Server mode - echoes every frame back to its sender
    Server,
    /// Client mode - generates frames and measures the echoes
    Client,
}

/// Persistence format for the metric sample series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// One row per sample with the classic column headers
    Csv,
    /// The whole test report, pretty-printed
    Json,
}

impl OutputFormat {
    /// Picks a format from a file extension, falling back to CSV.
    ///
    /// # Examples
    ///
    /// ```
    /// use echoperf::config::OutputFormat;
    /// use std::path::Path;
    ///
    /// assert_eq!(OutputFormat::from_path(Path::new("run.json")), OutputFormat::Json);
    /// assert_eq!(OutputFormat::from_path(Path::new("metrics.csv")), OutputFormat::Csv);
    /// ```
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => OutputFormat::Json,
            _ => OutputFormat::Csv,
        }
    }
}

/// Configuration for an echoperf run.
///
/// One value describes one run and is treated as immutable once the run
/// starts: every component receives what it needs at construction time.
/// Use the builder methods to customize it.
///
/// # Examples
///
/// ## Client
///
/// ```
/// use echoperf::Config;
/// use std::time::Duration;
///
/// let config = Config::client("192.168.1.100".to_string(), 5000)
///     .with_packet_size(64)
///     .with_duration(Duration::from_secs(30))
///     .with_interval(Duration::from_secs(2));
/// assert!(config.validate().is_ok());
/// ```
///
/// ## Server
///
/// ```
/// use echoperf::Config;
///
/// let config = Config::server(5000).with_packet_size(2048);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server mode or client mode
    pub mode: Mode,

    /// Port number to use
    pub port: u16,

    /// Server address (for client mode)
    pub server_addr: Option<String>,

    /// Bind address (for server mode)
    pub bind_addr: Option<IpAddr>,

    /// Payload bytes carried by every frame
    pub packet_size: usize,

    /// Test duration, measured from test start
    pub duration: Duration,

    /// Sampling interval
    pub interval: Duration,

    /// Optional pacing target in bits per second; best effort when unset
    pub bandwidth: Option<u64>,

    /// Upper bound on establishing the connection
    pub connect_timeout: Duration,

    /// Longest the receiver waits for a frame before declaring the path dead
    pub read_timeout: Duration,

    /// Destination of the persisted samples
    pub output: PathBuf,

    /// Format used for `output`
    pub output_format: OutputFormat,

    /// Suppress the human-readable per-sample lines
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Client,
            port: DEFAULT_PORT,
            server_addr: None,
            bind_addr: None,
            packet_size: DEFAULT_PACKET_SIZE,
            duration: Duration::from_secs(60),
            interval: Duration::from_secs(1),
            bandwidth: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            output: PathBuf::from("metrics.csv"),
            output_format: OutputFormat::Csv,
            json: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new server configuration listening on `port`.
    pub fn server(port: u16) -> Self {
        Self {
            mode: Mode::Server,
            port,
            ..Default::default()
        }
    }

    /// Creates a new client configuration.
    ///
    /// # Arguments
    ///
    /// * `server_addr` - The IP address or hostname of the echo server
    /// * `port` - The port number to connect to
    pub fn client(server_addr: String, port: u16) -> Self {
        Self {
            mode: Mode::Client,
            server_addr: Some(server_addr),
            port,
            ..Default::default()
        }
    }

    /// Sets the payload size of every frame.
    ///
    /// Client and server must agree on this value; it is not negotiated on
    /// the wire.
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    /// Sets the test duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Sets the sampling interval.
    ///
    /// A run of duration `d` produces `floor(d / interval)` samples.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Paces the sender to `bandwidth` bits per second.
    pub fn with_bandwidth(mut self, bandwidth: u64) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets where samples are persisted and infers the format from the
    /// extension.
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self.output_format = OutputFormat::from_path(&self.output);
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Enables or disables quiet (machine-readable) mode.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Size of one frame on the wire, header included.
    pub fn frame_size(&self) -> usize {
        crate::frame::HEADER_SIZE + self.packet_size
    }

    /// Checks the invariants every component relies on.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the packet size, duration or interval is
    /// zero, or when a client configuration has no server address.
    pub fn validate(&self) -> Result<()> {
        if self.packet_size == 0 {
            return Err(Error::Config("packet size must be positive".to_string()));
        }
        if self.duration.is_zero() {
            return Err(Error::Config("duration must be positive".to_string()));
        }
        if self.interval.is_zero() {
            return Err(Error::Config("sampling interval must be positive".to_string()));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be positive".to_string()));
        }
        if self.bandwidth == Some(0) {
            return Err(Error::Config("bandwidth must be positive when set".to_string()));
        }
        if self.mode == Mode::Client && self.server_addr.is_none() {
            return Err(Error::Config(
                "Server address is required for client mode".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let config = Config::client("127.0.0.1".to_string(), 5000);
        assert_eq!(config.mode, Mode::Client);
        assert_eq!(config.packet_size, 1024);
        assert_eq!(config.duration, Duration::from_secs(60));
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.output, PathBuf::from("metrics.csv"));
        assert_eq!(config.output_format, OutputFormat::Csv);
        assert_eq!(config.frame_size(), 1032);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_needs_no_address() {
        let config = Config::server(5000).with_packet_size(64);
        assert_eq!(config.mode, Mode::Server);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_without_address_is_rejected() {
        let config = Config::new();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let base = Config::client("127.0.0.1".to_string(), 5000);
        assert!(base.clone().with_packet_size(0).validate().is_err());
        assert!(base.clone().with_duration(Duration::ZERO).validate().is_err());
        assert!(base.clone().with_interval(Duration::ZERO).validate().is_err());
        assert!(base.with_bandwidth(0).validate().is_err());
    }

    #[test]
    fn test_output_format_follows_extension() {
        let config = Config::client("127.0.0.1".to_string(), 5000).with_output("out/run.JSON");
        assert_eq!(config.output_format, OutputFormat::Json);

        let config = config.with_output("out/run.csv");
        assert_eq!(config.output_format, OutputFormat::Csv);
    }
}

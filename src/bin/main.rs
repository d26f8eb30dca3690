use clap::{Parser, Subcommand};
use echoperf::config::{DEFAULT_PACKET_SIZE, DEFAULT_PORT};
use echoperf::{output, report, Client, Config, Server};
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "echoperf")]
#[command(about = "Network path measurement against a TCP echo server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the echo server
    Server {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Bind to specific address
        #[arg(short, long)]
        bind: Option<String>,

        /// Payload bytes per frame, must match the client
        #[arg(short = 's', long, default_value_t = DEFAULT_PACKET_SIZE)]
        packet_size: usize,
    },

    /// Run a measurement against an echo server
    Client {
        /// Server address to connect to
        server: String,

        /// Port to connect to
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Payload bytes per frame
        #[arg(short = 's', long, default_value_t = DEFAULT_PACKET_SIZE)]
        packet_size: usize,

        /// Test duration in seconds
        #[arg(short = 't', long, default_value = "60")]
        time: f64,

        /// Sampling interval in seconds
        #[arg(short, long, default_value = "1")]
        interval: f64,

        /// Where to write the samples (.csv, or .json for the full report)
        #[arg(short, long, default_value = "metrics.csv")]
        output: PathBuf,

        /// Pace the sender at this many Kbits/sec
        #[arg(short, long)]
        bandwidth: Option<u64>,

        /// Suppress the per-interval console lines
        #[arg(short = 'J', long)]
        json: bool,
    },

    /// Render an HTML report from a CSV series
    Report {
        /// CSV file written by the client
        input: PathBuf,

        /// HTML file to write
        #[arg(short, long, default_value = "report.html")]
        output: PathBuf,
    },
}

fn seconds(value: f64, name: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", name, value, e))
}

/// Converts the CLI's Kbits/sec into the bits/sec the sender paces at.
fn bandwidth_bps(kbps: u64) -> anyhow::Result<u64> {
    kbps.checked_mul(1_000)
        .ok_or_else(|| anyhow::anyhow!("bandwidth {} Kbits/sec is too large", kbps))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            bind,
            packet_size,
        } => {
            let mut config = Config::server(port).with_packet_size(packet_size);

            if let Some(bind_addr) = bind {
                config.bind_addr = Some(bind_addr.parse()?);
            }

            let server = Server::new(config);
            let token = server.cancellation_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, shutting down");
                    token.cancel();
                }
            });

            server.run().await?;
        }

        Commands::Client {
            server,
            port,
            packet_size,
            time,
            interval,
            output,
            bandwidth,
            json,
        } => {
            let mut config = Config::client(server, port)
                .with_packet_size(packet_size)
                .with_duration(seconds(time, "duration")?)
                .with_interval(seconds(interval, "interval")?)
                .with_output(output)
                .with_json(json);

            if let Some(kbps) = bandwidth {
                config = config.with_bandwidth(bandwidth_bps(kbps)?);
            }

            let client = Client::new(config.clone())?;
            let token = client.cancellation_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, stopping the run");
                    token.cancel();
                }
            });

            let report = client.run().await?;

            if let Err(e) = output::persist(&report, &config) {
                error!("Could not write {}: {}", config.output.display(), e);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }

            if report.outcome.is_failure() {
                eprintln!("echoperf: {}", report.outcome);
                std::process::exit(1);
            }
        }

        Commands::Report { input, output } => {
            report::generate_report(&input, &output)?;
        }
    }

    Ok(())
}

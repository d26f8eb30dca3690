use crate::config::Config;
use crate::frame::read_frame;
use crate::{Error, Result};
use log::{debug, error, info};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Echo server.
///
/// The `Server` listens for client connections and returns every frame it
/// reads to the peer that sent it, byte for byte and in arrival order. Each
/// connection gets its own task; there is no limit on how many run at once.
///
/// # Examples
///
/// ```no_run
/// use echoperf::{Server, Config};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::server(5000).with_packet_size(64);
/// let server = Server::new(config);
///
/// println!("Starting echo server on port 5000...");
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    cancellation_token: CancellationToken,
}

impl Server {
    /// Creates a new server with the given configuration.
    ///
    /// The configured `packet_size` must match the one clients send with,
    /// since frames carry no length field.
    ///
    /// ```
    /// use echoperf::{Server, Config};
    ///
    /// let server = Server::new(Config::server(5000));
    /// ```
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Token that stops the accept loop and every open connection.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Binds to the configured address and serves until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the address
    /// cannot be bound.
    pub async fn run(&self) -> Result<()> {
        self.config.validate()?;

        let bind_addr = format!(
            "{}:{}",
            self.config
                .bind_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            self.config.port
        );

        info!("Starting echoperf server on {}", bind_addr);

        let listener = TcpListener::bind(&bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener until cancelled.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!(
            "Echo server listening on {} ({} byte payloads)",
            local, self.config.packet_size
        );

        loop {
            let accepted = tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let frame_size = self.config.frame_size();
                    let shutdown = self.cancellation_token.child_token();

                    tokio::spawn(async move {
                        match handle_echo_client(stream, addr, frame_size, shutdown).await {
                            Ok(frames) => info!("Connection from {} closed after {} frames", addr, frames),
                            Err(e) => error!("Error handling client {}: {}", addr, e),
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }

        info!("Echo server on {} stopped", local);
        Ok(())
    }
}

/// Echoes frames back to one peer until it closes the connection or
/// `shutdown` fires.
///
/// Returns the number of frames echoed.
async fn handle_echo_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    frame_size: usize,
    shutdown: CancellationToken,
) -> Result<u64> {
    stream.set_nodelay(true)?;

    let mut buf = vec![0u8; frame_size];
    let mut frames = 0u64;

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = read_frame(&mut stream, &mut buf) => read,
        };

        match read {
            Ok(true) => {
                // a peer that stops reading must not pin the task past shutdown
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    written = stream.write_all(&buf) => written?,
                }
                frames += 1;
            }
            Ok(false) => {
                debug!("Peer {} closed the connection", addr);
                break;
            }
            Err(Error::MalformedFrame { expected, actual }) => {
                debug!(
                    "Peer {} closed inside a frame ({} of {} bytes)",
                    addr, actual, expected
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(frames)
}

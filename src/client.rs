//! Client mode implementation for quiccat.
//!
//! The [`ConnectionManager`] dials one server, opens one stream and runs two
//! pumps over it: local input to the stream (one write per line) and the stream
//! to local output. Pump failures are logged and end that pump only.
//!
//! Cancelling the manager's scope closes the connection, which fails any
//! in-flight stream I/O. The local input reader itself cannot be interrupted, so
//! the send pump abandons its pending read instead of waiting for it.

use bytes::Bytes;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cli::ClientArgs;
use crate::common::{parse_connect_address, DnsResolver};
use crate::error::{Error, Result};
use crate::shutdown::Shutdown;
use crate::transport::{dial, Connection, StreamReader, StreamWriter, TransportConfig};

/// How long a stopped client waits for the close to reach the server.
const CLOSE_LINGER: Duration = Duration::from_millis(500);

/// Settings for the dialing side.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server address as `host:port`.
    pub address: String,
    /// QUIC transport parameters.
    pub transport: TransportConfig,
}

impl ClientOptions {
    pub fn from_args(args: &ClientArgs) -> Self {
        Self {
            address: args.address.clone(),
            transport: TransportConfig {
                idle_timeout: args.idle_timeout,
                keep_alive: args.keep_alive,
            },
        }
    }
}

/// Which pump ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// Local input ended or a write to the stream failed.
    InputClosed,
    /// The stream ended or a read from it failed.
    StreamClosed,
}

struct Pumps {
    connection: Connection,
    send: JoinHandle<()>,
    recv: JoinHandle<()>,
    exits: mpsc::UnboundedReceiver<PumpExit>,
}

/// Owns the client's single connection and stream.
pub struct ConnectionManager {
    options: ClientOptions,
    scope: CancellationToken,
    resolver: DnsResolver,
    pumps: Option<Pumps>,
}

impl ConnectionManager {
    /// Creates an idle manager. `scope` bounds everything the manager starts.
    pub fn new(options: ClientOptions, scope: CancellationToken) -> Self {
        Self {
            options,
            scope,
            resolver: DnsResolver::new(),
            pumps: None,
        }
    }

    /// Dials the server, opens the stream and starts both pumps.
    ///
    /// Returns once the pumps are running. Only dial and open-stream failures
    /// are reported here.
    pub async fn connect<I, O>(&mut self, input: I, output: O) -> Result<SocketAddr>
    where
        I: AsyncBufRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        if self.pumps.is_some() {
            return Err(Error::Config("client is already connected".to_string()));
        }

        let (addr, host) = parse_connect_address(&self.options.address, &self.resolver).await?;
        let connection = dial(addr, &host, &self.options.transport, &self.scope).await?;
        tracing::info!(remote = %addr, "connected");

        let stream = match connection.open_stream(&self.scope).await {
            Ok(stream) => stream,
            Err(e) => {
                connection.close("open stream failed");
                return Err(e);
            }
        };
        let span = tracing::info_span!("stream", remote = %addr, stream_id = stream.id());
        let (writer, reader) = stream.split();

        let reaper = {
            let connection = connection.clone();
            let scope = self.scope.clone();
            async move {
                scope.cancelled().await;
                connection.close("client stopped");
            }
        };
        tokio::spawn(reaper);

        let (exit_tx, exits) = mpsc::unbounded_channel();
        let send = {
            let scope = self.scope.clone();
            let exit_tx = exit_tx.clone();
            tokio::spawn(
                async move {
                    send_pump(input, writer, &scope).await;
                    let _ = exit_tx.send(PumpExit::InputClosed);
                }
                .instrument(span.clone()),
            )
        };
        let recv = {
            let scope = self.scope.clone();
            tokio::spawn(
                async move {
                    recv_pump(reader, output, &scope).await;
                    let _ = exit_tx.send(PumpExit::StreamClosed);
                }
                .instrument(span),
            )
        };

        self.pumps = Some(Pumps {
            connection,
            send,
            recv,
            exits,
        });
        Ok(addr)
    }

    /// Resolves when the next pump ends. Returns `None` if no pump is left to wait for.
    pub async fn finished(&mut self) -> Option<PumpExit> {
        self.pumps.as_mut()?.exits.recv().await
    }

    /// Returns true while the receive pump is running.
    pub fn is_receiving(&self) -> bool {
        self.pumps
            .as_ref()
            .is_some_and(|pumps| !pumps.recv.is_finished())
    }

    /// Returns true once the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.pumps
            .as_ref()
            .map_or(true, |pumps| pumps.connection.is_closed())
    }

    /// Cancels the manager's scope, closing the stream and connection. Idempotent.
    pub fn stop(&self) {
        if !self.scope.is_cancelled() {
            tracing::info!("stopping client");
        }
        self.scope.cancel();
    }

    /// Waits for both pumps to end, then gives the close a moment to reach the server.
    pub async fn join(&mut self) {
        let Some(pumps) = self.pumps.take() else {
            return;
        };
        for (name, handle) in [("send", pumps.send), ("receive", pumps.recv)] {
            if let Err(e) = handle.await {
                tracing::error!(pump = name, error = %e, "pump task failed");
            }
        }
        pumps.connection.wait_idle(CLOSE_LINGER).await;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}

/// Forwards one write per input line until input ends, a write fails, or `scope` is cancelled.
///
/// End of input finishes the send direction; a failed input read resets it.
async fn send_pump<I>(input: I, mut writer: StreamWriter, scope: &CancellationToken)
where
    I: AsyncBufRead + Unpin,
{
    let mut lines = input.split(b'\n');

    loop {
        let line = tokio::select! {
            _ = scope.cancelled() => {
                tracing::debug!("send pump cancelled");
                return;
            }
            line = lines.next_segment() => line,
        };

        match line {
            Ok(Some(mut line)) => {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                tracing::debug!(bytes = line.len(), "sending message");
                if let Err(e) = writer.write(Bytes::from(line), scope).await {
                    if !e.is_cancelled() {
                        tracing::debug!(error = %e, "error sending message");
                    }
                    return;
                }
            }
            Ok(None) => {
                tracing::debug!("local input closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read local input");
                writer.close();
                return;
            }
        }
    }

    writer.finish();
    match writer.delivered(scope).await {
        Ok(()) => tracing::debug!("send direction delivered"),
        Err(Error::Cancelled) => {}
        Err(e) => tracing::debug!(error = %e, "send direction not delivered"),
    }
}

/// Copies the stream to `output` until the stream ends, I/O fails, or `scope` is cancelled.
async fn recv_pump<O>(mut reader: StreamReader, mut output: O, scope: &CancellationToken)
where
    O: AsyncWrite + Unpin,
{
    loop {
        let chunk = match reader.read(scope).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                tracing::debug!("stream closed by server");
                return;
            }
            Err(Error::Cancelled) => {
                tracing::debug!("receive pump cancelled");
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, "error receiving message");
                return;
            }
        };

        let written = tokio::select! {
            _ = scope.cancelled() => return,
            written = async {
                output.write_all(&chunk).await?;
                output.flush().await
            } => written,
        };
        if let Err(e) = written {
            tracing::error!(error = %e, "failed to write local output");
            reader.close();
            return;
        }
    }
}

/// Runs the quiccat client on stdin/stdout until input ends, the server goes away,
/// or shutdown is triggered.
pub async fn run_client(args: &ClientArgs, shutdown: &Shutdown) -> Result<()> {
    let mut manager = ConnectionManager::new(ClientOptions::from_args(args), shutdown.scope());

    let input = BufReader::new(tokio::io::stdin());
    match manager.connect(input, tokio::io::stdout()).await {
        Ok(_) => {}
        Err(Error::Cancelled) => return Ok(()),
        Err(e) => return Err(e),
    }

    tokio::select! {
        _ = shutdown.triggered() => {}
        exit = manager.finished() => tracing::debug!(?exit, "pump finished"),
    }

    manager.stop();
    manager.join().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DEFAULT_IDLE_TIMEOUT;

    fn options(address: &str) -> ClientOptions {
        ClientOptions {
            address: address.to_string(),
            transport: TransportConfig::default(),
        }
    }

    #[test]
    fn test_options_from_args() {
        let args = ClientArgs {
            address: "127.0.0.1:9000".to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            keep_alive: Duration::from_secs(1),
        };
        let options = ClientOptions::from_args(&args);
        assert_eq!(options.address, "127.0.0.1:9000");
        assert_eq!(options.transport.keep_alive, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stop_before_connect_is_idempotent() {
        let mut manager = ConnectionManager::new(options("127.0.0.1:9000"), CancellationToken::new());
        manager.stop();
        manager.stop();

        assert!(!manager.is_receiving());
        assert!(manager.is_closed());
        assert_eq!(manager.finished().await, None);
        manager.join().await;
    }

    #[tokio::test]
    async fn test_connect_after_stop_is_cancelled() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let mut manager = ConnectionManager::new(options("127.0.0.1:9"), CancellationToken::new());
        manager.stop();

        let result = manager.connect(tokio::io::empty(), tokio::io::sink()).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!manager.is_receiving());
    }

    #[tokio::test]
    async fn test_connect_rejects_address_without_port() {
        let mut manager = ConnectionManager::new(options("localhost"), CancellationToken::new());
        let result = manager.connect(tokio::io::empty(), tokio::io::sink()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_drop_cancels_scope() {
        let scope = CancellationToken::new();
        let manager = ConnectionManager::new(options("127.0.0.1:9000"), scope.clone());
        drop(manager);
        assert!(scope.is_cancelled());
    }
}

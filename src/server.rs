//! Server mode implementation for quiccat.
//!
//! The server owns one QUIC endpoint and runs a single accept loop on it. Each
//! inbound connection gets its own [`SessionHandler`] task; sessions are never
//! joined, so shutdown latency depends only on cancellation reaching the loop.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cli::ServeArgs;
use crate::common::format_duration;
use crate::error::{Error, Result};
use crate::session::SessionHandler;
use crate::shutdown::Shutdown;
use crate::tls::{generate_self_signed_cert, CertKeyPair, ALPN};
use crate::transport::{Listener, TransportConfig};

/// Settings for the listening side.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// UDP address to bind.
    pub listen: SocketAddr,
    /// QUIC transport parameters.
    pub transport: TransportConfig,
}

impl ServerOptions {
    /// Builds options from the `serve` arguments, binding every IPv4 interface.
    pub fn from_args(args: &ServeArgs) -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port)),
            transport: TransportConfig {
                idle_timeout: args.idle_timeout,
                keep_alive: args.keep_alive,
            },
        }
    }
}

/// Live counters for the sessions served by one listener.
#[derive(Debug, Default)]
pub struct ServerStats {
    sessions_active: AtomicUsize,
    sessions_total: AtomicU64,
    streams_accepted: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub sessions_active: usize,
    pub sessions_total: u64,
    pub streams_accepted: u64,
}

impl ServerStats {
    pub(crate) fn session_opened(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_closed(&self) {
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn stream_accepted(&self) {
        self.streams_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_total: self.sessions_total.load(Ordering::Relaxed),
            streams_accepted: self.streams_accepted.load(Ordering::Relaxed),
        }
    }
}

/// The listening service.
pub struct Server {
    listener: Listener,
    scope: CancellationToken,
    stats: Arc<ServerStats>,
}

impl Server {
    /// Binds the endpoint. `scope` governs the accept loop and every session under it.
    pub fn bind(
        options: &ServerOptions,
        credentials: &CertKeyPair,
        scope: CancellationToken,
    ) -> Result<Self> {
        let listener = Listener::bind(options.listen, credentials, &options.transport)?;
        Ok(Self {
            listener,
            scope,
            stats: Arc::new(ServerStats::default()),
        })
    }

    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Current session and stream counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs the accept loop until it fails or the scope is cancelled.
    ///
    /// Cancellation returns `Ok(())`; any other accept failure is returned as fatal.
    pub async fn serve(&self) -> Result<()> {
        let listen = self.local_addr()?;
        let span = tracing::info_span!("server", %listen);
        self.accept_loop().instrument(span).await
    }

    async fn accept_loop(&self) -> Result<()> {
        tracing::info!("service started");

        let result = loop {
            let incoming = match self.listener.accept(&self.scope).await {
                Ok(incoming) => incoming,
                Err(Error::Cancelled) => {
                    tracing::debug!("accept loop cancelled");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            let scope = self.scope.child_token();
            let stats = Arc::clone(&self.stats);
            let remote = incoming.remote_address();
            let session = async move {
                match incoming.establish(&scope).await {
                    Ok(connection) => SessionHandler::new(connection, scope, stats).run().await,
                    Err(Error::Cancelled) => {
                        tracing::debug!(%remote, "handshake abandoned on shutdown");
                    }
                    Err(e) => tracing::warn!(%remote, error = %e, "failed to accept connection"),
                }
            };
            tokio::spawn(session.in_current_span());
        };

        self.listener.close();
        let stats = self.stats.snapshot();
        tracing::warn!(
            sessions_total = stats.sessions_total,
            streams_accepted = stats.streams_accepted,
            "service halted"
        );
        result
    }

    /// Cancels the accept loop and every session derived from it. Idempotent.
    pub fn stop(&self) {
        if !self.scope.is_cancelled() {
            tracing::info!("stopping server");
        }
        self.scope.cancel();
    }
}

/// Runs the quiccat server until shutdown is triggered or accepting fails.
pub async fn run_server(args: &ServeArgs, shutdown: &Shutdown) -> Result<()> {
    let options = ServerOptions::from_args(args);

    let credentials = generate_self_signed_cert()
        .map_err(|e| Error::Credentials(format!("failed to generate certificate: {}", e)))?;

    let server = Server::bind(&options, &credentials, shutdown.scope())?;
    log_startup(&server, &options, &credentials)?;

    server.serve().await
}

fn log_startup(server: &Server, options: &ServerOptions, credentials: &CertKeyPair) -> Result<()> {
    tracing::info!(
        listen = %server.local_addr()?,
        alpn = ALPN,
        idle_timeout = %format_duration(options.transport.idle_timeout),
        keep_alive = %format_duration(options.transport.keep_alive),
        fingerprint = %credentials.fingerprint,
        "server listening"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_options_bind_all_interfaces() {
        let args = ServeArgs {
            port: 9000,
            idle_timeout: Duration::from_secs(30),
            keep_alive: Duration::ZERO,
        };
        let options = ServerOptions::from_args(&args);
        assert_eq!(options.listen, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(options.transport.idle_timeout, Duration::from_secs(30));
        assert!(options.transport.keep_alive.is_zero());
    }

    #[test]
    fn test_stats_track_sessions() {
        let stats = ServerStats::default();
        stats.session_opened();
        stats.session_opened();
        stats.stream_accepted();
        stats.session_closed();

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                sessions_active: 1,
                sessions_total: 2,
                streams_accepted: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_stop_before_serve_returns_immediately() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let credentials = generate_self_signed_cert().unwrap();
        let options = ServerOptions {
            listen: "127.0.0.1:0".parse().unwrap(),
            transport: TransportConfig::default(),
        };
        let server = Server::bind(&options, &credentials, CancellationToken::new()).unwrap();

        server.stop();
        server.stop();

        let result = tokio::time::timeout(Duration::from_secs(2), server.serve())
            .await
            .expect("serve should not block after stop");
        assert!(result.is_ok());
    }
}

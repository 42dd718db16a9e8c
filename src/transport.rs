//! Thin facade over the QUIC transport.
//!
//! Every call that can block takes the caller's [`CancellationToken`] and returns
//! [`Error::Cancelled`] as soon as that scope is cancelled, so workers can tell a
//! shutdown apart from a transport failure.

use bytes::Bytes;
use quinn::{Endpoint, RecvStream, SendStream, VarInt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::common::READ_BUFFER_SIZE;
use crate::error::{Error, Result};
use crate::tls::{build_client_config_insecure, build_server_config, CertKeyPair, ALPN};

/// Application error code sent with every close.
const CLOSE_CODE: VarInt = VarInt::from_u32(0);

/// Default QUIC idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default QUIC keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(3);

/// QUIC transport parameters shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Connection is dropped after this long without traffic.
    pub idle_timeout: Duration,
    /// Keep-alive interval; zero disables keep-alives.
    pub keep_alive: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

impl TransportConfig {
    fn build(&self) -> Result<quinn::TransportConfig> {
        let mut transport = quinn::TransportConfig::default();
        transport.max_idle_timeout(Some(
            self.idle_timeout
                .try_into()
                .map_err(|_| Error::Config("idle timeout too large".to_string()))?,
        ));
        if !self.keep_alive.is_zero() {
            transport.keep_alive_interval(Some(self.keep_alive));
        }
        Ok(transport)
    }
}

/// Runs `fut` unless `scope` is cancelled first.
async fn cancellable<T, F>(scope: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = scope.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// A bound QUIC endpoint accepting inbound connections.
#[derive(Debug)]
pub struct Listener {
    endpoint: Endpoint,
}

impl Listener {
    /// Binds `addr` and prepares to accept connections authenticated with `credentials`.
    pub fn bind(
        addr: SocketAddr,
        credentials: &CertKeyPair,
        transport: &TransportConfig,
    ) -> Result<Self> {
        let tls_config = build_server_config(credentials, ALPN)
            .map_err(|e| Error::Credentials(format!("failed to build TLS config: {}", e)))?;

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
                .map_err(|e| Error::Credentials(format!("failed to create QUIC config: {}", e)))?,
        ));
        server_config.transport_config(Arc::new(transport.build()?));

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| Error::ListenFailed(format!("{}: {}", addr, e)))?;

        Ok(Self { endpoint })
    }

    /// Returns the address the endpoint is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Waits for the next inbound connection attempt.
    ///
    /// Fails with [`Error::AcceptFailed`] once the endpoint has been closed.
    pub async fn accept(&self, scope: &CancellationToken) -> Result<Incoming> {
        cancellable(scope, async {
            self.endpoint
                .accept()
                .await
                .map(|inner| Incoming { inner })
                .ok_or_else(|| Error::AcceptFailed("endpoint closed".to_string()))
        })
        .await
    }

    /// Stops accepting and closes every connection on this endpoint. Idempotent.
    pub fn close(&self) {
        self.endpoint.close(CLOSE_CODE, b"server shutting down");
    }
}

/// An inbound connection attempt whose handshake has not completed yet.
pub struct Incoming {
    inner: quinn::Incoming,
}

impl std::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming")
            .field("remote_address", &self.inner.remote_address())
            .finish()
    }
}

impl Incoming {
    /// Address of the peer attempting to connect.
    pub fn remote_address(&self) -> SocketAddr {
        self.inner.remote_address()
    }

    /// Completes the handshake.
    pub async fn establish(self, scope: &CancellationToken) -> Result<Connection> {
        let remote = self.inner.remote_address();
        cancellable(scope, async move {
            self.inner
                .await
                .map(|inner| Connection {
                    inner,
                    endpoint: None,
                })
                .map_err(|e| Error::Handshake(format!("{}: {}", remote, e)))
        })
        .await
    }
}

/// Dials `addr`, presenting `server_name` for SNI, and completes the handshake.
pub async fn dial(
    addr: SocketAddr,
    server_name: &str,
    transport: &TransportConfig,
    scope: &CancellationToken,
) -> Result<Connection> {
    let tls_config = build_client_config_insecure(ALPN)
        .map_err(|e| Error::Credentials(e.to_string()))?;

    let mut client_config = quinn::ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(tls_config)
            .map_err(|e| Error::Credentials(format!("failed to create QUIC config: {}", e)))?,
    ));
    client_config.transport_config(Arc::new(transport.build()?));

    let bind_addr: SocketAddr = if addr.is_ipv6() {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    };
    let endpoint = Endpoint::client(bind_addr)
        .map_err(|e| Error::DialFailed(format!("failed to bind local socket: {}", e)))?;

    let connecting = endpoint
        .connect_with(client_config, addr, server_name)
        .map_err(|e| Error::DialFailed(format!("{}: {}", addr, e)))?;

    let result = cancellable(scope, async {
        connecting
            .await
            .map_err(|e| Error::DialFailed(format!("{}: {}", addr, e)))
    })
    .await;

    match result {
        Ok(inner) => Ok(Connection {
            inner,
            endpoint: Some(endpoint),
        }),
        Err(e) => {
            endpoint.close(CLOSE_CODE, b"dial abandoned");
            Err(e)
        }
    }
}

/// An established QUIC connection.
///
/// Cloning yields another handle to the same connection.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: quinn::Connection,
    /// Client-side endpoint owned by a dialed connection.
    endpoint: Option<Endpoint>,
}

impl Connection {
    /// Address of the peer.
    pub fn remote_address(&self) -> SocketAddr {
        self.inner.remote_address()
    }

    /// Opens a new bidirectional stream.
    pub async fn open_stream(&self, scope: &CancellationToken) -> Result<Stream> {
        cancellable(scope, async {
            let (send, recv) = self
                .inner
                .open_bi()
                .await
                .map_err(|e| Error::OpenStreamFailed(e.to_string()))?;
            Ok(Stream::new(send, recv))
        })
        .await
    }

    /// Waits for the peer to open a bidirectional stream.
    ///
    /// The peer's stream becomes visible once it has sent data on it.
    pub async fn accept_stream(&self, scope: &CancellationToken) -> Result<Stream> {
        cancellable(scope, async {
            let (send, recv) = self
                .inner
                .accept_bi()
                .await
                .map_err(|e| Error::AcceptFailed(e.to_string()))?;
            Ok(Stream::new(send, recv))
        })
        .await
    }

    /// Closes the connection and every stream on it. Idempotent.
    pub fn close(&self, reason: &str) {
        self.inner.close(CLOSE_CODE, reason.as_bytes());
    }

    /// Returns true once the connection has been closed by either side.
    pub fn is_closed(&self) -> bool {
        self.inner.close_reason().is_some()
    }

    /// Waits until a dialed connection has told the peer it is closing.
    ///
    /// Bounded by `limit` so a silent peer cannot hold up shutdown.
    pub async fn wait_idle(&self, limit: Duration) {
        if let Some(endpoint) = &self.endpoint {
            let _ = tokio::time::timeout(limit, endpoint.wait_idle()).await;
        }
    }
}

/// One bidirectional stream inside a [`Connection`].
#[derive(Debug)]
pub struct Stream {
    writer: StreamWriter,
    reader: StreamReader,
}

impl Stream {
    fn new(send: SendStream, recv: RecvStream) -> Self {
        let id = stream_id(&send);
        Self {
            writer: StreamWriter { id, send },
            reader: StreamReader { id, recv },
        }
    }

    /// Transport-assigned identifier, unique within the connection.
    pub fn id(&self) -> u64 {
        self.writer.id
    }

    /// Splits the stream so each direction can be driven by its own worker.
    pub fn split(self) -> (StreamWriter, StreamReader) {
        (self.writer, self.reader)
    }
}

fn stream_id(send: &SendStream) -> u64 {
    VarInt::from(send.id()).into_inner()
}

/// Sending half of a [`Stream`].
#[derive(Debug)]
pub struct StreamWriter {
    id: u64,
    send: SendStream,
}

impl StreamWriter {
    /// Identifier of the stream this half belongs to.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Writes `data` in order; fails once the peer or transport closed the stream.
    pub async fn write(&mut self, data: Bytes, scope: &CancellationToken) -> Result<()> {
        let send = &mut self.send;
        cancellable(scope, async move {
            send.write_chunk(data)
                .await
                .map_err(|e| Error::Stream(e.to_string()))
        })
        .await
    }

    /// Gracefully ends the sending direction. Idempotent.
    pub fn finish(&mut self) {
        let _ = self.send.finish();
    }

    /// Waits until everything written before [`finish`](Self::finish) has been
    /// received by the peer.
    pub async fn delivered(&mut self, scope: &CancellationToken) -> Result<()> {
        match self.stopped(scope).await? {
            None => Ok(()),
            Some(code) => Err(Error::Stream(format!("stopped by peer with code {}", code))),
        }
    }

    /// Waits until the peer no longer needs this direction.
    ///
    /// Returns the peer's error code if it stopped reading, or `None` once a
    /// finished direction has been fully acknowledged.
    pub async fn stopped(&mut self, scope: &CancellationToken) -> Result<Option<u64>> {
        let send = &mut self.send;
        cancellable(scope, async move {
            send.stopped()
                .await
                .map(|code| code.map(VarInt::into_inner))
                .map_err(|e| Error::Stream(e.to_string()))
        })
        .await
    }

    /// Abandons the sending direction immediately. Idempotent.
    pub fn close(&mut self) {
        let _ = self.send.reset(CLOSE_CODE);
    }
}

/// Receiving half of a [`Stream`].
#[derive(Debug)]
pub struct StreamReader {
    id: u64,
    recv: RecvStream,
}

impl StreamReader {
    /// Identifier of the stream this half belongs to.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Reads the next chunk in order. Returns `Ok(None)` at end of stream.
    pub async fn read(&mut self, scope: &CancellationToken) -> Result<Option<Bytes>> {
        let recv = &mut self.recv;
        cancellable(scope, async move {
            recv.read_chunk(READ_BUFFER_SIZE, true)
                .await
                .map(|chunk| chunk.map(|chunk| chunk.bytes))
                .map_err(|e| Error::Stream(e.to_string()))
        })
        .await
    }

    /// Tells the peer to stop sending. Idempotent.
    pub fn close(&mut self) {
        let _ = self.recv.stop(CLOSE_CODE);
    }
}

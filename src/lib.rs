//! quiccat - pipe lines of text over a QUIC stream.
//!
//! The client role dials a server, opens one bidirectional stream and pumps
//! stdin lines into it while copying the stream to stdout. The server role
//! accepts connections with an ephemeral self-signed identity and holds every
//! stream open for the life of its session.

pub mod cli;
pub mod client;
pub mod common;
pub mod error;
pub mod logging;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod tls;
pub mod transport;

pub use cli::{Cli, ClientArgs, Command, ServeArgs};
pub use client::{run_client, ClientOptions, ConnectionManager, PumpExit};
pub use common::{format_duration, parse_connect_address, split_host_port, DnsResolver, READ_BUFFER_SIZE};
pub use error::{Error, ExitCode, Result};
pub use logging::{LogFormat, LogSettings};
pub use server::{run_server, Server, ServerOptions, ServerStats, StatsSnapshot};
pub use session::SessionHandler;
pub use shutdown::Shutdown;
pub use tls::{
    build_client_config_insecure, build_server_config, compute_fingerprint, format_fingerprint,
    generate_self_signed_cert, CertKeyPair, TlsError, TlsResult, ALPN,
};
pub use transport::{
    dial, Connection, Incoming, Listener, Stream, StreamReader, StreamWriter, TransportConfig,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_KEEP_ALIVE,
};

//! Per-connection session handling for the quiccat server.
//!
//! A [`SessionHandler`] owns one accepted connection and runs the stream accept
//! loop for it. Whatever goes wrong inside a session ends that session only.

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::Error;
use crate::server::ServerStats;
use crate::transport::{Connection, Stream};

/// Accept loop over the streams of one connection.
pub struct SessionHandler {
    connection: Connection,
    scope: CancellationToken,
    stats: Arc<ServerStats>,
}

impl SessionHandler {
    /// Creates a handler that runs until `scope` is cancelled or the connection ends.
    pub fn new(connection: Connection, scope: CancellationToken, stats: Arc<ServerStats>) -> Self {
        Self {
            connection,
            scope,
            stats,
        }
    }

    /// Runs the session to completion under a `remote`-tagged span.
    pub async fn run(self) {
        let span = tracing::info_span!("session", remote = %self.connection.remote_address());
        self.accept_streams().instrument(span).await
    }

    async fn accept_streams(self) {
        tracing::debug!("session established");
        self.stats.session_opened();

        // Accepted streams live exactly as long as the session.
        let streams_scope = self.scope.child_token();
        let mut streams = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.connection.accept_stream(&self.scope) => match accepted {
                    Ok(stream) => {
                        tracing::info!(stream_id = stream.id(), "stream accepted");
                        self.stats.stream_accepted();
                        streams.spawn(
                            hold_stream(stream, streams_scope.clone()).in_current_span(),
                        );
                    }
                    Err(Error::Cancelled) => {
                        tracing::debug!("session cancelled");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "session error");
                        break;
                    }
                },
                Some(_) = streams.join_next(), if !streams.is_empty() => {}
            }
        }

        streams_scope.cancel();
        while streams.join_next().await.is_some() {}

        self.connection.close("session ended");
        self.stats.session_closed();
        tracing::debug!("session terminated");
    }
}

/// Discards what the peer sends on `stream` and keeps the stream open until
/// `scope` ends or the peer stops reading it.
///
/// Holding the sending half stops the peer from seeing end-of-stream while the
/// session is alive. Stream credit only returns to the peer once both
/// directions are done.
async fn hold_stream(stream: Stream, scope: CancellationToken) {
    let stream_id = stream.id();
    let (mut writer, mut reader) = stream.split();
    let mut received = 0usize;

    loop {
        match reader.read(&scope).await {
            Ok(Some(chunk)) => {
                received += chunk.len();
                tracing::trace!(stream_id, bytes = chunk.len(), "discarded stream data");
            }
            Ok(None) => {
                tracing::debug!(stream_id, received, "stream finished by peer");
                break;
            }
            Err(Error::Cancelled) => return,
            Err(e) => {
                tracing::debug!(stream_id, error = %e, "stream read failed");
                return;
            }
        }
    }

    match writer.stopped(&scope).await {
        Ok(Some(code)) => tracing::debug!(stream_id, code, "stream released by peer"),
        Ok(None) | Err(Error::Cancelled) => {}
        Err(e) => tracing::debug!(stream_id, error = %e, "stream lost"),
    }
}

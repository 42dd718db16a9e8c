//! quiccat - pipe lines of text over a QUIC stream.

use clap::Parser;
use quiccat::{logging, run_client, run_server, Cli, Command, Shutdown};

fn main() {
    let cli = Cli::parse();

    logging::init(&cli.log_settings());

    // Initialize the crypto provider
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        tracing::warn!("failed to install default crypto provider (may already be installed): {:?}", e);
    }

    let runtime = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    let shutdown = Shutdown::new();

    let result = runtime.block_on(async {
        let _signals = shutdown.listen_for_signals();
        match &cli.command {
            Command::Serve(args) => {
                tracing::debug!(?args, "serve arguments");
                run_server(args, &shutdown).await
            }
            Command::Client(args) => {
                tracing::debug!(?args, "client arguments");
                run_client(args, &shutdown).await
            }
        }
    });

    // A blocking stdin read may still be parked on a worker thread.
    runtime.shutdown_background();

    if let Err(e) = result {
        tracing::error!(error = %e, "quiccat failed");
        std::process::exit(e.exit_code().into());
    }
}

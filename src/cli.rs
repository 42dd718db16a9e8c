//! CLI definitions for quiccat.

use clap::{builder::PossibleValuesParser, Parser, Subcommand};
use std::time::Duration;

use crate::logging::{LogFormat, LogSettings};

/// Accepted `--loglvl` spellings.
const LOG_LEVELS: [&str; 14] = [
    "trace", "t", "debug", "d", "info", "i", "warn", "warning", "w", "error", "err", "e", "fatal",
    "f",
];

/// Parse a duration from a human-readable string.
fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

/// Pipe lines of stdin to a QUIC stream, or serve QUIC streams.
#[derive(Debug, Parser)]
#[command(name = "quiccat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log format (text|json|none)
    #[arg(
        long,
        short = 'f',
        global = true,
        env = "LOGFMT",
        default_value = "text",
        value_parser = PossibleValuesParser::new(["text", "json", "none"])
    )]
    pub logfmt: String,

    /// Log level (trace|debug|info|warn|error|fatal)
    #[arg(
        long,
        global = true,
        env = "LOGLVL",
        default_value = "info",
        hide_possible_values = true,
        value_parser = PossibleValuesParser::new(LOG_LEVELS)
    )]
    pub loglvl: String,

    /// Pretty-print JSON logs
    #[arg(long, alias = "pp", global = true, hide = true)]
    pub prettyprint: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Logging settings selected by the global flags.
    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            format: LogFormat::parse(&self.logfmt),
            level: self.loglvl.clone(),
            pretty: self.prettyprint,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept QUIC connections and hold their streams open
    Serve(ServeArgs),

    /// Send stdin lines to a server and copy the stream to stdout
    Client(ClientArgs),
}

/// Arguments for the serve subcommand.
#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// UDP port to listen on (0 picks an ephemeral port)
    #[arg(long, short = 'p', env = "PORT", default_value_t = 0)]
    pub port: u16,

    /// QUIC idle timeout
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub idle_timeout: Duration,

    /// QUIC keep-alive interval (0 to disable)
    #[arg(long, value_parser = parse_duration, default_value = "3s")]
    pub keep_alive: Duration,
}

/// Arguments for the client subcommand.
#[derive(Debug, Parser)]
pub struct ClientArgs {
    /// Server address (e.g., server.example.com:9443)
    #[arg(long, short = 'a', env = "ADDRESS")]
    pub address: String,

    /// QUIC idle timeout
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub idle_timeout: Duration,

    /// QUIC keep-alive interval (0 to disable)
    #[arg(long, value_parser = parse_duration, default_value = "3s")]
    pub keep_alive: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_minimal() {
        let cli = Cli::try_parse_from(["quiccat", "serve"]).unwrap();

        assert_eq!(cli.logfmt, "text");
        assert_eq!(cli.loglvl, "info");
        assert!(!cli.prettyprint);
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.port, 0);
                assert_eq!(args.idle_timeout, Duration::from_secs(10));
                assert_eq!(args.keep_alive, Duration::from_secs(3));
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_parse_serve_full() {
        let cli = Cli::try_parse_from([
            "quiccat",
            "-f",
            "json",
            "--loglvl",
            "debug",
            "serve",
            "-p",
            "9443",
            "--idle-timeout",
            "30s",
            "--keep-alive",
            "0s",
        ])
        .unwrap();

        assert_eq!(cli.logfmt, "json");
        assert_eq!(cli.loglvl, "debug");
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.port, 9443);
                assert_eq!(args.idle_timeout, Duration::from_secs(30));
                assert!(args.keep_alive.is_zero());
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_parse_client() {
        let cli = Cli::try_parse_from([
            "quiccat",
            "client",
            "--address",
            "server.example.com:9443",
        ])
        .unwrap();

        match cli.command {
            Command::Client(args) => {
                assert_eq!(args.address, "server.example.com:9443");
                assert_eq!(args.idle_timeout, Duration::from_secs(10));
                assert_eq!(args.keep_alive, Duration::from_secs(3));
            }
            _ => panic!("Expected Client command"),
        }
    }

    #[test]
    fn test_parse_client_short_address() {
        let cli = Cli::try_parse_from(["quiccat", "client", "-a", "127.0.0.1:9443"]).unwrap();
        match cli.command {
            Command::Client(args) => assert_eq!(args.address, "127.0.0.1:9443"),
            _ => panic!("Expected Client command"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "quiccat",
            "client",
            "-a",
            "127.0.0.1:9443",
            "--loglvl",
            "w",
            "--pp",
        ])
        .unwrap();
        assert_eq!(cli.loglvl, "w");
        assert!(cli.prettyprint);
    }

    #[test]
    fn test_log_level_aliases_accepted() {
        for level in ["t", "warning", "err", "fatal", "f"] {
            let cli = Cli::try_parse_from(["quiccat", "--loglvl", level, "serve"]).unwrap();
            assert_eq!(cli.loglvl, level);
        }
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let result = Cli::try_parse_from(["quiccat", "--logfmt", "xml", "serve"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_client_missing_address() {
        // Only meaningful when ADDRESS is not set in the test environment.
        if std::env::var_os("ADDRESS").is_some() {
            return;
        }
        let result = Cli::try_parse_from(["quiccat", "client"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duration_parsing() {
        let cli = Cli::try_parse_from([
            "quiccat",
            "serve",
            "--idle-timeout",
            "1m30s",
            "--keep-alive",
            "500ms",
        ])
        .unwrap();

        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.idle_timeout, Duration::from_secs(90));
                assert_eq!(args.keep_alive, Duration::from_millis(500));
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_log_settings() {
        let cli = Cli::try_parse_from(["quiccat", "--logfmt", "json", "--pp", "serve"]).unwrap();
        let settings = cli.log_settings();
        assert_eq!(settings.format, LogFormat::Json);
        assert!(settings.pretty);
        assert_eq!(settings.level, "info");
    }
}

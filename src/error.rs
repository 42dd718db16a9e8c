//! Error types for quiccat.

use thiserror::Error;

/// Process exit codes for the serve and client subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Normal exit, including shutdown by signal
    Success = 0,
    /// Unclassified failure
    Failure = 1,
    /// Listen or accept loop failed
    ListenFailed = 10,
    /// Dial failed
    DialFailed = 11,
    /// Credential or TLS configuration failed
    CredentialsFailed = 12,
    /// Opening the application stream failed
    OpenStreamFailed = 13,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Main error type for quiccat.
#[derive(Debug, Error)]
pub enum Error {
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("listen failed: {0}")]
    ListenFailed(String),

    #[error("accept failed: {0}")]
    AcceptFailed(String),

    #[error("dial failed: {0}")]
    DialFailed(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("open stream failed: {0}")]
    OpenStreamFailed(String),

    #[error("stream error: {0}")]
    Stream(String),

    /// The scope observed by a blocking call was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true when the error is the cancellation unwind path rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns the exit code for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::Cancelled => ExitCode::Success,
            Error::Credentials(_) => ExitCode::CredentialsFailed,
            Error::ListenFailed(_) | Error::AcceptFailed(_) => ExitCode::ListenFailed,
            Error::DialFailed(_) | Error::Handshake(_) => ExitCode::DialFailed,
            Error::OpenStreamFailed(_) => ExitCode::OpenStreamFailed,
            Error::Stream(_) | Error::Io(_) | Error::Config(_) => ExitCode::Failure,
        }
    }
}

/// Result type alias for quiccat operations.
pub type Result<T> = std::result::Result<T, Error>;

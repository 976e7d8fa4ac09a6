//! Error taxonomy for cpsh.
//!
//! Two tiers: connection-level failures invalidate the session and are never
//! retried automatically; per-operation failures leave the connection usable.

use std::time::Duration;

/// Failures surfaced by the link, REPL controller, transport and adapters.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device never produced any boot output before the deadline.
    #[error("timed out after {0:?} waiting for the boot banner")]
    BootTimeout(Duration),

    /// Boot output arrived but never matched the configured locale banner.
    /// Usually means the device runs a different locale; see `--locale`.
    #[error("boot output did not match the configured banner (try --locale); got: {transcript:?}")]
    BannerMismatch { transcript: String },

    /// The device accepted the code but output never completed in time.
    #[error("timed out waiting for execution output of {op}")]
    ExecutionTimeout { op: String },

    /// The end-of-transfer acknowledgement never arrived. Distinct from a
    /// device-side execution error: chunk size/delay likely exceed what the
    /// device input buffer can absorb.
    #[error("timed out waiting for transfer acknowledgement (chunk pacing may be too aggressive)")]
    ChunkTimeout,

    /// The device raised an exception; the remote traceback is verbatim.
    #[error("device error during {op} on {path}: {message}")]
    Device {
        op: String,
        path: String,
        message: String,
    },

    /// The device dropped, rebooted mid-command, or the port went away.
    /// The session must be re-established explicitly.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("{path}: no such file or directory")]
    NotFound { path: String },

    #[error("{path}: not a directory")]
    NotADirectory { path: String },

    /// Operation interrupted by the user; the device was returned to the
    /// normal prompt (or the connection was dropped trying).
    #[error("cancelled")]
    Cancelled,

    /// Controller misuse: a REPL operation was invoked from the wrong state.
    /// This is a programming error, not a device condition.
    #[error("invalid REPL state: expected {expected}, found {found}")]
    BadState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("serial port error: {0}")]
    Serial(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Device reply that could not be decoded into the expected shape.
    #[error("malformed device reply for {op}: {detail}")]
    BadReply { op: String, detail: String },
}

impl Error {
    /// True when the failure invalidates the connection (fail-fast policy:
    /// no automatic retry against a half-duplex, unbuffered channel).
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::BootTimeout(_)
                | Error::BannerMismatch { .. }
                | Error::ExecutionTimeout { .. }
                | Error::ChunkTimeout
                | Error::ConnectionLost(_)
                | Error::Serial(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

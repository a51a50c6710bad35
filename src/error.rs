//! Error types for the socket-backed MPI layer.

use std::io;

/// Everything that can go wrong in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The peer closed its socket while we were mid-frame.
    #[error("socket to rank {rank:?} closed unexpectedly")]
    SocketClosed {
        /// The peer rank, if known at the point of failure.
        rank: Option<usize>,
    },

    /// The mutual challenge-response handshake failed.
    #[error("authentication handshake with {peer} failed: response did not match")]
    AuthFailure {
        /// Human-readable peer address (`ip:port` or similar).
        peer: String,
    },

    /// A buffered frame's tag did not match what the caller expected.
    #[error("expected tag {expected}, got {actual}")]
    TagMismatch {
        /// Tag the caller asked for.
        expected: i32,
        /// Tag actually present on the wire.
        actual: i32,
    },

    /// Bootstrap (environment resolution) failed.
    #[error("bootstrap via {method} failed: {source}")]
    Bootstrap {
        /// Name of the resolution method that was attempted (`"AME"`, `"PMI"`, ...).
        method: &'static str,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// A required environment variable was absent or malformed.
    #[error("environment variable {name} is missing or invalid: {reason}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The managed dispatcher finished without consuming the whole sequence,
    /// or one or more workers reported failure.
    #[error("sequence not fully consumed by managed dispatch:\n{report}")]
    IteratorNotConsumed {
        /// One line per failed `(rank, index)` pair, plus an exhaustion summary.
        report: String,
    },

    /// Write to an already-written key in a [`crate::collection::NestedMap`].
    #[error("overwrite not allowed: key {key:?} was already written")]
    OverwriteNotAllowed {
        /// The nested key path that was written twice.
        key: Vec<String>,
    },

    /// Two or more ranks wrote to the same key before a gather.
    #[error("duplicate keys across ranks during gather:\n{report}")]
    DuplicateGatherKeys {
        /// One line per colliding key, listing the ranks that wrote it.
        report: String,
    },

    /// Connecting to rank 0 exhausted the retry budget.
    #[error("could not connect to {host}:{port} after exhausting retry budget")]
    ConnectRetriesExhausted {
        /// Root host.
        host: String,
        /// Root port.
        port: i32,
    },

    /// `SOCKMPI_DEBUG`'s bounded wait expired without a matching frame arriving.
    #[error("recv timed out after {after:?} (SOCKMPI_DEBUG bounded wait)")]
    RecvTimeout {
        /// The budget that elapsed.
        after: std::time::Duration,
    },

    /// Low-level I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Payload failed to encode/decode with the configured [`crate::codec::Codec`].
    #[error("payload codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Wrap `self` as the cause of a bootstrap failure attributed to `method`.
    pub fn into_bootstrap(self, method: &'static str) -> Error {
        Error::Bootstrap {
            method,
            source: Box::new(self),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

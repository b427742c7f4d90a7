//! Error types for ttylink sessions.

use nix::errno::Errno;

/// Alias for `Result<T, ttylink::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by session and terminal operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The process has no usable controlling terminal.
    #[error("stdin/stdout is not a terminal")]
    NotInteractive,

    /// A terminal attribute or geometry call failed.
    #[error("{op}: {errno}")]
    Term {
        /// The failed terminal operation.
        op: &'static str,
        /// The underlying OS error.
        errno: Errno,
    },

    /// An I/O error on the transport or the local streams.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

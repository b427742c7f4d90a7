//! Raw interactive terminal sessions over a single TCP stream.
//!
//! ttylink upgrades a bare reverse-shell connection into a full
//! interactive terminal: the local terminal goes raw, every byte crosses
//! the wire verbatim, and window-size changes travel *in-band* as
//! self-delimited resize frames (see [`ttylink_proto`]) — the one stream
//! is the only channel there is.
//!
//! # Quick start
//!
//! ```no_run
//! use tokio::net::TcpListener;
//! use ttylink::Session;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> ttylink::Result<()> {
//!     let listener = TcpListener::bind(("0.0.0.0", 4444)).await?;
//!     let (stream, _peer) = listener.accept().await?;
//!     Session::new(stream).run().await
//! }
//! ```
//!
//! # Platform
//!
//! Session and terminal support are Unix-only; on other platforms the
//! crate exposes nothing.

#[cfg(unix)]
mod error;
#[cfg(unix)]
mod session;
#[cfg(unix)]
mod term;

#[cfg(unix)]
pub use error::{Error, Result};
#[cfg(unix)]
pub use session::Session;
#[cfg(unix)]
pub use term::{RawModeGuard, set_window_size, window_size};
#[cfg(unix)]
pub use ttylink_proto::WindowSize;

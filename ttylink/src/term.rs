//! Local terminal control: size probe, size application, raw mode.
//!
//! # Platform
//!
//! This module is only available on Unix.

#![allow(unsafe_code)]

use std::io;
use std::os::fd::{AsFd, AsRawFd};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::pty::Winsize;
use nix::sys::termios::{self, SetArg, Termios};
use tracing::warn;
use ttylink_proto::WindowSize;

use crate::error::{Error, Result};

/// Reads the current geometry of the terminal behind `fd` via `TIOCGWINSZ`.
///
/// Fails with [`Error::NotInteractive`] when `fd` is not a terminal —
/// callers treat that as fatal to starting a session rather than retrying.
pub fn window_size(fd: impl AsFd) -> Result<WindowSize> {
    let mut ws = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: fd is a valid open descriptor and ws is a valid winsize.
    let ret = unsafe { libc::ioctl(fd.as_fd().as_raw_fd(), libc::TIOCGWINSZ, &mut ws) };
    if ret == -1 {
        return Err(match Errno::last() {
            Errno::ENOTTY => Error::NotInteractive,
            errno => Error::Term {
                op: "TIOCGWINSZ",
                errno,
            },
        });
    }
    Ok(WindowSize {
        rows: ws.ws_row,
        cols: ws.ws_col,
    })
}

/// Applies `size` to the terminal behind `fd` via `TIOCSWINSZ`.
///
/// Re-applying the current size is a kernel-level no-op, so callers may
/// apply unconditionally. The pixel fields are reserved and stay zero.
pub fn set_window_size(fd: impl AsFd, size: WindowSize) -> Result<()> {
    let ws = Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: fd is a valid open descriptor and ws outlives the call.
    let ret = unsafe {
        libc::ioctl(
            fd.as_fd().as_raw_fd(),
            libc::TIOCSWINSZ,
            std::ptr::from_ref(&ws),
        )
    };
    if ret == -1 {
        return Err(Error::Term {
            op: "TIOCSWINSZ",
            errno: Errno::last(),
        });
    }
    Ok(())
}

/// Scoped raw-mode ownership of the local terminal.
///
/// Construction saves stdin's attributes and file-status flags, switches
/// the terminal to raw mode, and marks the descriptor non-blocking for the
/// readiness-driven relay. Drop restores both — on normal close, error
/// return, and panic unwinding alike.
#[derive(Debug)]
pub struct RawModeGuard {
    /// Attributes to restore at drop.
    saved_attrs: Termios,
    /// File-status flags to restore at drop.
    saved_flags: OFlag,
}

impl RawModeGuard {
    /// Enters raw mode on stdin.
    pub fn new() -> Result<Self> {
        let stdin = io::stdin();
        let saved_attrs = termios::tcgetattr(&stdin).map_err(|errno| Error::Term {
            op: "tcgetattr",
            errno,
        })?;

        let mut raw = saved_attrs.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&stdin, SetArg::TCSADRAIN, &raw).map_err(|errno| Error::Term {
            op: "tcsetattr",
            errno,
        })?;

        match set_nonblocking(&stdin) {
            Ok(saved_flags) => Ok(Self {
                saved_attrs,
                saved_flags,
            }),
            Err(e) => {
                // Undo the half-entered state before failing.
                let _ = termios::tcsetattr(&stdin, SetArg::TCSADRAIN, &saved_attrs);
                Err(e)
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Best-effort: failing to restore must not prevent process exit.
        let stdin = io::stdin();
        let _ = fcntl(&stdin, FcntlArg::F_SETFL(self.saved_flags));
        if let Err(errno) = termios::tcsetattr(&stdin, SetArg::TCSADRAIN, &self.saved_attrs) {
            warn!("failed to restore terminal attributes: {errno}");
        }
    }
}

/// Sets `O_NONBLOCK` on `fd`, returning the previous flags.
fn set_nonblocking(fd: impl AsFd) -> Result<OFlag> {
    let fd = fd.as_fd();
    let bits = fcntl(fd, FcntlArg::F_GETFL).map_err(|errno| Error::Term {
        op: "F_GETFL",
        errno,
    })?;
    let flags = OFlag::from_bits_retain(bits);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(|errno| Error::Term {
        op: "F_SETFL",
        errno,
    })?;
    Ok(flags)
}

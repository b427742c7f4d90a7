//! The relay session: a raw local terminal on one end of a TCP stream, a
//! remote command interpreter on the other.
//!
//! The loop is single-threaded and readiness-driven. Local keystrokes go
//! to the peer verbatim; bytes arriving from the peer are demultiplexed
//! by the frame scanner — resize frames drive the local terminal
//! geometry, everything else is written to the display. A local window
//! resize (SIGWINCH) is probed and sent to the peer as an in-band frame.

use std::future::poll_fn;
use std::io;
use std::os::fd::AsFd;
use std::task::Poll;

use nix::errno::Errno;
use nix::unistd;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tokio::net::tcp::WriteHalf;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, warn};
use ttylink_proto::{Event, FrameScanner, WindowSize, encode};

use crate::error::Result;
use crate::term::{self, RawModeGuard};

/// Read chunk size for the local terminal and the remote stream.
const READ_CHUNK: usize = 4096;

/// A single interactive relay session over one established stream.
///
/// Exactly one session is active at a time; the session owns the
/// transport for its whole life and closes it on the way out.
#[derive(Debug)]
pub struct Session {
    /// The bidirectional transport to the remote interpreter.
    stream: TcpStream,
}

impl Session {
    /// Wraps an established transport stream.
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Runs the session to completion.
    ///
    /// Establishment probes the terminal, enters raw mode, and sends the
    /// peer one size frame before any input is relayed. The loop then
    /// multiplexes until either side reaches end-of-stream or an I/O
    /// error intervenes. On every exit path the terminal is restored
    /// first and the transport closed, so an error returned here reaches
    /// the caller with the terminal already sane.
    pub async fn run(mut self) -> Result<()> {
        // Probe before touching terminal state: a missing controlling
        // terminal must fail the session before anything needs undoing.
        let initial = term::window_size(io::stdout())?;

        let guard = RawModeGuard::new()?;
        let result = self.relay(initial).await;
        drop(guard);

        let _ = self.stream.shutdown().await;
        result
    }

    /// Steady-state multiplexing over {local input, remote stream,
    /// resize signal}.
    async fn relay(&mut self, initial: WindowSize) -> Result<()> {
        let mut winch = signal(SignalKind::window_change())?;
        let stdin = AsyncFd::with_interest(io::stdin(), Interest::READABLE)?;
        let stdout = io::stdout();

        let (mut remote_rd, mut remote_wr) = self.stream.split();

        // Initial size synchronization precedes any relayed input.
        remote_wr.write_all(&encode(initial)).await?;

        let mut scanner = FrameScanner::new();
        let mut local_buf = [0u8; READ_CHUNK];
        let mut remote_buf = [0u8; READ_CHUNK];

        loop {
            // The resize condition is re-checked ahead of every blocking
            // wait, so a resize raised while input is already buffered
            // still gets its frame onto the wire first.
            if poll_fn(|cx| Poll::Ready(matches!(winch.poll_recv(cx), Poll::Ready(Some(()))))).await
            {
                send_resize(&mut remote_wr, &stdout).await?;
            }

            tokio::select! {
                // Local keystrokes go to the peer verbatim.
                readiness = stdin.readable() => {
                    let mut readiness = readiness?;
                    let n = match readiness.try_io(|fd| {
                        unistd::read(fd.get_ref(), &mut local_buf).map_err(io::Error::from)
                    }) {
                        Ok(Ok(n)) => n,
                        // A signal (typically SIGWINCH) interrupted the
                        // read; the next iteration picks it up.
                        Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Ok(Err(e)) => return Err(e.into()),
                        // Spurious readiness; wait again.
                        Err(_would_block) => continue,
                    };
                    if n == 0 {
                        debug!("local input closed");
                        return Ok(());
                    }
                    remote_wr.write_all(&local_buf[..n]).await?;
                }

                // Remote bytes are demultiplexed; frames never reach the
                // display.
                read = remote_rd.read(&mut remote_buf) => {
                    let n = read?;
                    if n == 0 {
                        if scanner.pending() > 0 {
                            // An incomplete frame can never complete now.
                            debug!(bytes = scanner.pending(), "discarding partial frame at end of stream");
                        }
                        debug!("remote closed");
                        return Ok(());
                    }
                    demux(
                        &mut scanner,
                        &remote_buf[..n],
                        |size| {
                            // A missed resize is not fatal; the previous
                            // geometry stays in effect.
                            if let Err(e) = term::set_window_size(&stdout, size) {
                                warn!("resize to {}x{} failed: {e}", size.rows, size.cols);
                            }
                        },
                        |span| write_display(&stdout, span),
                    )?;
                }

                // Wakes the loop when a resize arrives on an otherwise
                // idle session; bursts coalesce to the latest size.
                _ = winch.recv() => send_resize(&mut remote_wr, &stdout).await?,
            }
        }
    }
}

/// Probes fresh local dimensions and sends the peer a resize frame.
///
/// Probe failure mid-session is logged and skipped; the peer keeps the
/// previous size.
async fn send_resize(remote_wr: &mut WriteHalf<'_>, stdout: &io::Stdout) -> Result<()> {
    match term::window_size(stdout) {
        Ok(size) => remote_wr.write_all(&encode(size)).await?,
        Err(e) => warn!("window size probe failed: {e}"),
    }
    Ok(())
}

/// Runs one chunk from the remote stream through the frame scanner,
/// dispatching decoded frames through `resize` and pass-through spans
/// through `data`, in input order.
fn demux(
    scanner: &mut FrameScanner,
    chunk: &[u8],
    mut resize: impl FnMut(WindowSize),
    mut data: impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    for event in scanner.push(chunk) {
        match event {
            Event::Data(span) => data(&span)?,
            Event::Resize(size) => resize(size),
        }
    }
    Ok(())
}

/// Writes one pass-through span to the display descriptor.
///
/// Stdout stays blocking; a terminal write only stalls under output flow
/// control, which has already paused the session's purpose anyway.
fn write_display(fd: impl AsFd, span: &[u8]) -> Result<()> {
    let fd = fd.as_fd();
    let mut rest = span;
    while !rest.is_empty() {
        match unistd::write(fd, rest) {
            Ok(n) => rest = &rest[n..],
            Err(Errno::EINTR) => {}
            Err(errno) => return Err(io::Error::from(errno).into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects demux output for one chunk sequence.
    fn run_demux(chunks: &[&[u8]]) -> (Vec<u8>, Vec<WindowSize>) {
        let mut scanner = FrameScanner::new();
        let mut display = Vec::new();
        let mut sizes = Vec::new();
        for chunk in chunks {
            demux(
                &mut scanner,
                chunk,
                |size| sizes.push(size),
                |span| {
                    display.extend_from_slice(span);
                    Ok(())
                },
            )
            .unwrap();
        }
        (display, sizes)
    }

    #[test]
    fn frames_are_applied_and_stripped_from_the_display() {
        let mut chunk = b"hello".to_vec();
        chunk.extend_from_slice(&encode(WindowSize { rows: 24, cols: 80 }));
        chunk.extend_from_slice(b"world");

        let (display, sizes) = run_demux(&[&chunk]);
        assert_eq!(display, b"helloworld");
        assert_eq!(sizes, vec![WindowSize { rows: 24, cols: 80 }]);
    }

    #[test]
    fn frame_split_across_reads_applies_once() {
        let frame = encode(WindowSize { rows: 50, cols: 200 });
        let (display, sizes) = run_demux(&[b"$ ", &frame[..5], &frame[5..], b"ok"]);
        assert_eq!(display, b"$ ok");
        assert_eq!(sizes, vec![WindowSize { rows: 50, cols: 200 }]);
    }

    #[test]
    fn data_error_stops_dispatch() {
        let mut scanner = FrameScanner::new();
        let result = demux(
            &mut scanner,
            b"boom",
            |_| {},
            |_| Err(io::Error::from(io::ErrorKind::BrokenPipe).into()),
        );
        assert!(result.is_err());
    }
}

//! Scanning decoder that splits an incoming stream into pass-through
//! data and resize frames.
//!
//! The scan is re-entrant across reads: the only state carried between
//! calls is the unclassified tail of the stream (a possibly incomplete
//! frame candidate). Everything before the tail is classified the moment
//! it is pushed.

use memchr::{memchr, memchr_iter};

use crate::frame::{FRAME_PREFIX, FRAME_TERMINATOR, MAX_FRAME_LEN, WindowSize};

/// One classified span of the stream, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Ordinary terminal traffic; deliver unmodified.
    Data(Vec<u8>),
    /// A decoded resize frame. Its bytes are consumed here and must never
    /// reach the data destination.
    Resize(WindowSize),
}

/// Re-entrant frame scanner over an accumulating stream buffer.
///
/// Bytes pushed in come back out as [`Event`]s in input order. At any
/// time the scanner holds at most one incomplete frame candidate, at the
/// buffer tail.
#[derive(Debug, Default)]
pub struct FrameScanner {
    /// Unclassified tail; when non-empty it begins with `ESC` and is a
    /// frame candidate awaiting more input.
    buf: Vec<u8>,
}

/// Outcome of searching a buffer for the frame signature.
enum Candidate {
    /// No signature anywhere; the whole buffer is data.
    None,
    /// A complete [`FRAME_PREFIX`] begins at this offset.
    Frame(usize),
    /// The buffer ends with a proper prefix of [`FRAME_PREFIX`] starting
    /// at this offset; classification needs more input.
    Partial(usize),
}

impl FrameScanner {
    /// Creates an empty scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes held back as a potential partial frame.
    ///
    /// At end-of-stream these can never complete; callers discard them
    /// rather than letting half a frame leak to the display.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Appends freshly read bytes and returns the spans classified so far.
    ///
    /// Pass-through runs are coalesced: consecutive data bytes come back
    /// as one [`Event::Data`] per call unless a frame splits them.
    pub fn push(&mut self, input: &[u8]) -> Vec<Event> {
        self.buf.extend_from_slice(input);
        let held = std::mem::take(&mut self.buf);

        let mut events = Vec::new();
        let mut data = Vec::new();
        let mut pos = 0;

        while pos < held.len() {
            match find_candidate(&held[pos..]) {
                Candidate::None => {
                    data.extend_from_slice(&held[pos..]);
                    pos = held.len();
                }
                Candidate::Partial(at) => {
                    data.extend_from_slice(&held[pos..pos + at]);
                    self.buf = held[pos + at..].to_vec();
                    pos = held.len();
                }
                Candidate::Frame(at) => {
                    data.extend_from_slice(&held[pos..pos + at]);
                    let body = pos + at + FRAME_PREFIX.len();
                    match memchr(FRAME_TERMINATOR, &held[body..]) {
                        Some(end) => {
                            // Complete span: emit preceding data first so
                            // stream order is preserved, then the frame.
                            // Malformed payloads are control noise and
                            // produce nothing.
                            flush(&mut events, &mut data);
                            if let Some(size) = parse_payload(&held[body..body + end]) {
                                events.push(Event::Resize(size));
                            }
                            pos = body + end + 1;
                        }
                        None if held.len() - (pos + at) > MAX_FRAME_LEN => {
                            // Too long to ever form a valid frame: release
                            // the signature as data and rescan the rest.
                            data.extend_from_slice(FRAME_PREFIX);
                            pos = body;
                        }
                        None => {
                            // Incomplete frame: hold the tail and stall its
                            // delivery until more input arrives.
                            self.buf = held[pos + at..].to_vec();
                            pos = held.len();
                        }
                    }
                }
            }
        }

        flush(&mut events, &mut data);
        events
    }
}

/// Moves any coalesced pass-through run into the event list.
fn flush(events: &mut Vec<Event>, data: &mut Vec<u8>) {
    if !data.is_empty() {
        events.push(Event::Data(std::mem::take(data)));
    }
}

/// Locates the earliest frame signature, complete or tail-partial, in `hay`.
///
/// [`FRAME_PREFIX`] starts with `ESC` and contains no second `ESC`, so
/// scanning `ESC` positions cannot miss a signature.
fn find_candidate(hay: &[u8]) -> Candidate {
    for at in memchr_iter(FRAME_PREFIX[0], hay) {
        let rest = &hay[at..];
        if rest.len() >= FRAME_PREFIX.len() {
            if rest.starts_with(FRAME_PREFIX) {
                return Candidate::Frame(at);
            }
        } else if FRAME_PREFIX.starts_with(rest) {
            return Candidate::Partial(at);
        }
    }
    Candidate::None
}

/// Parses a `rows;cols` payload, both fields unpadded unsigned decimal.
fn parse_payload(payload: &[u8]) -> Option<WindowSize> {
    let text = std::str::from_utf8(payload).ok()?;
    let (rows, cols) = text.split_once(';')?;
    Some(WindowSize {
        rows: parse_dim(rows)?,
        cols: parse_dim(cols)?,
    })
}

/// Parses one dimension field: digits only, fitting `u16`.
fn parse_dim(field: &str) -> Option<u16> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;

    /// Runs a whole buffer through a fresh scanner.
    fn scan(input: &[u8]) -> Vec<Event> {
        FrameScanner::new().push(input)
    }

    #[test]
    fn round_trip_reasonable_sizes() {
        for &rows in &[1u16, 2, 9, 24, 48, 80, 137, 999, 4096, 9999] {
            for &cols in &[1u16, 10, 80, 120, 211, 9999] {
                let size = WindowSize { rows, cols };
                assert_eq!(scan(&encode(size)), vec![Event::Resize(size)]);
            }
        }
    }

    #[test]
    fn split_frame_reassembles_at_every_boundary() {
        let frame = encode(WindowSize { rows: 57, cols: 213 });
        for split in 0..=frame.len() {
            let mut scanner = FrameScanner::new();
            let mut events = scanner.push(&frame[..split]);
            events.extend(scanner.push(&frame[split..]));
            assert_eq!(
                events,
                vec![Event::Resize(WindowSize { rows: 57, cols: 213 })],
                "split at byte {split}"
            );
            assert_eq!(scanner.pending(), 0);
        }
    }

    #[test]
    fn split_frame_across_three_chunks() {
        let frame = encode(WindowSize { rows: 40, cols: 120 });
        let mut scanner = FrameScanner::new();
        assert!(scanner.push(&frame[..2]).is_empty());
        assert!(scanner.push(&frame[2..9]).is_empty());
        assert_eq!(
            scanner.push(&frame[9..]),
            vec![Event::Resize(WindowSize { rows: 40, cols: 120 })]
        );
    }

    #[test]
    fn passthrough_survives_arbitrary_chunking() {
        // Ordinary traffic including unrelated escape sequences.
        let input = b"ls --color\r\n\x1b[0;32mbin\x1b[0m  \x1b[1;34msrc\x1b[0m\r\n$ ";
        for chunk in 1..input.len() {
            let mut scanner = FrameScanner::new();
            let mut out = Vec::new();
            for piece in input.chunks(chunk) {
                for event in scanner.push(piece) {
                    match event {
                        Event::Data(d) => out.extend_from_slice(&d),
                        Event::Resize(size) => panic!("phantom frame {size:?}"),
                    }
                }
            }
            assert_eq!(out, input, "chunk size {chunk}");
        }
    }

    #[test]
    fn frame_between_data_keeps_order() {
        let mut input = b"hello".to_vec();
        input.extend_from_slice(&encode(WindowSize { rows: 24, cols: 80 }));
        input.extend_from_slice(b"world");

        assert_eq!(
            scan(&input),
            vec![
                Event::Data(b"hello".to_vec()),
                Event::Resize(WindowSize { rows: 24, cols: 80 }),
                Event::Data(b"world".to_vec()),
            ]
        );
    }

    #[test]
    fn back_to_back_frames_decode_separately() {
        let mut input = encode(WindowSize { rows: 24, cols: 80 });
        input.extend_from_slice(&encode(WindowSize { rows: 50, cols: 200 }));
        assert_eq!(
            scan(&input),
            vec![
                Event::Resize(WindowSize { rows: 24, cols: 80 }),
                Event::Resize(WindowSize { rows: 50, cols: 200 }),
            ]
        );
    }

    #[test]
    fn malformed_payload_is_dropped_and_scanning_resumes() {
        let input = b"\x1b[999;x?yRafter";
        assert_eq!(scan(input), vec![Event::Data(b"after".to_vec())]);
    }

    #[test]
    fn malformed_variants_never_reach_the_display() {
        // Missing separator, empty fields, overflow, wrong field count.
        for payload in ["2480", ";80", "24;", "70000;80", "24;80;1"] {
            let input = format!("\x1b[999;{payload}Rok").into_bytes();
            assert_eq!(scan(&input), vec![Event::Data(b"ok".to_vec())], "{payload}");
        }
    }

    #[test]
    fn partial_prefix_at_tail_is_withheld() {
        let mut scanner = FrameScanner::new();
        assert_eq!(
            scanner.push(b"abc\x1b[9"),
            vec![Event::Data(b"abc".to_vec())]
        );
        assert_eq!(scanner.pending(), 3);
    }

    #[test]
    fn diverging_partial_prefix_is_released_as_data() {
        let mut scanner = FrameScanner::new();
        let mut events = scanner.push(b"abc\x1b[9");
        events.extend(scanner.push(b"zz"));
        assert_eq!(
            events,
            vec![
                Event::Data(b"abc".to_vec()),
                Event::Data(b"\x1b[9zz".to_vec()),
            ]
        );
        assert_eq!(scanner.pending(), 0);
    }

    #[test]
    fn lone_escape_before_real_frame_is_data() {
        let mut input = b"\x1b".to_vec();
        input.extend_from_slice(&encode(WindowSize { rows: 30, cols: 90 }));
        assert_eq!(
            scan(&input),
            vec![
                Event::Data(b"\x1b".to_vec()),
                Event::Resize(WindowSize { rows: 30, cols: 90 }),
            ]
        );
    }

    #[test]
    fn unterminated_overlong_candidate_is_released_losslessly() {
        let mut input = FRAME_PREFIX.to_vec();
        input.extend_from_slice(&[b'1'; 30]);

        let mut scanner = FrameScanner::new();
        assert_eq!(scanner.push(&input), vec![Event::Data(input.clone())]);
        assert_eq!(scanner.pending(), 0);
    }

    #[test]
    fn incomplete_frame_stays_pending_across_pushes() {
        let mut scanner = FrameScanner::new();
        assert!(scanner.push(b"\x1b[999;4").is_empty());
        assert_eq!(scanner.pending(), 7);
        assert_eq!(
            scanner.push(b"0;120R"),
            vec![Event::Resize(WindowSize { rows: 40, cols: 120 })]
        );
        assert_eq!(scanner.pending(), 0);
    }
}

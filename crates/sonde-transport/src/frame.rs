//! Length-framed shell protocol.
//!
//! Every message is a 5-byte header (one kind byte, then a little-endian
//! `u32` payload length) followed by exactly `length` payload bytes.
//! Kind 1 carries stdout, kind 2 stderr, and kind 3 the exit status,
//! which also ends the stream.

use std::io::{self, Read};

pub const HEADER_LEN: usize = 5;
/// Largest payload a header may announce.
pub const MAX_PAYLOAD_LEN: u32 = 1 << 20;

pub const KIND_STDOUT: u8 = 1;
pub const KIND_STDERR: u8 = 2;
pub const KIND_EXIT: u8 = 3;

// ── Frames ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit(u8),
}

impl Frame {
    pub fn kind(&self) -> u8 {
        match self {
            Frame::Stdout(_) => KIND_STDOUT,
            Frame::Stderr(_) => KIND_STDERR,
            Frame::Exit(_) => KIND_EXIT,
        }
    }

    /// Serialize this frame, header included.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Stdout(data) | Frame::Stderr(data) => encode_frame(self.kind(), data),
            Frame::Exit(code) => encode_frame(KIND_EXIT, &[*code]),
        }
    }
}

/// Encode a raw `(kind, payload)` pair.
pub fn encode_frame(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(kind);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("stream ended inside a frame header")]
    TruncatedHeader,
    #[error("stream ended inside a {expected}-byte payload")]
    TruncatedPayload { expected: u32 },
    #[error("frame announces {length} payload bytes, limit is {max}", max = MAX_PAYLOAD_LEN)]
    Oversized { length: u32 },
    #[error("stream ended before the exit frame")]
    MissingExit,
    #[error(transparent)]
    Io(#[from] io::Error),
}

// ── Reader ───────────────────────────────────────────────────────────

/// Pull-based decoder over any byte source.
///
/// Zero-length frames are skipped whatever their kind. Frames of an
/// unknown kind are consumed and dropped. Once the exit frame has been
/// returned the reader yields `None` forever and never touches the
/// underlying source again.
pub struct FrameReader<R> {
    inner: R,
    finished: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Decode the next meaningful frame.
    ///
    /// End of input before an exit frame is an error: the remote side
    /// never reported a status.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.finished {
            return Ok(None);
        }
        loop {
            let mut header = [0u8; HEADER_LEN];
            match read_full(&mut self.inner, &mut header)? {
                0 => return Err(FrameError::MissingExit),
                n if n < HEADER_LEN => return Err(FrameError::TruncatedHeader),
                _ => {}
            }
            let kind = header[0];
            let length = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
            if length == 0 {
                continue;
            }
            if length > MAX_PAYLOAD_LEN {
                return Err(FrameError::Oversized { length });
            }

            let mut payload = vec![0u8; length as usize];
            if read_full(&mut self.inner, &mut payload)? < payload.len() {
                return Err(FrameError::TruncatedPayload { expected: length });
            }

            match kind {
                KIND_STDOUT => return Ok(Some(Frame::Stdout(payload))),
                KIND_STDERR => return Ok(Some(Frame::Stderr(payload))),
                KIND_EXIT => {
                    self.finished = true;
                    return Ok(Some(Frame::Exit(payload[0])));
                }
                other => {
                    tracing::debug!(kind = other, length, "skipping unknown shell frame");
                }
            }
        }
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Frame, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Read until `buf` is full or the source is exhausted; returns bytes read.
fn read_full<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
